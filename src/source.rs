use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::actor::ActorRef;
use crate::error::FlowError;
use crate::graph::Graph;
use crate::pipe::Outlet;

/// The upstream face of a pipeline stage, as seen by its pipe.
///
/// Implemented by source stages and by the producer half of flow stages.
/// `subscribe` is synchronous wiring, done once while the pipeline is being
/// assembled; the async callbacks are invoked by the pipe's dispatch loop,
/// one at a time.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    type Out: Send + 'static;

    /// Binds the outlet this stage emits into.
    ///
    /// # Panics
    ///
    /// A stage joins one pipe; binding it twice panics.
    fn subscribe(&self, outlet: Outlet<Self::Out>);

    /// Startup hook, run by the dispatch loop before any signal.
    async fn on_start(&self) {}

    /// One unit of demand from downstream.
    async fn on_pull(&self);

    /// Downstream gave up. Terminal; the stage must answer with a final
    /// `Complete`.
    async fn on_cancel(&self);
}

/// A pullable origin of values.
///
/// Implementations answer one `on_pull` with exactly one of: a value, an
/// error for that attempt, or [`FlowError::Eof`] once exhausted. The stage
/// wrapping the source maps those onto pipe signals, so a source never
/// touches outlets directly.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    type Out: Send + 'static;

    /// Runs once, before the first pull.
    async fn on_init(&self) {}

    /// Produces the next value.
    async fn on_pull(&self) -> Result<Self::Out, FlowError>;

    /// Teardown hook, run when downstream cancels.
    async fn on_close(&self) {}
}

/// Adapter from [`Source`] to the [`Producer`] contract.
pub struct SourceStage<S: Source> {
    source: S,
    outlet: OnceLock<Outlet<S::Out>>,
}

impl<S: Source> SourceStage<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            outlet: OnceLock::new(),
        }
    }

    fn outlet(&self) -> &Outlet<S::Out> {
        self.outlet.get().expect("source stage not attached to a pipe")
    }
}

#[async_trait]
impl<S: Source> Producer for SourceStage<S> {
    type Out = S::Out;

    fn subscribe(&self, outlet: Outlet<S::Out>) {
        if self.outlet.set(outlet).is_err() {
            panic!("source stage attached twice");
        }
    }

    async fn on_start(&self) {
        self.source.on_init().await;
    }

    async fn on_pull(&self) {
        match self.source.on_pull().await {
            Ok(value) => self.outlet().push(value).await,
            Err(FlowError::Eof) => {
                debug!("Source exhausted");
                self.outlet().complete().await;
            }
            Err(err) => self.outlet().error(err).await,
        }
    }

    async fn on_cancel(&self) {
        self.source.on_close().await;
        self.outlet().complete().await;
    }
}

/// Endless arithmetic progression. Wraps on `u64` overflow.
pub struct Sequence {
    counter: AtomicU64,
    step: u64,
}

impl Sequence {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
            step,
        }
    }
}

/// Counts 0, 1, 2, ...
impl Default for Sequence {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

#[async_trait]
impl Source for Sequence {
    type Out = u64;

    async fn on_pull(&self) -> Result<u64, FlowError> {
        Ok(self.counter.fetch_add(self.step, Ordering::SeqCst))
    }
}

/// Drains a Tokio channel. The stream completes when every sender is gone
/// and the queue is empty.
pub struct ChannelSource<T> {
    receiver: Mutex<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> ChannelSource<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            receiver: Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Source for ChannelSource<T> {
    type Out = T;

    async fn on_pull(&self) -> Result<T, FlowError> {
        match self.receiver.lock().await.recv().await {
            Some(value) => Ok(value),
            None => Err(FlowError::Eof),
        }
    }
}

/// Pulls values out of an actor, one request per unit of demand.
///
/// Each pull sends `ack` and waits for the behavior's reply; a reply of
/// [`FlowError::Eof`] ends the stream. The optional `init` payload is
/// fire-and-forget before the first pull. When downstream cancels, the
/// source closes the ref it was handed, so the ref's lifetime belongs to
/// the pipeline once the source owns it.
pub struct ActorSource<T: Clone + Send + Sync + 'static> {
    actor: ActorRef<T>,
    ack: T,
    init: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> ActorSource<T> {
    pub fn new(actor: ActorRef<T>, ack: T) -> Self {
        Self {
            actor,
            ack,
            init: None,
        }
    }

    /// Payload sent once at startup, before any demand.
    pub fn with_init(mut self, init: T) -> Self {
        self.init = Some(init);
        self
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Source for ActorSource<T> {
    type Out = T;

    async fn on_init(&self) {
        if let Some(init) = &self.init {
            self.actor.send(init.clone());
        }
    }

    async fn on_pull(&self) -> Result<T, FlowError> {
        self.actor.request(self.ack.clone()).await
    }

    async fn on_close(&self) {
        debug!("Actor source canceled, closing ref");
        self.actor.close();
    }
}

/// Adapter turning a closure into a [`Source`].
pub struct SourceFn<T, F> {
    f: F,
    _out: PhantomData<fn() -> T>,
}

impl<T, F> SourceFn<T, F>
where
    T: Send + 'static,
    F: Fn() -> Result<T, FlowError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _out: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Source for SourceFn<T, F>
where
    T: Send + 'static,
    F: Fn() -> Result<T, FlowError> + Send + Sync + 'static,
{
    type Out = T;

    async fn on_pull(&self) -> Result<T, FlowError> {
        (self.f)()
    }
}

/// Pipeline over `start, start + step, start + 2 * step, ...`
pub fn sequence(start: u64, step: u64) -> Graph<u64> {
    Graph::from_source(Sequence::new(start, step))
}

/// Pipeline draining `receiver` until every sender is dropped.
pub fn channel_source<T: Send + 'static>(receiver: mpsc::Receiver<T>) -> Graph<T> {
    Graph::from_source(ChannelSource::new(receiver))
}
