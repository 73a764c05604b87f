use std::marker::PhantomData;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::error::FlowError;
use crate::pipe::Inlet;

/// The downstream face of a pipeline stage, as seen by its pipe.
///
/// Implemented by sink stages and by the consumer half of flow stages.
/// Like [`Producer`], wiring is synchronous and the async callbacks belong
/// to the pipe's dispatch loop.
///
/// [`Producer`]: crate::source::Producer
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    type In: Send + 'static;

    /// Binds the inlet this stage signals demand through.
    ///
    /// # Panics
    ///
    /// A stage joins one pipe; binding it twice panics.
    fn on_subscribe(&self, inlet: Inlet<Self::In>);

    /// Startup hook, run by the dispatch loop before any signal.
    async fn on_start(&self) {}

    /// One value from upstream.
    async fn on_push(&self, value: Self::In);

    /// A failure from upstream. Not terminal.
    async fn on_error(&self, err: FlowError);

    /// Upstream is exhausted. The loop ends after this returns.
    async fn on_complete(&self);
}

/// The user-facing end of a pipeline.
///
/// A receiver sees values and errors in stream order and produces one final
/// output when the stream completes. Demand is the sink stage's business:
/// after every `on_push` and every `on_error` it pulls again, so a receiver
/// only ever observes, it never signals.
#[async_trait]
pub trait Receiver: Send + Sync + 'static {
    type In: Send + 'static;
    type Output: Send + 'static;

    /// Runs once, before any value arrives.
    async fn on_init(&self) {}

    /// Accepts one value.
    async fn on_push(&self, value: Self::In);

    /// Observes one upstream failure. The stream continues afterward; the
    /// default just logs it.
    async fn on_error(&self, err: FlowError) {
        warn!(error = %err, "Stream error reached sink");
    }

    /// Produces the terminal output.
    async fn on_complete(&self) -> Self::Output;
}

/// Adapter from [`Receiver`] to the [`Consumer`] contract. Owns the demand
/// loop and the one-shot result slot.
///
/// Crate-internal: receivers enter a pipeline through [`Graph::to`], which
/// wires the stage and keeps the result channel for the runnable.
///
/// [`Graph::to`]: crate::graph::Graph::to
pub(crate) struct SinkStage<R: Receiver> {
    receiver: R,
    inlet: OnceLock<Inlet<R::In>>,
    result: Mutex<Option<oneshot::Sender<R::Output>>>,
}

impl<R: Receiver> SinkStage<R> {
    /// Wraps `receiver`, returning the stage and the channel its terminal
    /// output will arrive on.
    pub(crate) fn new(receiver: R) -> (Self, oneshot::Receiver<R::Output>) {
        let (result, output) = oneshot::channel();
        let stage = Self {
            receiver,
            inlet: OnceLock::new(),
            result: Mutex::new(Some(result)),
        };
        (stage, output)
    }

    fn inlet(&self) -> &Inlet<R::In> {
        self.inlet.get().expect("sink stage not attached to a pipe")
    }
}

#[async_trait]
impl<R: Receiver> Consumer for SinkStage<R> {
    type In = R::In;

    fn on_subscribe(&self, inlet: Inlet<R::In>) {
        if self.inlet.set(inlet).is_err() {
            panic!("sink stage attached twice");
        }
    }

    async fn on_start(&self) {
        self.receiver.on_init().await;
    }

    async fn on_push(&self, value: R::In) {
        self.receiver.on_push(value).await;
        self.inlet().pull().await;
    }

    async fn on_error(&self, err: FlowError) {
        self.receiver.on_error(err).await;
        // an error costs one value, not the stream; restore demand
        self.inlet().pull().await;
    }

    async fn on_complete(&self) {
        let output = self.receiver.on_complete().await;
        let slot = self.result.lock().expect("result lock poisoned").take();
        match slot {
            Some(result) => {
                if result.send(output).is_err() {
                    trace!("Result discarded, run handle gone");
                }
            }
            None => warn!("Stream completed twice"),
        }
    }
}

/// Runs a closure on every value; the terminal output is `()`.
pub struct ForEach<T, F> {
    f: F,
    _value: PhantomData<fn(T)>,
}

impl<T, F> ForEach<T, F>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _value: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Receiver for ForEach<T, F>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    type In = T;
    type Output = ();

    async fn on_push(&self, value: T) {
        (self.f)(value);
    }

    async fn on_complete(&self) {}
}

/// Collects the stream into a `Vec`, delivered as the terminal output.
pub struct ToSlice<T> {
    values: Mutex<Vec<T>>,
}

impl<T: Send + 'static> ToSlice<T> {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Send + 'static> Default for ToSlice<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Receiver for ToSlice<T> {
    type In = T;
    type Output = Vec<T>;

    async fn on_push(&self, value: T) {
        self.values.lock().expect("values lock poisoned").push(value);
    }

    async fn on_complete(&self) -> Vec<T> {
        std::mem::take(&mut *self.values.lock().expect("values lock poisoned"))
    }
}

/// Discards every value. Useful when only completion matters.
pub struct Ignore<T> {
    _value: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Ignore<T> {
    pub fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<T: Send + 'static> Default for Ignore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Receiver for Ignore<T> {
    type In = T;
    type Output = ();

    async fn on_push(&self, _value: T) {}

    async fn on_complete(&self) {}
}
