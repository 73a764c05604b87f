use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::FlowError;
use crate::pipe::{Inlet, Outlet};
use crate::sink::Consumer;
use crate::source::Producer;

/// A per-value transformation sitting between two pipes.
///
/// `on_handle` answers each incoming value with the outgoing one, a skip
/// ([`FlowError::Eof`], which re-pulls upstream instead of emitting), or an
/// error forwarded downstream in the value's place.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    /// Runs once, before any value arrives.
    async fn on_init(&self) {}

    /// Transforms one value.
    async fn on_handle(&self, value: Self::In) -> Result<Self::Out, FlowError>;

    /// Teardown hook, run after the stream completes through this stage.
    async fn on_close(&self) {}
}

/// Adapter from [`Task`] to the pipe-facing contracts.
///
/// A flow stage is consumer on its upstream pipe and producer on its
/// downstream pipe. Demand passes through untouched: every downstream pull
/// becomes one upstream pull, so the stage adds no buffering of its own.
pub struct FlowStage<K: Task> {
    task: K,
    inlet: OnceLock<Inlet<K::In>>,
    outlet: OnceLock<Outlet<K::Out>>,
}

impl<K: Task> FlowStage<K> {
    pub fn new(task: K) -> Self {
        Self {
            task,
            inlet: OnceLock::new(),
            outlet: OnceLock::new(),
        }
    }

    fn inlet(&self) -> &Inlet<K::In> {
        self.inlet.get().expect("flow stage not attached upstream")
    }

    fn outlet(&self) -> &Outlet<K::Out> {
        self.outlet.get().expect("flow stage not attached downstream")
    }
}

#[async_trait]
impl<K: Task> Consumer for FlowStage<K> {
    type In = K::In;

    fn on_subscribe(&self, inlet: Inlet<K::In>) {
        if self.inlet.set(inlet).is_err() {
            panic!("flow stage attached upstream twice");
        }
    }

    async fn on_push(&self, value: K::In) {
        match self.task.on_handle(value).await {
            Ok(out) => self.outlet().push(out).await,
            Err(FlowError::Eof) => {
                trace!("Value skipped, re-pulling");
                self.inlet().pull().await;
            }
            Err(err) => self.outlet().error(err).await,
        }
    }

    async fn on_error(&self, err: FlowError) {
        self.outlet().error(err).await;
    }

    async fn on_complete(&self) {
        self.outlet().complete().await;
        self.task.on_close().await;
    }
}

#[async_trait]
impl<K: Task> Producer for FlowStage<K> {
    type Out = K::Out;

    fn subscribe(&self, outlet: Outlet<K::Out>) {
        if self.outlet.set(outlet).is_err() {
            panic!("flow stage attached downstream twice");
        }
    }

    async fn on_start(&self) {
        self.task.on_init().await;
    }

    async fn on_pull(&self) {
        self.inlet().pull().await;
    }

    async fn on_cancel(&self) {
        self.inlet().cancel().await;
    }
}

/// Stateless one-to-one transformation.
pub struct Map<In, Out, F> {
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> Map<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    pub fn new(f: F) -> FlowStage<Self> {
        FlowStage::new(Self {
            f,
            _types: PhantomData,
        })
    }
}

#[async_trait]
impl<In, Out, F> Task for Map<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    type In = In;
    type Out = Out;

    async fn on_handle(&self, value: In) -> Result<Out, FlowError> {
        Ok((self.f)(value))
    }
}

/// Keeps values matching the predicate, skips the rest.
pub struct Filter<T, P> {
    predicate: P,
    _value: PhantomData<fn(T) -> T>,
}

impl<T, P> Filter<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    pub fn new(predicate: P) -> FlowStage<Self> {
        FlowStage::new(Self {
            predicate,
            _value: PhantomData,
        })
    }
}

#[async_trait]
impl<T, P> Task for Filter<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    type In = T;
    type Out = T;

    async fn on_handle(&self, value: T) -> Result<T, FlowError> {
        if (self.predicate)(&value) {
            Ok(value)
        } else {
            Err(FlowError::Eof)
        }
    }
}

/// Adapter turning a fallible closure into a [`Task`].
pub struct TaskFn<In, Out, F> {
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> TaskFn<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Result<Out, FlowError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> FlowStage<Self> {
        FlowStage::new(Self {
            f,
            _types: PhantomData,
        })
    }
}

#[async_trait]
impl<In, Out, F> Task for TaskFn<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Result<Out, FlowError> + Send + Sync + 'static,
{
    type In = In;
    type Out = Out;

    async fn on_handle(&self, value: In) -> Result<Out, FlowError> {
        (self.f)(value)
    }
}

/// Passes `count` values through, then cancels upstream on the next unit
/// of demand.
///
/// Not a [`Task`]: it needs to intercept demand itself. With `count` of
/// zero the very first pull cancels and the stream completes empty.
pub struct Take<T> {
    passed: AtomicU64,
    count: u64,
    inlet: OnceLock<Inlet<T>>,
    outlet: OnceLock<Outlet<T>>,
}

impl<T: Send + 'static> Take<T> {
    pub fn new(count: u64) -> Self {
        Self {
            passed: AtomicU64::new(0),
            count,
            inlet: OnceLock::new(),
            outlet: OnceLock::new(),
        }
    }

    fn inlet(&self) -> &Inlet<T> {
        self.inlet.get().expect("take stage not attached upstream")
    }

    fn outlet(&self) -> &Outlet<T> {
        self.outlet.get().expect("take stage not attached downstream")
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer for Take<T> {
    type In = T;

    fn on_subscribe(&self, inlet: Inlet<T>) {
        if self.inlet.set(inlet).is_err() {
            panic!("take stage attached upstream twice");
        }
    }

    async fn on_push(&self, value: T) {
        self.passed.fetch_add(1, Ordering::SeqCst);
        self.outlet().push(value).await;
    }

    async fn on_error(&self, err: FlowError) {
        self.outlet().error(err).await;
    }

    async fn on_complete(&self) {
        self.outlet().complete().await;
    }
}

#[async_trait]
impl<T: Send + 'static> Producer for Take<T> {
    type Out = T;

    fn subscribe(&self, outlet: Outlet<T>) {
        if self.outlet.set(outlet).is_err() {
            panic!("take stage attached downstream twice");
        }
    }

    async fn on_pull(&self) {
        if self.passed.load(Ordering::SeqCst) < self.count {
            self.inlet().pull().await;
        } else {
            debug!(count = self.count, "Take limit reached, canceling upstream");
            self.inlet().cancel().await;
        }
    }

    async fn on_cancel(&self) {
        self.inlet().cancel().await;
    }
}
