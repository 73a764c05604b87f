use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::FlowError;
use crate::flow::{Filter, FlowStage, Map, Take};
use crate::pipe::{Inlet, Pipe};
use crate::sink::{Consumer, Receiver, SinkStage};
use crate::source::{Producer, Source, SourceStage};

/// A pipeline under construction: a producer chain with its tail pipe still
/// waiting for a consumer.
///
/// Graphs are built left to right. Each [`via`] seals the previous link by
/// spawning its dispatch loop and opens a new one; [`to`] seals the last
/// link and yields a [`Runnable`]. Nothing moves until the runnable is run:
/// the loops sit idle because no demand has entered the chain.
///
/// ```rust
/// use actor_flow::{sequence, ToSlice};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = sequence(0, 1)
///         .map(|n| n * 3)
///         .take(4)
///         .to(ToSlice::new())
///         .run()
///         .await;
///
///     assert_eq!(handle.result().await.unwrap(), vec![0, 3, 6, 9]);
/// }
/// ```
///
/// [`via`]: Graph::via
/// [`to`]: Graph::to
pub struct Graph<T: Send + 'static> {
    pipe: Pipe<T>,
}

impl<T: Send + 'static> Graph<T> {
    /// Starts a graph from any producer stage.
    pub fn from_producer(producer: impl Producer<Out = T>) -> Self {
        Self {
            pipe: Pipe::attach(Arc::new(producer)),
        }
    }

    /// Starts a graph from a [`Source`], wrapping it in its stage.
    pub fn from_source<S>(source: S) -> Self
    where
        S: Source<Out = T>,
    {
        Self::from_producer(SourceStage::new(source))
    }

    /// Appends a flow stage, sealing the link behind it.
    pub fn via<F>(self, flow: F) -> Graph<F::Out>
    where
        F: Consumer<In = T> + Producer,
    {
        let flow = Arc::new(flow);
        let next = Pipe::attach(flow.clone() as Arc<dyn Producer<Out = F::Out>>);
        self.pipe.run(flow);
        Graph { pipe: next }
    }

    /// Appends a stateless transformation.
    pub fn map<U, F>(self, f: F) -> Graph<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.via(Map::new(f))
    }

    /// Appends a predicate filter.
    pub fn filter<P>(self, predicate: P) -> Graph<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.via(Filter::new(predicate))
    }

    /// Truncates the stream after `count` values.
    pub fn take(self, count: u64) -> Graph<T> {
        self.via(Take::new(count))
    }

    /// Terminates the graph with a receiver, sealing the final link.
    pub fn to<R>(self, receiver: R) -> Runnable<T, R::Output>
    where
        R: Receiver<In = T>,
    {
        let (sink, output) = SinkStage::new(receiver);
        let teardown = Teardown::new(self.pipe.inlet());
        self.pipe.run(Arc::new(sink));
        Runnable { teardown, output }
    }
}

/// A fully assembled pipeline that has not seen demand yet.
///
/// `run` consumes the value, so a pipeline runs at most once; rerunning a
/// stream is re-building it. Dropping an unrun pipeline tears it down the
/// same way [`close`] does.
///
/// [`close`]: Runnable::close
pub struct Runnable<T: Send + 'static, R> {
    teardown: Teardown<T>,
    output: oneshot::Receiver<R>,
}

impl<T: Send + 'static, R> Runnable<T, R> {
    /// Feeds the first unit of demand into the tail of the chain and hands
    /// back the running pipeline's handle.
    pub async fn run(self) -> RunHandle<T, R> {
        debug!("Pipeline starting");
        self.teardown.inlet.pull().await;
        RunHandle {
            teardown: self.teardown,
            output: self.output,
        }
    }

    /// Tears the pipeline down without running it.
    pub async fn close(self) {
        if self.teardown.begin() {
            self.teardown.inlet.cancel().await;
        }
    }
}

/// Handle on a running pipeline.
///
/// Dropping the handle performs the same latched cancel as [`close`], so an
/// abandoned pipeline drains to Complete instead of computing forever.
///
/// [`close`]: RunHandle::close
pub struct RunHandle<T: Send + 'static, R> {
    teardown: Teardown<T>,
    output: oneshot::Receiver<R>,
}

impl<T: Send + 'static, R> RunHandle<T, R> {
    /// Waits for the terminal output.
    ///
    /// Fails with [`FlowError::ReplyDropped`] only if the sink was torn
    /// down without completing, which protocol-honoring stages never do.
    pub async fn result(self) -> Result<R, FlowError> {
        self.output.await.map_err(|_| FlowError::ReplyDropped)
    }

    /// Cancels the stream at the sink's upstream edge. Idempotent, and a
    /// no-op on a pipeline that already completed.
    ///
    /// Values the sink accepted before the cancel stay in the terminal
    /// output; a push racing the cancel is dropped. The stream still ends
    /// with Complete, and [`result`] yields what was collected.
    ///
    /// [`result`]: RunHandle::result
    pub async fn close(&self) {
        if self.teardown.begin() {
            debug!("Pipeline close requested");
            self.teardown.inlet.cancel().await;
        }
    }
}

/// Cancel latch shared by [`Runnable`] and [`RunHandle`]. The first close
/// wins; if the holder is dropped without closing, the drop itself sends
/// the cancel, so an abandoned pipeline still drains and its loop tasks
/// exit.
struct Teardown<T: Send + 'static> {
    inlet: Inlet<T>,
    closed: AtomicBool,
}

impl<T: Send + 'static> Teardown<T> {
    fn new(inlet: Inlet<T>) -> Self {
        Self {
            inlet,
            closed: AtomicBool::new(false),
        }
    }

    /// True exactly once. Latched so repeated closes cannot crowd the
    /// signal queue.
    fn begin(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

impl<T: Send + 'static> Drop for Teardown<T> {
    fn drop(&mut self) {
        if self.begin() {
            self.inlet.try_cancel();
        }
    }
}
