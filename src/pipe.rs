use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::command::Command;
use crate::error::FlowError;
use crate::sink::Consumer;
use crate::source::Producer;

/// Depth of each signal queue between two stages.
///
/// One slot for the signal in flight plus one for the terminal that may race
/// in behind it. The demand protocol itself keeps traffic to one live signal
/// per direction, so a stage never blocks sending into its own pipe.
pub(crate) const SIGNAL_QUEUE_CAPACITY: usize = 2;

/// Downstream edge of a pipe, held by the producer side. Pushes values,
/// errors, and the completion signal toward the consumer.
///
/// Sends on a finished pipe are dropped quietly; teardown is not an error.
pub struct Outlet<T> {
    sender: mpsc::Sender<Command<T>>,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send + 'static> Outlet<T> {
    pub async fn push(&self, value: T) {
        if self.sender.send(Command::Push(value)).await.is_err() {
            trace!("Push after completion, dropped");
        }
    }

    pub async fn error(&self, err: FlowError) {
        if self.sender.send(Command::Error(err)).await.is_err() {
            trace!("Error after completion, dropped");
        }
    }

    pub async fn complete(&self) {
        if self.sender.send(Command::Complete).await.is_err() {
            trace!("Complete after completion, dropped");
        }
    }
}

/// Upstream edge of a pipe, held by the consumer side. Carries demand and
/// cancellation toward the producer.
pub struct Inlet<T> {
    sender: mpsc::Sender<Command<T>>,
}

impl<T> Clone for Inlet<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send + 'static> Inlet<T> {
    pub async fn pull(&self) {
        if self.sender.send(Command::Pull).await.is_err() {
            trace!("Pull after completion, dropped");
        }
    }

    pub async fn cancel(&self) {
        if self.sender.send(Command::Cancel).await.is_err() {
            trace!("Cancel after completion, dropped");
        }
    }

    /// Best-effort cancel for teardown paths that cannot await. A first
    /// cancel always finds queue room; the send only misses once the pipe
    /// is already gone.
    pub(crate) fn try_cancel(&self) {
        if self.sender.try_send(Command::Cancel).is_err() {
            trace!("Cancel after completion, dropped");
        }
    }
}

/// One link between a producer and the consumer attached later.
///
/// A pipe is born holding its producer, with the producer's outlet already
/// bound. [`Pipe::run`] binds the consumer and hands both queues to the
/// dispatch loop. All binding is synchronous and happens before the loop
/// spawns, so no callback can ever observe a half-wired stage.
pub(crate) struct Pipe<T: Send + 'static> {
    producer: Arc<dyn Producer<Out = T>>,
    inbound: mpsc::Receiver<Command<T>>,
    outbound: mpsc::Receiver<Command<T>>,
    outbound_sender: mpsc::Sender<Command<T>>,
}

impl<T: Send + 'static> Pipe<T> {
    /// Creates the pipe and binds `producer`'s outlet to its inbound queue.
    pub(crate) fn attach(producer: Arc<dyn Producer<Out = T>>) -> Self {
        let (inbound_sender, inbound) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (outbound_sender, outbound) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        producer.subscribe(Outlet {
            sender: inbound_sender,
        });
        Self {
            producer,
            inbound,
            outbound,
            outbound_sender,
        }
    }

    /// Handle for signaling this pipe's producer from downstream.
    pub(crate) fn inlet(&self) -> Inlet<T> {
        Inlet {
            sender: self.outbound_sender.clone(),
        }
    }

    /// Binds `consumer`'s inlet, then spawns the dispatch loop.
    pub(crate) fn run(self, consumer: Arc<dyn Consumer<In = T>>) {
        consumer.on_subscribe(self.inlet());
        let pipe_loop = PipeLoop {
            producer: self.producer,
            consumer,
            inbound: self.inbound,
            outbound: self.outbound,
            canceled: false,
        };
        tokio::spawn(pipe_loop.run());
    }
}

/// Sequential dispatcher for one pipe.
///
/// Both queues feed a single loop and every callback is awaited before the
/// next signal is taken. Per-queue order is therefore delivery order, and a
/// consumer is never re-entered while one of its callbacks still runs.
struct PipeLoop<T: Send + 'static> {
    producer: Arc<dyn Producer<Out = T>>,
    consumer: Arc<dyn Consumer<In = T>>,
    inbound: mpsc::Receiver<Command<T>>,
    outbound: mpsc::Receiver<Command<T>>,
    canceled: bool,
}

impl<T: Send + 'static> PipeLoop<T> {
    async fn run(mut self) {
        self.producer.on_start().await;
        self.consumer.on_start().await;
        trace!("Pipe running");
        loop {
            tokio::select! {
                cmd = self.inbound.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.dispatch_inbound(cmd).await.is_break() {
                        break;
                    }
                }
                cmd = self.outbound.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.dispatch_outbound(cmd).await;
                }
            }
        }
        trace!("Pipe completed");
    }

    /// Producer-to-consumer signals. `Complete` ends the loop.
    async fn dispatch_inbound(&mut self, cmd: Command<T>) -> ControlFlow<()> {
        match cmd {
            Command::Push(value) => {
                if self.canceled {
                    trace!("Push after cancel, dropped");
                } else {
                    self.consumer.on_push(value).await;
                }
            }
            Command::Error(err) => {
                self.consumer.on_error(err).await;
            }
            Command::Complete => {
                self.consumer.on_complete().await;
                return ControlFlow::Break(());
            }
            other => {
                trace!(cmd = other.name(), "Unexpected inbound signal, dropped");
            }
        }
        ControlFlow::Continue(())
    }

    /// Consumer-to-producer signals. `Cancel` is terminal for demand but
    /// leaves the loop running until the producer confirms with `Complete`.
    async fn dispatch_outbound(&mut self, cmd: Command<T>) {
        match cmd {
            Command::Pull => {
                if self.canceled {
                    trace!("Pull after cancel, dropped");
                } else {
                    self.producer.on_pull().await;
                }
            }
            Command::Cancel => {
                if self.canceled {
                    trace!("Cancel repeated, dropped");
                } else {
                    self.canceled = true;
                    self.producer.on_cancel().await;
                }
            }
            other => {
                trace!(cmd = other.name(), "Unexpected outbound signal, dropped");
            }
        }
    }
}
