use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::command::{Call, CallResult, Command};
use crate::error::FlowError;

/// Cloneable handle to one actor: an unbounded FIFO mailbox plus the task
/// draining it.
///
/// Every handle produced by [`DispatcherHandle::actor_ref`] owns its own
/// mailbox and its own drain task; cloning an `ActorRef` shares that mailbox
/// rather than creating a new one. The drain task relays commands to the
/// dispatcher one at a time and waits for each result before taking the next
/// command, so delivery order through a single ref is the order of `send`
/// and `request` calls on it.
///
/// # Architecture Note
///
/// The ref never runs handler code itself. It forwards every payload to the
/// dispatcher as a fresh [`Call`] and intercepts the result, which lets it
/// feed the mirror stream and reply to the original caller from one place.
/// Backpressure is therefore a dispatcher concern; the mailbox accepts any
/// number of commands without blocking the sender.
///
/// [`DispatcherHandle::actor_ref`]: crate::dispatcher::DispatcherHandle::actor_ref
pub struct ActorRef<T> {
    mailbox: mpsc::UnboundedSender<Command<T>>,
    shared: Arc<RefShared<T>>,
}

impl<T> Clone for ActorRef<T> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// State shared between every clone of a ref and its drain task.
struct RefShared<T> {
    close: Mutex<Option<oneshot::Sender<()>>>,
    mirror: OnceLock<mpsc::UnboundedSender<CallResult<T>>>,
}

impl<T: Clone + Send + 'static> ActorRef<T> {
    /// Creates the mailbox and spawns its drain task. Must run inside a
    /// Tokio runtime.
    pub(crate) fn spawn(dispatcher: mpsc::UnboundedSender<Command<T>>) -> Self {
        let (mailbox, commands) = mpsc::unbounded_channel();
        let (close, closed) = oneshot::channel();
        let shared = Arc::new(RefShared {
            close: Mutex::new(Some(close)),
            mirror: OnceLock::new(),
        });
        let mailbox_loop = MailboxLoop {
            commands,
            closed,
            dispatcher,
            shared: shared.clone(),
        };
        tokio::spawn(mailbox_loop.run());
        Self { mailbox, shared }
    }

    /// Fire-and-forget dispatch. The payload is handled like any other call;
    /// the result goes only to the mirror stream, if one exists.
    ///
    /// # Panics
    ///
    /// Panics once the mailbox has shut down after [`close`]. A send racing
    /// the shutdown may instead be dropped with the rest of the queue.
    ///
    /// [`close`]: ActorRef::close
    pub fn send(&self, payload: T) {
        let (call, _ignored) = Call::new(payload);
        self.deliver(Command::Call(call));
    }

    /// Dispatches a payload and waits for the handler's result.
    pub async fn request(&self, payload: T) -> Result<T, FlowError> {
        let response = self.request_chan(payload);
        response.await.map_err(|_| FlowError::ReplyDropped)?
    }

    /// Like [`request`], but gives up once `deadline` elapses.
    ///
    /// The deadline does not retract the message: the handler still runs,
    /// and its late result is discarded along with the abandoned receiver.
    ///
    /// [`request`]: ActorRef::request
    pub async fn request_timeout(&self, payload: T, deadline: Duration) -> Result<T, FlowError> {
        let response = self.request_chan(payload);
        match tokio::time::timeout(deadline, response).await {
            Ok(reply) => reply.map_err(|_| FlowError::ReplyDropped)?,
            Err(_) => Err(FlowError::DeadlineExceeded),
        }
    }

    /// Dispatches a payload and hands back the channel its result will
    /// arrive on, for callers that want to park the wait somewhere else.
    ///
    /// # Panics
    ///
    /// Panics once the mailbox has shut down after [`close`].
    ///
    /// [`close`]: ActorRef::close
    pub fn request_chan(&self, payload: T) -> oneshot::Receiver<CallResult<T>> {
        let (call, response) = Call::new(payload);
        self.deliver(Command::Call(call));
        response
    }

    /// Raw handle on the mailbox, accepting any [`Command`].
    ///
    /// Sends on the raw handle after [`close`] fail with a send error rather
    /// than a panic; callers driving the mailbox directly handle that
    /// themselves.
    ///
    /// [`close`]: ActorRef::close
    pub fn mailbox(&self) -> mpsc::UnboundedSender<Command<T>> {
        self.mailbox.clone()
    }

    /// Opens the mirror stream: an unbounded channel carrying a copy of
    /// every call result this actor produces, in dispatch order.
    ///
    /// # Panics
    ///
    /// The mirror can be taken once per actor. A second call panics.
    pub fn mirror(&self) -> mpsc::UnboundedReceiver<CallResult<T>> {
        let (mirror, results) = mpsc::unbounded_channel();
        if self.shared.mirror.set(mirror).is_err() {
            panic!("actor mirror stream already taken");
        }
        results
    }

    /// Shuts the mailbox down. Commands already queued are dropped, not
    /// drained; the dispatcher behind the actor is untouched.
    ///
    /// # Panics
    ///
    /// Close may happen once per actor, across all clones of the ref. A
    /// second call panics; so do `send` and `request` once the mailbox has
    /// shut down.
    pub fn close(&self) {
        let mut slot = self.shared.close.lock().expect("close lock poisoned");
        match slot.take() {
            Some(signal) => {
                let _ = signal.send(());
            }
            None => panic!("actor closed twice"),
        }
    }

    fn deliver(&self, cmd: Command<T>) {
        if self.mailbox.send(cmd).is_err() {
            panic!("command sent to a closed actor");
        }
    }
}

/// The drain task behind one [`ActorRef`].
///
/// Runs a three-state lifecycle: idle at the select, dispatching exactly one
/// command, closed once the close signal fires or every ref clone is gone.
struct MailboxLoop<T> {
    commands: mpsc::UnboundedReceiver<Command<T>>,
    closed: oneshot::Receiver<()>,
    dispatcher: mpsc::UnboundedSender<Command<T>>,
    shared: Arc<RefShared<T>>,
}

impl<T: Clone + Send + 'static> MailboxLoop<T> {
    async fn run(mut self) {
        let payload_type = std::any::type_name::<T>().split("::").last().unwrap_or("Unknown");
        info!(payload_type, "Actor started");
        loop {
            tokio::select! {
                _ = &mut self.closed => {
                    debug!(payload_type, "Close signal received");
                    break;
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.dispatch(cmd).await,
                        // every ref clone dropped
                        None => break,
                    }
                }
            }
        }
        info!(payload_type, "Actor closed");
    }

    async fn dispatch(&self, cmd: Command<T>) {
        let name = cmd.name();
        debug!(cmd = name, "Dispatching");
        match cmd {
            Command::Stop => {
                if self.dispatcher.send(Command::Stop).is_err() {
                    trace!("Dispatcher already stopped");
                }
            }
            Command::Call(call) => {
                let (payload, reply) = call.into_parts();
                let result = self.relay(payload).await;
                if let Some(mirror) = self.shared.mirror.get() {
                    let _ = mirror.send(result.clone());
                }
                let _ = reply.send(result);
            }
            Command::Push(payload) => {
                // a bare payload becomes a call nobody awaits
                let result = self.relay(payload).await;
                if let Some(mirror) = self.shared.mirror.get() {
                    let _ = mirror.send(result);
                }
            }
            _ => {
                trace!(cmd = name, "No mailbox semantics, dropped");
            }
        }
    }

    /// Forwards one payload to the dispatcher and waits for its result.
    /// Waiting here is what serializes dispatch per ref.
    async fn relay(&self, payload: T) -> CallResult<T> {
        let (call, response) = Call::new(payload);
        if self.dispatcher.send(Command::Call(call)).is_err() {
            return Err(FlowError::Stopped);
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Err(FlowError::ReplyDropped),
        }
    }
}
