use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace, warn};

use crate::actor::ActorRef;
use crate::behavior::Behavior;
use crate::command::{Call, Command};
use crate::error::FlowError;

/// Tuning knobs for one dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of worker tasks running the behavior. The job queue holds the
    /// same number of calls, so at most `2 * pool_size` calls are admitted
    /// past the mailbox at once.
    pub pool_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { pool_size: 1 }
    }
}

impl DispatchConfig {
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self { pool_size }
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.pool_size == 0 {
            return Err(FlowError::Validation(
                "pool size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The server side of an actor: a control loop feeding a bounded worker
/// pool that runs one [`Behavior`].
///
/// # Usage Pattern
///
/// Construction follows the split-ownership shape used throughout this
/// crate: `new` returns the dispatcher and a cloneable handle, the caller
/// spawns `run` and keeps the handle.
///
/// ```rust
/// use actor_flow::{BehaviorDispatcher, BehaviorFn, DispatchConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let behavior = BehaviorFn::new(|n: u64| Ok(n * 2));
///     let (dispatcher, handle) =
///         BehaviorDispatcher::new(behavior, DispatchConfig::default()).unwrap();
///     tokio::spawn(dispatcher.run());
///
///     let actor = handle.actor_ref();
///     assert_eq!(actor.request(21).await.unwrap(), 42);
///
///     handle.stop();
/// }
/// ```
///
/// # Architecture Note
///
/// The control channel is unbounded, the job queue is not. Workers pull
/// jobs through a shared receiver, so a full queue makes the control loop
/// wait and queues further calls in the mailboxes behind it. With the
/// default pool of one worker, dispatch is strictly serial.
pub struct BehaviorDispatcher<B: Behavior> {
    control: mpsc::UnboundedReceiver<Command<B::Value>>,
    behavior: Arc<B>,
    pool_size: usize,
}

impl<B: Behavior> BehaviorDispatcher<B> {
    /// Validates `config` and creates the dispatcher with its handle.
    pub fn new(
        behavior: B,
        config: DispatchConfig,
    ) -> Result<(Self, DispatcherHandle<B::Value>), FlowError> {
        config.validate()?;
        let (sender, control) = mpsc::unbounded_channel();
        let dispatcher = Self {
            control,
            behavior: Arc::new(behavior),
            pool_size: config.pool_size,
        };
        Ok((dispatcher, DispatcherHandle { sender }))
    }

    /// Runs the control loop until a `Stop` arrives or every handle and ref
    /// is gone, then drains the job queue before returning.
    pub async fn run(mut self) {
        let behavior_type = std::any::type_name::<B>().split("::").last().unwrap_or("Behavior");
        info!(behavior_type, pool_size = self.pool_size, "Dispatcher started");

        let (jobs, job_feed) = mpsc::channel(self.pool_size);
        let job_feed = Arc::new(Mutex::new(job_feed));
        let mut workers = Vec::with_capacity(self.pool_size);
        for worker_id in 0..self.pool_size {
            workers.push(tokio::spawn(worker(
                worker_id,
                self.behavior.clone(),
                job_feed.clone(),
            )));
        }

        let mut stopping = false;
        while let Some(cmd) = self.control.recv().await {
            match cmd {
                Command::Stop => {
                    debug!(behavior_type, "Stop received, draining");
                    // closing the control channel bounds the drain: queued
                    // commands still come out, new sends fail with Stopped
                    self.control.close();
                    stopping = true;
                }
                Command::Call(call) => {
                    if stopping {
                        call.reply(Err(FlowError::Stopped));
                    } else if let Err(rejected) = jobs.send(call).await {
                        warn!(behavior_type, "Worker pool gone, rejecting call");
                        rejected.0.reply(Err(FlowError::Stopped));
                    }
                }
                other => {
                    trace!(behavior_type, cmd = other.name(), "No dispatch semantics, dropped");
                }
            }
        }

        drop(jobs);
        for handle in workers {
            let _ = handle.await;
        }
        info!(behavior_type, "Dispatcher stopped");
    }
}

/// One worker task. Pickup is serialized through the shared receiver;
/// handling runs outside the lock, so workers overlap on the handler
/// itself.
async fn worker<B: Behavior>(
    worker_id: usize,
    behavior: Arc<B>,
    job_feed: Arc<Mutex<mpsc::Receiver<Call<B::Value>>>>,
) {
    trace!(worker_id, "Worker started");
    loop {
        let job = { job_feed.lock().await.recv().await };
        let Some(call) = job else { break };
        let (payload, reply) = call.into_parts();
        let result = behavior.handle(payload).await;
        match &result {
            Ok(_) => trace!(worker_id, "Handled"),
            Err(err) => debug!(worker_id, error = %err, "Handler returned error"),
        }
        let _ = reply.send(result);
    }
    trace!(worker_id, "Worker exited");
}

/// Cloneable client handle for one dispatcher.
pub struct DispatcherHandle<T> {
    sender: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Clone for DispatcherHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> DispatcherHandle<T> {
    /// Creates a new actor backed by this dispatcher. Every call spawns a
    /// fresh mailbox; refs made here run independently but share the worker
    /// pool. Must run inside a Tokio runtime.
    pub fn actor_ref(&self) -> ActorRef<T> {
        ActorRef::spawn(self.sender.clone())
    }

    /// Asks the dispatcher to stop. Returns immediately; calls already
    /// admitted to the job queue still resolve, later ones fail with
    /// [`FlowError::Stopped`].
    pub fn stop(&self) {
        if self.sender.send(Command::Stop).is_err() {
            trace!("Dispatcher already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_one_worker() {
        assert_eq!(DispatchConfig::default().pool_size, 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = DispatchConfig::with_pool_size(0).validate().unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }
}
