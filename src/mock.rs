//! Scripted doubles for exercising actors and pipelines in tests.
//!
//! | Double          | Stands in for | Scripting                              |
//! |-----------------|---------------|----------------------------------------|
//! | [`MockBehavior`]| a `Behavior`  | queued replies, served in order        |
//! | [`ProbeTask`]   | a `Task`      | none; records what flows through       |
//!
//! A `MockBehavior` ignores incoming payloads and answers from its script;
//! once the script runs dry it answers [`FlowError::Eof`], which makes it a
//! natural backing for `ActorSource` tests. A `ProbeTask` is an identity
//! stage whose handle exposes everything it saw.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::behavior::Behavior;
use crate::error::FlowError;
use crate::flow::{FlowStage, Task};

/// Behavior answering from a fixed script.
pub struct MockBehavior<T> {
    script: Mutex<VecDeque<Result<T, FlowError>>>,
}

impl<T: Clone + Send + 'static> MockBehavior<T> {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a successful reply.
    pub fn reply_ok(self, value: T) -> Self {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(value));
        self
    }

    /// Queues a failure reply.
    pub fn reply_err(self, err: FlowError) -> Self {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(err));
        self
    }
}

impl<T: Clone + Send + 'static> Default for MockBehavior<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Behavior for MockBehavior<T> {
    type Value = T;

    async fn handle(&self, _msg: T) -> Result<T, FlowError> {
        self.script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or(Err(FlowError::Eof))
    }
}

/// Identity task recording every value it forwards.
pub struct ProbeTask<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> ProbeTask<T> {
    /// Builds the stage and the handle its recordings are read through.
    pub fn new() -> (FlowStage<Self>, ProbeHandle<T>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stage = FlowStage::new(Self { seen: seen.clone() });
        (stage, ProbeHandle { seen })
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Task for ProbeTask<T> {
    type In = T;
    type Out = T;

    async fn on_handle(&self, value: T) -> Result<T, FlowError> {
        self.seen
            .lock()
            .expect("probe lock poisoned")
            .push(value.clone());
        Ok(value)
    }
}

/// Read side of a [`ProbeTask`].
pub struct ProbeHandle<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> ProbeHandle<T> {
    /// Snapshot of everything the probe has forwarded so far.
    pub fn values(&self) -> Vec<T> {
        self.seen.lock().expect("probe lock poisoned").clone()
    }
}
