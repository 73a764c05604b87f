use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::FlowError;

/// The message handler dispatched behind an actor.
///
/// A behavior receives payloads of a single value type and answers with the
/// same type. It holds whatever state it needs; the dispatcher shares one
/// instance across its whole worker pool, so state must be interior-mutable
/// and thread-safe.
///
/// # Usage Pattern
///
/// Implement this for stateful handlers, or wrap a closure with
/// [`BehaviorFn`] when no state is needed:
///
/// ```rust
/// use actor_flow::{Behavior, FlowError};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// struct Counter {
///     hits: AtomicU64,
/// }
///
/// #[async_trait]
/// impl Behavior for Counter {
///     type Value = u64;
///
///     async fn handle(&self, msg: u64) -> Result<u64, FlowError> {
///         Ok(msg + self.hits.fetch_add(1, Ordering::SeqCst))
///     }
/// }
/// ```
#[async_trait]
pub trait Behavior: Send + Sync + 'static {
    /// Payload and reply type for every message this behavior accepts.
    type Value: Clone + Send + 'static;

    /// Processes one payload. The result is delivered to the caller that
    /// issued the request and to the actor's mirror stream, if one exists.
    async fn handle(&self, msg: Self::Value) -> Result<Self::Value, FlowError>;
}

/// Adapter turning a plain closure into a [`Behavior`].
pub struct BehaviorFn<T, F> {
    f: F,
    _value: PhantomData<fn(T) -> T>,
}

impl<T, F> BehaviorFn<T, F>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Result<T, FlowError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _value: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Behavior for BehaviorFn<T, F>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Result<T, FlowError> + Send + Sync + 'static,
{
    type Value = T;

    async fn handle(&self, msg: T) -> Result<T, FlowError> {
        (self.f)(msg)
    }
}
