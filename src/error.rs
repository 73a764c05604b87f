use std::sync::Arc;

/// Errors produced by actors, pipeline stages, and the signaling fabric
/// between them.
///
/// Cloneable so a single failure can be delivered to every observer of a
/// call: the caller awaiting the reply, the mirror stream, and any stage
/// forwarding it downstream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    /// The stream (or a scripted behavior backing one) has no more values.
    ///
    /// Inside a flow stage this is the skip marker: the stage drops the
    /// current value and pulls again instead of forwarding.
    #[error("end of stream")]
    Eof,

    /// A behavior or task handler failed while processing a value.
    #[error("handler error: {0}")]
    Handler(Arc<dyn std::error::Error + Send + Sync>),

    /// A request was abandoned because its deadline expired first.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The dispatcher behind this actor has been stopped.
    #[error("dispatcher stopped")]
    Stopped,

    /// The reply channel was dropped before a result was produced.
    #[error("reply channel dropped")]
    ReplyDropped,

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl FlowError {
    /// Wraps an arbitrary handler failure.
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler(Arc::new(err))
    }

    /// True for the end-of-stream marker.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}
