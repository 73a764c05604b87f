use tokio::sync::oneshot;

use crate::error::FlowError;

/// Result of dispatching one payload through a behavior.
pub type CallResult<T> = Result<T, FlowError>;

/// The closed protocol spoken by every mailbox, dispatcher, and pipe in the
/// crate.
///
/// A command either carries work (`Call`, `Push`), moves demand (`Pull`), or
/// signals a lifecycle edge (`Stop`, `Cancel`, `Error`, `Complete`). `None`
/// and `Done` are inert markers kept for user code; no component reacts to
/// them.
///
/// Each handler consumes only the variants it understands and drops the rest
/// with a trace line, so a stray signal can never wedge a loop.
#[derive(Debug)]
pub enum Command<T> {
    /// Stop the dispatcher behind an actor. In-flight calls still resolve.
    Stop,
    /// A payload plus the slot its result must be written to.
    Call(Call<T>),
    /// A bare payload. Mailboxes wrap it into a fresh `Call` whose result
    /// nobody awaits; pipes deliver it to the consumer side.
    Push(T),
    /// One unit of demand, flowing upstream.
    Pull,
    /// Terminal upstream signal: the downstream side wants no more values.
    Cancel,
    /// A stage failed on one value. Not terminal; the stream continues.
    Error(FlowError),
    /// Terminal downstream signal: the upstream side is exhausted.
    Complete,
    /// Inert marker.
    None,
    /// Inert marker.
    Done,
}

impl<T> Command<T> {
    /// Variant name, for log lines that must not require `T: Debug`.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Stop => "Stop",
            Command::Call(_) => "Call",
            Command::Push(_) => "Push",
            Command::Pull => "Pull",
            Command::Cancel => "Cancel",
            Command::Error(_) => "Error",
            Command::Complete => "Complete",
            Command::None => "None",
            Command::Done => "Done",
        }
    }
}

/// A payload paired with the one-shot slot for its result.
///
/// The reply sender is owned, not borrowed: fulfilling a call consumes it,
/// so a second fulfillment is unrepresentable and an abandoned call shows up
/// at the caller as [`FlowError::ReplyDropped`].
#[derive(Debug)]
pub struct Call<T> {
    payload: T,
    reply: oneshot::Sender<CallResult<T>>,
}

impl<T> Call<T> {
    /// Creates a call and the receiver its result will arrive on.
    pub fn new(payload: T) -> (Self, oneshot::Receiver<CallResult<T>>) {
        let (reply, response) = oneshot::channel();
        (Self { payload, reply }, response)
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Splits the call for handlers that produce the result elsewhere.
    pub fn into_parts(self) -> (T, oneshot::Sender<CallResult<T>>) {
        (self.payload, self.reply)
    }

    /// Fulfills the call. A reply to a caller that already went away is
    /// silently discarded.
    pub fn reply(self, result: CallResult<T>) {
        let _ = self.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reply_reaches_the_receiver() {
        let (call, response) = Call::new(7u64);
        assert_eq!(*call.payload(), 7);
        call.reply(Ok(14));
        assert_eq!(response.await.unwrap().unwrap(), 14);
    }

    #[tokio::test]
    async fn dropped_call_surfaces_as_closed_channel() {
        let (call, response) = Call::new(1u64);
        drop(call);
        assert!(response.await.is_err());
    }

    #[test]
    fn names_cover_every_variant() {
        assert_eq!(Command::<u64>::Pull.name(), "Pull");
        assert_eq!(Command::<u64>::Push(3).name(), "Push");
        assert_eq!(Command::<u64>::Error(FlowError::Eof).name(), "Error");
    }
}
