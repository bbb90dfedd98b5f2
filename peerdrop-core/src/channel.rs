//! Channel seam: an already-open, ordered, message-oriented link to the peer.
//! Connection setup lives with the host; the core only sends on it and asks whether it is open.

use crate::protocol::Message;

/// Adapter over an established peer link. `send` hands the message off without waiting for delivery.
pub trait Channel: Send + Sync {
    /// The link's own view of whether it can still carry messages.
    fn is_open(&self) -> bool;

    fn send(&self, msg: &Message) -> Result<(), ChannelError>;

    /// Close the link. Calling it on a closed channel is a no-op.
    fn close(&self);
}

/// Error handing a message to the channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}
