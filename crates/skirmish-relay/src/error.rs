//! Error types for the relay layer.

use skirmish_handoff::HandoffError;

/// Errors that can occur while relaying a battle.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The session token was refused by the hand-off registry.
    #[error(transparent)]
    Handoff(#[from] HandoffError),

    /// The peer stopped acknowledging and its send window filled up.
    #[error("send window full ({0} messages unacknowledged)")]
    WindowFull(usize),

    /// Binding the datagram socket failed.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Sending or receiving a datagram failed.
    #[error("datagram i/o failed: {0}")]
    Io(#[source] std::io::Error),
}
