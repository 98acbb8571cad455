//! Error types for the hand-off registry.

use skirmish_protocol::SessionToken;

/// Errors returned by a [`HandoffStore`](crate::HandoffStore).
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// No record was ever published for this token, or it was removed.
    #[error("unknown session token {0}")]
    UnknownToken(SessionToken),

    /// The record exists but is older than the configured maximum age.
    #[error("session token {0} has expired")]
    Expired(SessionToken),

    /// A live record already uses this token.
    #[error("session token {0} is already registered")]
    DuplicateToken(SessionToken),
}
