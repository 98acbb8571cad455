//! Unified error type for the Skirmish server.

use skirmish_handoff::HandoffError;
use skirmish_lobby::LobbyError;
use skirmish_protocol::ProtocolError;
use skirmish_relay::RelayError;
use skirmish_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SkirmishError {
    /// A transport-level error (bind, accept, socket I/O).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A wire-format error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A hand-off registry error.
    #[error(transparent)]
    Handoff(#[from] HandoffError),

    /// A matchmaking error.
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// A relay error.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_protocol::{SessionToken, UserId};

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Transport(_)));
        assert!(skirmish_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::BodyTooLarge(70_000);
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Protocol(_)));
        assert!(skirmish_err.to_string().contains("70000"));
    }

    #[test]
    fn test_from_handoff_error() {
        let err = HandoffError::UnknownToken(SessionToken("abcdef0123".into()));
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Handoff(_)));
    }

    #[test]
    fn test_from_lobby_error() {
        let err = LobbyError::NotInLobby(UserId::new("AB12CD"));
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Lobby(_)));
        assert!(skirmish_err.to_string().contains("AB12CD"));
    }

    #[test]
    fn test_from_relay_error() {
        let err = RelayError::WindowFull(4096);
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Relay(_)));
    }
}
