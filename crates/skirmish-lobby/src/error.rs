//! Error types for the lobby layer.

use skirmish_handoff::HandoffError;
use skirmish_protocol::{BattleCode, LobbyId, ProtocolError, UserId};

/// Errors raised by command handlers and collaborators of the coordinator.
///
/// A handler error never tears the coordinator down: the offending
/// question is answered with `STATUS_ERROR` and processing continues.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The command needs a logged-in peer.
    #[error("not logged in")]
    NotLoggedIn,

    /// The peer is already logged in.
    #[error("already logged in as {0}")]
    AlreadyLoggedIn(UserId),

    /// Login refused by the persistence layer.
    #[error("login refused for {0}: {1}")]
    LoginRefused(UserId, String),

    /// No lobby with this id is configured.
    #[error("lobby {0} not found")]
    UnknownLobby(LobbyId),

    /// The user must be in a lobby for this command.
    #[error("user {0} is not in a lobby")]
    NotInLobby(UserId),

    /// The user is already in a lobby.
    #[error("user {0} is already in lobby {1}")]
    AlreadyInLobby(UserId, LobbyId),

    /// The room index is out of range for the lobby.
    #[error("room {index} not found in lobby {lobby}")]
    RoomNotFound { lobby: LobbyId, index: usize },

    /// The room has no free slot.
    #[error("room {0} is full")]
    RoomFull(usize),

    /// The user is already in a room.
    #[error("user {0} is already in room {1}")]
    AlreadyInRoom(UserId, usize),

    /// The user is not in the room.
    #[error("user {0} is not in a room")]
    NotInRoom(UserId),

    /// Only the room owner may do this.
    #[error("user {0} does not own room {1}")]
    NotRoomOwner(UserId, usize),

    /// The room or lobby is in a state that does not allow this command.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The battle is unknown or already finished.
    #[error("battle {0} not found")]
    UnknownBattle(BattleCode),

    /// The body could not be read or written.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Publishing a hand-off record failed.
    #[error(transparent)]
    Handoff(#[from] HandoffError),

    /// The storage backend failed.
    #[error("persistence: {0}")]
    Persistence(String),

    /// The coordinator task is gone.
    #[error("coordinator is unavailable")]
    Unavailable,
}
