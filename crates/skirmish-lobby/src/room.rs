//! Lobby rooms: fixed-capacity groups of one faction that go to battle
//! together.
//!
//! Rooms are preallocated per lobby and never destroyed; a room whose last
//! member leaves is [`reset`](Room::reset) in place and its index stays
//! its identity.

use std::fmt;

use serde::Serialize;
use skirmish_protocol::{Faction, UserId};
use tokio::time::Instant;

use crate::LobbyError;

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// Fill state of a room, derived from its member count.
///
/// ```text
/// Empty ──open──▶ Recruiting (1..cap-1) ◀──▶ Full (cap)
///   ▲                   │
///   └──last exit/reset──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoomState {
    Empty,
    Recruiting,
    Full,
}

impl RoomState {
    fn for_count(count: usize, capacity: usize) -> Self {
        if count == 0 {
            Self::Empty
        } else if count >= capacity {
            Self::Full
        } else {
            Self::Recruiting
        }
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Recruiting => write!(f, "Recruiting"),
            Self::Full => write!(f, "Full"),
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Room {
    index: usize,
    faction: Faction,
    capacity: usize,
    state: RoomState,
    owner: Option<UserId>,
    title: String,
    deadline: Option<Instant>,
    users: Vec<UserId>,
    ready: bool,
}

impl Room {
    pub fn new(index: usize, faction: Faction, capacity: usize) -> Self {
        Self {
            index,
            faction,
            capacity: capacity.max(1),
            state: RoomState::Empty,
            owner: None,
            title: String::new(),
            deadline: None,
            users: Vec::new(),
            ready: false,
        }
    }

    /// Opens an empty room with `owner` as its first member.
    ///
    /// # Errors
    /// [`LobbyError::InvalidState`] unless the room is empty.
    pub fn open(&mut self, owner: UserId, title: String, deadline: Instant) -> Result<(), LobbyError> {
        if self.state != RoomState::Empty {
            return Err(LobbyError::InvalidState(format!(
                "room {} is {}, cannot open",
                self.index, self.state
            )));
        }
        self.users.push(owner.clone());
        self.owner = Some(owner);
        self.title = title;
        self.deadline = Some(deadline);
        self.recompute();
        tracing::debug!(room = self.index, title = %self.title, "room opened");
        Ok(())
    }

    /// Adds a member to an open room.
    pub fn join(&mut self, user: UserId) -> Result<(), LobbyError> {
        match self.state {
            RoomState::Empty => {
                return Err(LobbyError::InvalidState(format!(
                    "room {} is not open",
                    self.index
                )));
            }
            RoomState::Full => return Err(LobbyError::RoomFull(self.index)),
            RoomState::Recruiting => {}
        }
        if self.users.contains(&user) {
            return Err(LobbyError::AlreadyInRoom(user, self.index));
        }
        self.users.push(user);
        self.recompute();
        Ok(())
    }

    /// Removes a member. Ownership passes to the longest-standing remaining
    /// member; the last exit resets the room. Returns `true` if the room
    /// is now empty.
    pub fn leave(&mut self, user: &UserId) -> Result<bool, LobbyError> {
        let Some(pos) = self.users.iter().position(|u| u == user) else {
            return Err(LobbyError::NotInRoom(user.clone()));
        };
        self.users.remove(pos);

        if self.users.is_empty() {
            self.reset();
            return Ok(true);
        }
        if self.owner.as_ref() == Some(user) {
            self.owner = self.users.first().cloned();
        }
        self.recompute();
        Ok(false)
    }

    /// Returns the room to its pristine empty state.
    pub fn reset(&mut self) {
        self.state = RoomState::Empty;
        self.owner = None;
        self.title.clear();
        self.deadline = None;
        self.users.clear();
        self.ready = false;
    }

    /// Sets the ready flag. Only the owner may.
    pub fn set_ready(&mut self, user: &UserId, ready: bool) -> Result<(), LobbyError> {
        if self.owner.as_ref() != Some(user) {
            return Err(LobbyError::NotRoomOwner(user.clone(), self.index));
        }
        self.ready = ready;
        Ok(())
    }

    fn recompute(&mut self) {
        self.state = RoomState::for_count(self.users.len(), self.capacity);
    }

    /// `true` once the open deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn faction(&self) -> Faction {
        self.faction
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}
