//! Formed battles, tracked until they complete or time out.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use skirmish_protocol::{BattleCode, Faction, LobbyId, SessionToken, UserId};
use tokio::time::Instant;

/// One seat in a battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub faction: Faction,
    pub token: SessionToken,
}

#[derive(Debug, Clone)]
pub struct Battle {
    pub code: BattleCode,
    pub lobby: LobbyId,
    pub participants: Vec<Participant>,
    pub relay: SocketAddr,
    pub rule: Vec<u8>,
    pub created: Instant,
    reported: HashSet<UserId>,
}

impl Battle {
    pub fn new(
        code: BattleCode,
        lobby: LobbyId,
        participants: Vec<Participant>,
        relay: SocketAddr,
        rule: Vec<u8>,
    ) -> Self {
        Self {
            code,
            lobby,
            participants,
            relay,
            rule,
            created: Instant::now(),
            reported: HashSet::new(),
        }
    }

    /// Participants of one faction, in seat order.
    pub fn roster(&self, faction: Faction) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(move |p| p.faction == faction)
    }

    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user_id == user)
    }

    /// Marks `user`'s result as received. Returns `false` for a repeat
    /// report or a user who is not in the battle.
    pub fn mark_reported(&mut self, user: &UserId) -> bool {
        self.participant(user).is_some() && self.reported.insert(user.clone())
    }

    /// `true` once every participant has reported.
    pub fn is_complete(&self) -> bool {
        self.reported.len() == self.participants.len()
    }

    pub fn is_expired(&self, now: Instant, lifetime: Duration) -> bool {
        now.saturating_duration_since(self.created) >= lifetime
    }
}

/// A battle code for "now". Codes of battles formed in the same
/// millisecond collide.
pub fn battle_code_now() -> BattleCode {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    BattleCode::from_millis(millis)
}
