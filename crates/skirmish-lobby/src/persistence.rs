//! The data-access interface the coordinator uses for accounts, bans,
//! battle records and statistics.
//!
//! Calls are synchronous and made from inside the coordinator's event
//! loop, so an implementation backed by a remote database stalls every
//! lobby while it waits. [`MemoryPersistence`] is the in-process
//! implementation used by tests and standalone deployments.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use skirmish_protocol::{BattleCode, Faction, LobbyId, UserId};

use crate::{LobbyError, LobbyPreset, default_presets};

/// Lifetime statistics of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    pub battles: u32,
    pub wins: u32,
    pub losses: u32,
    pub kills: u32,
    pub deaths: u32,
}

/// An account as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub name: String,
    /// Empty means "no password set"; any password is accepted.
    pub password: String,
    pub stats: UserStats,
}

/// One participant's entry in a formed battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleEntry {
    pub battle_code: BattleCode,
    pub lobby: LobbyId,
    pub user_id: UserId,
    pub faction: Faction,
}

/// One participant's reported result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattleOutcome {
    pub kills: u16,
    pub deaths: u16,
    pub win: bool,
}

/// Storage collaborator of the coordinator.
///
/// # Example
///
/// ```rust
/// use skirmish_lobby::{MemoryPersistence, Persistence};
/// use skirmish_protocol::UserId;
///
/// let db = MemoryPersistence::new();
/// db.ban(UserId::new("CHEAT1"));
/// assert!(db.is_banned(&UserId::new("CHEAT1")).unwrap());
/// ```
pub trait Persistence: Send + Sync + 'static {
    /// Returns the account, or `None` if it does not exist.
    fn load_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, LobbyError>;

    fn is_banned(&self, user_id: &UserId) -> Result<bool, LobbyError>;

    /// Records that a user was placed in a battle.
    fn record_battle(&self, entry: &BattleEntry) -> Result<(), LobbyError>;

    /// Folds one reported result into the user's statistics.
    fn update_user_stats(&self, user_id: &UserId, outcome: &BattleOutcome) -> Result<(), LobbyError>;

    /// The lobby table. Read once when the coordinator starts.
    fn lobby_presets(&self) -> Vec<LobbyPreset>;
}

// ---------------------------------------------------------------------------
// MemoryPersistence
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    banned: HashSet<UserId>,
    battles: Vec<BattleEntry>,
}

/// [`Persistence`] kept in memory.
///
/// Unknown users are registered on first login unless
/// [`registration_closed`](Self::registration_closed) is set.
pub struct MemoryPersistence {
    tables: Mutex<Tables>,
    presets: Vec<LobbyPreset>,
    open_registration: bool,
}

impl MemoryPersistence {
    /// Open registration and the built-in lobby table.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            presets: default_presets(),
            open_registration: true,
        }
    }

    pub fn with_presets(mut self, presets: Vec<LobbyPreset>) -> Self {
        self.presets = presets;
        self
    }

    /// Refuses users that were not added with [`add_user`](Self::add_user).
    pub fn registration_closed(mut self) -> Self {
        self.open_registration = false;
        self
    }

    pub fn add_user(&self, user_id: UserId, password: &str) {
        let record = UserRecord {
            name: user_id.to_string(),
            user_id: user_id.clone(),
            password: password.to_string(),
            stats: UserStats::default(),
        };
        self.tables.lock().users.insert(user_id, record);
    }

    pub fn ban(&self, user_id: UserId) {
        self.tables.lock().banned.insert(user_id);
    }

    /// Every battle entry recorded so far, oldest first.
    pub fn battles(&self) -> Vec<BattleEntry> {
        self.tables.lock().battles.clone()
    }

    pub fn stats(&self, user_id: &UserId) -> Option<UserStats> {
        self.tables.lock().users.get(user_id).map(|u| u.stats.clone())
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for MemoryPersistence {
    fn load_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, LobbyError> {
        let mut tables = self.tables.lock();
        if let Some(user) = tables.users.get(user_id) {
            return Ok(Some(user.clone()));
        }
        if !self.open_registration {
            return Ok(None);
        }
        let record = UserRecord {
            user_id: user_id.clone(),
            name: user_id.to_string(),
            password: String::new(),
            stats: UserStats::default(),
        };
        tracing::info!(%user_id, "registered new user");
        tables.users.insert(user_id.clone(), record.clone());
        Ok(Some(record))
    }

    fn is_banned(&self, user_id: &UserId) -> Result<bool, LobbyError> {
        Ok(self.tables.lock().banned.contains(user_id))
    }

    fn record_battle(&self, entry: &BattleEntry) -> Result<(), LobbyError> {
        self.tables.lock().battles.push(entry.clone());
        Ok(())
    }

    fn update_user_stats(&self, user_id: &UserId, outcome: &BattleOutcome) -> Result<(), LobbyError> {
        let mut tables = self.tables.lock();
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or_else(|| LobbyError::Persistence(format!("no account for {user_id}")))?;
        let stats = &mut user.stats;
        stats.battles += 1;
        if outcome.win {
            stats.wins += 1;
        } else {
            stats.losses += 1;
        }
        stats.kills += u32::from(outcome.kills);
        stats.deaths += u32::from(outcome.deaths);
        Ok(())
    }

    fn lobby_presets(&self) -> Vec<LobbyPreset> {
        self.presets.clone()
    }
}
