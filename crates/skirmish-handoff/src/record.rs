//! The hand-off record and its configuration.

use std::time::Duration;

use rand::Rng;
use skirmish_protocol::{BattleCode, Faction, SessionToken, UserId};
use tokio::time::Instant;

/// How long records live and how often they are swept.
#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// Records older than this are treated as absent and swept.
    ///
    /// Default: 1 hour, the same as a battle's lifetime.
    pub max_age: Duration,

    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// What the relay needs to admit one participant into one battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRecord {
    pub battle_code: BattleCode,
    pub user_id: UserId,
    pub faction: Faction,
    pub token: SessionToken,
    pub created: Instant,
}

impl HandoffRecord {
    /// A record for `user_id` with a freshly generated token.
    pub fn issue(battle_code: BattleCode, user_id: UserId, faction: Faction) -> Self {
        Self {
            battle_code,
            user_id,
            faction,
            token: generate_token(),
            created: Instant::now(),
        }
    }

    /// Age of the record on the Tokio clock.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

/// Generates a random 32-character hex token (128 bits of entropy).
pub fn generate_token() -> SessionToken {
    let bytes: [u8; 16] = rand::rng().random();
    SessionToken(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
