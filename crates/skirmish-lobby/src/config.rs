//! Coordinator configuration and lobby presets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skirmish_protocol::{Faction, LobbyId};

// ---------------------------------------------------------------------------
// CoordinatorConfig
// ---------------------------------------------------------------------------

/// Timers of the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Period of the internal tick. Zero disables the timer task; ticks
    /// can then only be injected with
    /// [`CoordinatorHandle::tick`](crate::CoordinatorHandle::tick).
    pub tick_period: Duration,

    /// Peers silent for longer than this are disconnected.
    pub idle_timeout: Duration,

    /// Battles are forgotten this long after formation.
    pub battle_lifetime: Duration,

    /// An open room that has not gone to battle within this long is
    /// closed and its members notified.
    pub room_lifetime: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(120),
            battle_lifetime: Duration::from_secs(3600),
            room_lifetime: Duration::from_secs(1800),
        }
    }
}

// ---------------------------------------------------------------------------
// LobbyPreset
// ---------------------------------------------------------------------------

/// Static description of one lobby, normally supplied by the persistence
/// layer's preset table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPreset {
    pub id: LobbyId,
    pub name: String,
    /// Handed to the relay allocator to pick a relay close to players.
    pub region: String,
    /// Players needed per faction, indexed by [`Faction::index`]. `[2, 2]`
    /// is the standard match; smaller values are practice variants.
    pub quorum: [usize; 2],
    pub rooms_per_faction: usize,
    pub room_capacity: usize,
    /// Opaque game rule blob copied into every battle of this lobby.
    #[serde(default)]
    pub rule: Vec<u8>,
}

impl LobbyPreset {
    /// Largest number of entries taken per faction when a battle forms.
    pub const MAX_PER_FACTION: usize = 2;

    /// The entry threshold of `faction`, capped at
    /// [`MAX_PER_FACTION`](Self::MAX_PER_FACTION).
    pub fn threshold(&self, faction: Faction) -> usize {
        self.quorum[faction.index()].min(Self::MAX_PER_FACTION)
    }
}

/// The built-in lobby table: one standard lobby and the practice variants.
pub fn default_presets() -> Vec<LobbyPreset> {
    let preset = |id: u16, name: &str, quorum: [usize; 2], capacity: usize| LobbyPreset {
        id: LobbyId(id),
        name: name.to_string(),
        region: "default".to_string(),
        quorum,
        rooms_per_faction: 8,
        room_capacity: capacity,
        rule: Vec::new(),
    };
    vec![
        preset(1, "2 vs 2", [2, 2], 2),
        preset(2, "1 vs 1", [1, 1], 1),
        preset(3, "2 vs CPU", [2, 0], 2),
        preset(4, "1 vs CPU", [1, 0], 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_config_default() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.tick_period, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.battle_lifetime, Duration::from_secs(3600));
    }

    #[test]
    fn test_default_presets_have_unique_ids() {
        let presets = default_presets();
        let mut ids: Vec<_> = presets.iter().map(|p| p.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), presets.len());
        assert_eq!(presets[0].quorum, [2, 2]);
    }

    #[test]
    fn test_threshold_is_capped() {
        let mut preset = default_presets().remove(0);
        preset.quorum = [5, 0];
        assert_eq!(preset.threshold(Faction::A), 2);
        assert_eq!(preset.threshold(Faction::B), 0);
    }

    #[test]
    fn test_preset_deserializes_without_rule() {
        let json = r#"{"id":7,"name":"x","region":"eu","quorum":[1,1],
                       "rooms_per_faction":2,"room_capacity":1}"#;
        let preset: LobbyPreset = serde_json::from_str(json).unwrap();
        assert_eq!(preset.id, LobbyId(7));
        assert!(preset.rule.is_empty());
    }
}
