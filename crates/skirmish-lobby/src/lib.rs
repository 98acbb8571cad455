//! Matchmaking for Skirmish: the coordinator and the lobby / room /
//! entry-queue state machine that forms battles.
//!
//! # Key types
//!
//! - [`Coordinator`]: sole owner of peers, lobbies, rooms and battles;
//!   driven by [`Event`]s on one task
//! - [`CoordinatorHandle`]: how other tasks reach it (connection events,
//!   ticks, exclusive access)
//! - [`Lobby`], [`Room`]: the matchmaking state machine
//! - [`Persistence`], [`RelayAllocator`]: collaborators behind traits
//!
//! ```text
//! lobby sockets ─▶ ConnectionActor ─▶ CoordinatorSink ─▶ Event queue ─▶ Coordinator
//!                                                                         │
//!                                  HandoffStore ◀── battle formed ────────┘
//! ```

mod allocator;
mod battle;
mod config;
mod coordinator;
mod error;
mod handle;
mod handlers;
mod lobby;
mod persistence;
mod room;

pub use allocator::{Allocation, RelayAllocator, StaticRelay};
pub use battle::{Battle, Participant};
pub use config::{CoordinatorConfig, LobbyPreset, default_presets};
pub use coordinator::{Coordinator, CoordinatorStatus, Event, LobbyStatus};
pub use error::LobbyError;
pub use handle::{CoordinatorHandle, CoordinatorSink, spawn_coordinator};
pub use lobby::Lobby;
pub use persistence::{
    BattleEntry, BattleOutcome, MemoryPersistence, Persistence, UserRecord, UserStats,
};
pub use room::{Room, RoomState};
