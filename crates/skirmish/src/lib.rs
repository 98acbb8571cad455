//! # Skirmish
//!
//! Matchmaking and battle-relay server for a legacy console game.
//!
//! Clients log into the lobby tier, pick a lobby and a faction, and queue
//! for a battle either on their own or as a room. Once both factions can
//! field a full side, the coordinator forms a battle, hands every
//! participant a session token and the relay address, and the relay tier
//! forwards gameplay bytes among the participants over TCP or UDP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skirmish::prelude::*;
//!
//! # async fn demo() -> Result<(), SkirmishError> {
//! let server = SkirmishServer::builder()
//!     .lobby_bind("0.0.0.0:8200")
//!     .relay_bind("0.0.0.0:8210")
//!     .build()
//!     .await?;
//! server.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

mod error;
mod server;

pub use error::SkirmishError;
pub use server::{RunningServer, SkirmishServer, SkirmishServerBuilder};

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::{RunningServer, SkirmishError, SkirmishServer, SkirmishServerBuilder};

    pub use skirmish_handoff::{HandoffConfig, HandoffStore, MemoryHandoffStore};
    pub use skirmish_lobby::{
        Allocation, CoordinatorConfig, CoordinatorHandle, MemoryPersistence, Persistence,
        RelayAllocator, StaticRelay,
    };
    pub use skirmish_protocol::{BattleCode, Faction, LobbyId, SessionToken, UserId};
    pub use skirmish_relay::DatagramConfig;
    pub use skirmish_transport::ConnectionConfig;
    pub use tokio_util::sync::CancellationToken;
}
