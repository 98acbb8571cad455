//! Battle hand-off registry for Skirmish.
//!
//! When the lobby forms a battle it publishes one [`HandoffRecord`] per
//! participant, keyed by a fresh session token. The participant then dials
//! the relay and presents that token; the relay looks the record up to
//! learn which battle (and which user) the new connection belongs to.
//!
//! ```text
//! Lobby (coordinator) ──put──▶ HandoffStore ◀──get── Relay (join)
//!                                   │
//!                         sweeper: drop records older than max_age
//! ```
//!
//! Both tiers touch the store from different tasks, so implementations
//! are internally locked. Storage is behind the [`HandoffStore`] trait;
//! [`MemoryHandoffStore`] keeps everything in process.

mod error;
mod record;
mod store;

pub use error::HandoffError;
pub use record::{HandoffConfig, HandoffRecord, generate_token};
pub use store::{HandoffStore, MemoryHandoffStore, spawn_sweeper};
