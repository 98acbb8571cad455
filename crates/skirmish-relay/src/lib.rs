//! Battle relay for Skirmish.
//!
//! Participants of a formed battle connect here with the session token the
//! lobby handed them. The [`RelayHub`] checks the token against the
//! hand-off registry and seats the connection in its battle's
//! [`RelayRoom`], which forwards each participant's opaque gameplay bytes
//! to every other participant.
//!
//! Two transports feed the same rooms:
//!
//! - [`StreamRelay`]: TCP, chunked, ordered by the stream itself
//! - [`DatagramRelay`]: UDP, with a [`ReliableChannel`] and an
//!   [`OrderFilter`] per peer for gap-free in-order delivery
//!
//! ```text
//! stream peer ──┐                       ┌──▶ stream peer
//!               ├──▶ RelayRoom (slots) ─┤
//! datagram peer ┘                       └──▶ datagram peer
//! ```

mod datagram;
mod error;
mod hub;
mod reliable;
mod room;
mod stream;

pub use datagram::{DatagramConfig, DatagramRelay, PeerState};
pub use error::RelayError;
pub use hub::{Membership, RelayHub};
pub use reliable::{Batch, OrderFilter, ReliableChannel, WINDOW_CAPACITY};
pub use room::{RelayMessage, RelayPeer, RelayRoom};
pub use stream::StreamRelay;
