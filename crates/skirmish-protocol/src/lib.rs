//! Wire protocol for Skirmish.
//!
//! This crate defines what travels on the wire, for both tiers:
//!
//! - **Lobby messages** ([`Message`], [`MessageFraming`]) with the fixed
//!   12-byte header, plus typed body access ([`BodyReader`],
//!   [`BodyWriter`]) including legacy text and obfuscated strings.
//! - **Relay types**: stream chunks ([`Chunk`], [`ChunkFraming`]) and the
//!   datagram envelope ([`RelayPacket`]).
//! - **Codecs** ([`Codec`], [`BincodeCodec`], [`JsonCodec`]) for the
//!   datagram envelope.
//! - **Identities** shared by lobby and relay ([`UserId`], [`BattleCode`],
//!   [`SessionToken`], [`Faction`]).
//!
//! It knows nothing about connections, rooms or battles.
//!
//! ```text
//! Transport (bytes) → Protocol (Message / Chunk / RelayPacket) → Lobby / Relay
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod body;
mod codec;
pub mod command;
mod error;
mod message;
mod relay;
mod seq;
mod text;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use body::{BodyReader, BodyWriter};
pub use codec::{BincodeCodec, Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{
    Category, Direction, HEADER_SIZE, MAX_BODY_SIZE, Message, MessageFraming, STATUS_ERROR,
    STATUS_SUCCESS,
};
pub use relay::{
    BattleMessage, Chunk, ChunkFraming, FIN_SENTINEL, MAX_CHUNK_PAYLOAD, PacketBody, RelayPacket,
    STREAM_GREETING, encode_chunks,
};
pub use seq::{SequenceGenerator, next_seq};
pub use text::{decode_text, encode_text};
pub use types::{BattleCode, Faction, LobbyId, SessionToken, UserId};
