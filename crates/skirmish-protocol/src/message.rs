//! The lobby message: a fixed 12-byte header followed by an opaque body.
//!
//! ```text
//!  0      1      2      4       6      8            12
//! ┌──────┬──────┬──────┬───────┬──────┬────────────┬──────────────┐
//! │ dir  │ cat  │ cmd  │ size  │ seq  │  status    │ body (size)  │
//! │ u8   │ u8   │ u16  │ u16   │ u16  │  u32       │              │
//! └──────┴──────┴──────┴───────┴──────┴────────────┴──────────────┘
//! ```
//!
//! All header fields are big-endian. The layout must match the legacy
//! client bit for bit.

use bytes::{BufMut, Bytes, BytesMut};
use skirmish_transport::{Framing, TransportError};

use crate::seq::next_seq;
use crate::{BodyReader, BodyWriter, ProtocolError};

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 12;

/// Largest body the 16-bit size field can describe.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// Generic success status.
pub const STATUS_SUCCESS: u32 = 0x00FF_FFFF;

/// Generic failure status.
pub const STATUS_ERROR: u32 = 0xFFFF_FFFF;

/// Which way a message travels.
///
/// Unknown bytes are kept as `Other` so a decoded header always encodes
/// back to the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ServerToClient,
    ClientToServer,
    Other(u8),
}

impl Direction {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x18 => Self::ServerToClient,
            0x81 => Self::ClientToServer,
            other => Self::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::ServerToClient => 0x18,
            Self::ClientToServer => 0x81,
            Self::Other(b) => b,
        }
    }
}

/// What kind of exchange a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Expects an `Answer` with the same command and sequence number.
    Question,
    Answer,
    /// Unsolicited, no reply expected.
    Notice,
    /// Out-of-protocol extensions.
    Custom,
    Other(u8),
}

impl Category {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::Question,
            0x02 => Self::Answer,
            0x10 => Self::Notice,
            0xFF => Self::Custom,
            other => Self::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Question => 0x01,
            Self::Answer => 0x02,
            Self::Notice => 0x10,
            Self::Custom => 0xFF,
            Self::Other(b) => b,
        }
    }
}

/// A decoded lobby message.
///
/// The body size is not stored: it is always the length of `body`, and
/// [`Message::encode`] recomputes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub direction: Direction,
    pub category: Category,
    pub command: u16,
    pub seq: u16,
    pub status: u32,
    pub body: Bytes,
}

impl Message {
    /// A server-originated notice with a fresh sequence number.
    pub fn notice(command: u16) -> Self {
        Self {
            direction: Direction::ServerToClient,
            category: Category::Notice,
            command,
            seq: next_seq(),
            status: STATUS_SUCCESS,
            body: Bytes::new(),
        }
    }

    /// A server-originated question with a fresh sequence number.
    pub fn question(command: u16) -> Self {
        Self {
            category: Category::Question,
            ..Self::notice(command)
        }
    }

    /// The answer to this message: same command and sequence number,
    /// success status, empty body.
    pub fn answer(&self) -> Self {
        Self {
            direction: Direction::ServerToClient,
            category: Category::Answer,
            command: self.command,
            seq: self.seq,
            status: STATUS_SUCCESS,
            body: Bytes::new(),
        }
    }

    /// Replaces the body with what `writer` produced.
    pub fn with_body(mut self, writer: BodyWriter) -> Self {
        self.body = writer.finish();
        self
    }

    /// Replaces the status code.
    pub fn with_status(mut self, status: u32) -> Self {
        self.status = status;
        self
    }

    /// Returns `true` if the sender is waiting for an answer.
    pub fn is_question(&self) -> bool {
        self.category == Category::Question
    }

    /// A reader over the body, keyed with this message's sequence number.
    pub fn reader(&self) -> BodyReader<'_> {
        BodyReader::new(&self.body, self.seq)
    }

    /// Tries to decode one message from the front of `buf`.
    ///
    /// Returns the number of bytes consumed and the message, or `(0, None)`
    /// when the header or the body is not complete yet. Never fails: the
    /// caller keeps the bytes and retries once more arrive.
    pub fn decode(buf: &[u8]) -> (usize, Option<Message>) {
        if buf.len() < HEADER_SIZE {
            return (0, None);
        }
        let body_size = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let total = HEADER_SIZE + body_size;
        if buf.len() < total {
            return (0, None);
        }

        let msg = Message {
            direction: Direction::from_byte(buf[0]),
            category: Category::from_byte(buf[1]),
            command: u16::from_be_bytes([buf[2], buf[3]]),
            seq: u16::from_be_bytes([buf[6], buf[7]]),
            status: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            body: Bytes::copy_from_slice(&buf[HEADER_SIZE..total]),
        };
        (total, Some(msg))
    }

    /// Appends the wire form of this message to `dst`.
    ///
    /// # Errors
    /// [`ProtocolError::BodyTooLarge`] if the body exceeds 65535 bytes.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge(self.body.len()));
        }
        dst.reserve(HEADER_SIZE + self.body.len());
        dst.put_u8(self.direction.to_byte());
        dst.put_u8(self.category.to_byte());
        dst.put_u16(self.command);
        dst.put_u16(self.body.len() as u16);
        dst.put_u16(self.seq);
        dst.put_u32(self.status);
        dst.put_slice(&self.body);
        Ok(())
    }

    /// Returns the wire form of this message.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        self.encode_into(&mut dst)?;
        Ok(dst.freeze())
    }
}

/// [`Framing`] that slices a lobby byte stream into [`Message`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFraming;

impl Framing for MessageFraming {
    type Frame = Message;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, TransportError> {
        let (consumed, msg) = Message::decode(&buf[..]);
        if consumed > 0 {
            let _ = buf.split_to(consumed);
        }
        Ok(msg)
    }
}
