//! Wire types of the battle relay.
//!
//! Two transports carry gameplay traffic:
//!
//! - **stream**: a TCP byte stream cut into chunks, each prefixed by a
//!   single length byte that counts itself. The server speaks first with
//!   [`STREAM_GREETING`]; the client's first chunk is its session token;
//!   [`FIN_SENTINEL`] ends the session.
//! - **datagram**: one [`RelayPacket`] per UDP datagram, serialized with a
//!   [`Codec`](crate::Codec).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use skirmish_transport::{Framing, TransportError};

/// Sent to every stream peer right after accept.
pub const STREAM_GREETING: [u8; 14] = [
    0x0e, 0x61, 0x00, 0x22, 0x10, 0x31, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
];

/// A complete chunk that means "this session is over".
pub const FIN_SENTINEL: [u8; 4] = [0x04, 0xF0, 0x00, 0x00];

/// Largest payload one chunk can carry (the length byte counts itself).
pub const MAX_CHUNK_PAYLOAD: usize = u8::MAX as usize - 1;

/// One unit of the stream relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Payload without its length byte.
    Data(Bytes),
    Fin,
}

/// [`Framing`] for the stream relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkFraming;

impl Framing for ChunkFraming {
    type Frame = Chunk;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Chunk>, TransportError> {
        let Some(&len) = buf.first() else {
            return Ok(None);
        };
        if len == 0 {
            return Err(TransportError::MalformedFrame(
                "zero-length relay chunk".into(),
            ));
        }
        let len = len as usize;
        if buf.len() < len {
            return Ok(None);
        }

        let mut chunk = buf.split_to(len);
        if chunk[..] == FIN_SENTINEL {
            return Ok(Some(Chunk::Fin));
        }
        chunk.advance(1);
        Ok(Some(Chunk::Data(chunk.freeze())))
    }
}

/// Appends `payload` to `dst` as one or more length-prefixed chunks.
///
/// An empty payload produces nothing.
pub fn encode_chunks(payload: &[u8], dst: &mut BytesMut) {
    let pieces = payload.len().div_ceil(MAX_CHUNK_PAYLOAD);
    dst.reserve(payload.len() + pieces);
    for piece in payload.chunks(MAX_CHUNK_PAYLOAD) {
        dst.put_u8((piece.len() + 1) as u8);
        dst.put_slice(piece);
    }
}

// ---------------------------------------------------------------------------
// Datagram envelope
// ---------------------------------------------------------------------------

/// One UDP datagram of the relay.
///
/// `seq` and `ack` belong to the reliable layer: `seq` is the highest
/// message sequence carried (or last assigned) by the sender and `ack` the
/// highest sequence it has consumed from the receiver. Control packets
/// still carry both so every datagram refreshes the peer's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPacket {
    pub session_id: String,
    pub seq: u32,
    pub ack: u32,
    pub body: PacketBody,
}

/// Per-kind content of a [`RelayPacket`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketBody {
    /// Answered immediately with a `Pong` carrying the same timestamp.
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    /// Join request from the client (session id is the token); the server
    /// answers with the same kind and `accepted` set.
    HelloServer { accepted: bool },
    Battle(Vec<BattleMessage>),
    /// Explicit close.
    Fin { reason: String },
}

/// A gameplay message inside a `Battle` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleMessage {
    /// Sender's user id; stamped by the server on forwarded messages.
    pub user_id: String,
    pub seq: u32,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Result<Vec<Chunk>, TransportError> {
        let mut buf = BytesMut::from(bytes);
        let mut framing = ChunkFraming;
        let mut out = Vec::new();
        while let Some(chunk) = framing.decode(&mut buf)? {
            out.push(chunk);
        }
        Ok(out)
    }

    #[test]
    fn test_decode_two_chunks_in_one_buffer() {
        let chunks = decode_all(&[3, b'a', b'b', 2, b'c']).unwrap();
        assert_eq!(
            chunks,
            vec![
                Chunk::Data(Bytes::from_static(b"ab")),
                Chunk::Data(Bytes::from_static(b"c")),
            ]
        );
    }

    #[test]
    fn test_decode_partial_chunk_waits() {
        let mut buf = BytesMut::from(&[5, 1, 2][..]);
        assert_eq!(ChunkFraming.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_fin_sentinel() {
        let mut bytes = vec![2, b'x'];
        bytes.extend_from_slice(&FIN_SENTINEL);
        let chunks = decode_all(&bytes).unwrap();
        assert_eq!(chunks[1], Chunk::Fin);
    }

    #[test]
    fn test_decode_zero_length_is_malformed() {
        assert!(matches!(
            decode_all(&[0, 1, 2]),
            Err(TransportError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_encode_chunks_splits_long_payloads() {
        let payload: Vec<u8> = (0..600u16).map(|i| i as u8).collect();
        let mut dst = BytesMut::new();
        encode_chunks(&payload, &mut dst);

        assert_eq!(dst.len(), 600 + 3);
        assert_eq!(dst[0], 255);

        let joined: Vec<u8> = decode_all(&dst)
            .unwrap()
            .into_iter()
            .flat_map(|c| match c {
                Chunk::Data(b) => b.to_vec(),
                Chunk::Fin => panic!("unexpected fin"),
            })
            .collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn test_encode_chunks_empty_payload_writes_nothing() {
        let mut dst = BytesMut::new();
        encode_chunks(&[], &mut dst);
        assert!(dst.is_empty());
    }

    #[test]
    fn test_greeting_declares_its_own_length() {
        assert_eq!(STREAM_GREETING[0] as usize, STREAM_GREETING.len());
    }
}
