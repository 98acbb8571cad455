//! Codec trait and implementations for serializing relay envelopes.
//!
//! The datagram relay does not care how a [`RelayPacket`](crate::RelayPacket)
//! becomes bytes; it is generic over a [`Codec`]. [`BincodeCodec`] is the
//! compact production format, [`JsonCodec`] is readable in logs and tests.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Converts values to bytes and back.
///
/// `Send + Sync + 'static` because a codec lives inside long-running
/// relay tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns the codec's error variant of [`ProtocolError`] if the value
    /// cannot be represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns the codec's error variant of [`ProtocolError`] if the bytes
    /// are malformed, incomplete, or of the wrong shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use skirmish_protocol::{Codec, JsonCodec, PacketBody, RelayPacket};
///
/// let codec = JsonCodec;
/// let packet = RelayPacket {
///     session_id: "abc".into(),
///     seq: 0,
///     ack: 0,
///     body: PacketBody::Ping { timestamp: 5000 },
/// };
///
/// let bytes = codec.encode(&packet).unwrap();
/// let decoded: RelayPacket = codec.decode(&bytes).unwrap();
/// assert_eq!(packet, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Json)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Json)
    }
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses bincode's default (little-endian, fixed-int)
/// configuration. Used on the datagram wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(value).map_err(ProtocolError::Bincode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::Bincode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BattleMessage, PacketBody, RelayPacket};

    fn battle_packet() -> RelayPacket {
        RelayPacket {
            session_id: "0123456789abcdef".into(),
            seq: 7,
            ack: 3,
            body: PacketBody::Battle(vec![BattleMessage {
                user_id: "AB12CD".into(),
                seq: 7,
                body: vec![0xDE, 0xAD],
            }]),
        }
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_codec_decodes_what_it_encodes() {
        let codec = JsonCodec;
        let bytes = codec.encode(&battle_packet()).unwrap();
        let decoded: RelayPacket = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, battle_packet());
    }

    #[test]
    fn test_bincode_codec_decodes_what_it_encodes() {
        let codec = BincodeCodec;
        let bytes = codec.encode(&battle_packet()).unwrap();
        let decoded: RelayPacket = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, battle_packet());
    }

    #[test]
    fn test_bincode_is_more_compact_than_json() {
        let bin = BincodeCodec.encode(&battle_packet()).unwrap();
        let json = serde_json::to_vec(&battle_packet()).unwrap();
        assert!(bin.len() < json.len());
    }

    #[test]
    fn test_bincode_decode_garbage_is_error() {
        let result: Result<RelayPacket, _> = BincodeCodec.decode(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(ProtocolError::Bincode(_))));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_decode_wrong_shape_is_error() {
        let result: Result<RelayPacket, _> = JsonCodec.decode(br#"{"seq": "nope"}"#);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }
}
