//! Error types for the protocol layer.

/// Errors that can occur while building, reading or serializing messages.
///
/// Truncated *frames* are not errors (the decoder just waits for more
/// bytes); these variants cover bodies and envelopes that are complete but
/// unusable.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A message body does not fit the 16-bit length field.
    #[error("body of {0} bytes exceeds the 65535-byte limit")]
    BodyTooLarge(usize),

    /// A body accessor ran past the end of the body.
    #[error("body truncated: wanted {wanted} bytes, {remaining} left")]
    Truncated { wanted: usize, remaining: usize },

    /// Text could not be represented in the client's encoding.
    #[error("text not representable in the legacy encoding: {0:?}")]
    Unencodable(String),

    /// JSON serialization or deserialization failed.
    #[cfg(feature = "json")]
    #[error("json codec: {0}")]
    Json(serde_json::Error),

    /// Bincode serialization or deserialization failed.
    #[error("bincode codec: {0}")]
    Bincode(bincode::Error),
}
