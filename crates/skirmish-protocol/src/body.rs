//! Typed access to message bodies.
//!
//! Lobby bodies are flat sequences of fixed-width integers, length-prefixed
//! byte strings and text. Multi-byte integers are big-endian except for a
//! handful of legacy fields, which use the `_le` variants.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtocolError;
use crate::text::{decode_text, deobfuscate, encode_text, obfuscate};

/// Cursor over a received body.
///
/// Every accessor fails with [`ProtocolError::Truncated`] instead of
/// panicking when the body is shorter than the field.
#[derive(Debug)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
    seq: u16,
}

impl<'a> BodyReader<'a> {
    /// `seq` is the sequence number of the enclosing message; it keys
    /// obfuscated fields.
    pub fn new(buf: &'a [u8], seq: u16) -> Self {
        Self { buf, pos: 0, seq }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.array().map(u16::from_be_bytes)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        self.array().map(u32::from_le_bytes)
    }

    /// A `u16`-length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    /// A `u16`-length-prefixed legacy text field, decoded to UTF-8.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        self.read_bytes().map(decode_text)
    }

    /// An obfuscated text field: `[len:u16][cipher][checksum:u16]`.
    ///
    /// A checksum mismatch yields an empty string; only a short body is an
    /// error.
    pub fn read_obfuscated(&mut self) -> Result<String, ProtocolError> {
        let cipher = self.read_bytes()?;
        let checksum = self.read_u16()?;
        Ok(deobfuscate(cipher, self.seq, checksum)
            .map(|plain| decode_text(&plain))
            .unwrap_or_default())
    }

    /// Everything not consumed yet.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

/// Builder for an outgoing body.
#[derive(Debug, Default)]
pub struct BodyWriter {
    buf: BytesMut,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_u16(mut self, value: u16) -> Self {
        self.buf.put_u16(value);
        self
    }

    pub fn write_u16_le(mut self, value: u16) -> Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn write_u32(mut self, value: u32) -> Self {
        self.buf.put_u32(value);
        self
    }

    pub fn write_u32_le(mut self, value: u32) -> Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Raw bytes with no prefix.
    pub fn write_raw(mut self, data: &[u8]) -> Self {
        self.buf.put_slice(data);
        self
    }

    /// A `u16`-length-prefixed byte string.
    ///
    /// # Errors
    /// [`ProtocolError::BodyTooLarge`] if `data` exceeds 65535 bytes.
    pub fn write_bytes(mut self, data: &[u8]) -> Result<Self, ProtocolError> {
        let len = u16::try_from(data.len()).map_err(|_| ProtocolError::BodyTooLarge(data.len()))?;
        self.buf.put_u16(len);
        self.buf.put_slice(data);
        Ok(self)
    }

    /// A `u16`-length-prefixed legacy text field.
    pub fn write_string(self, text: &str) -> Result<Self, ProtocolError> {
        let encoded = encode_text(text)?;
        self.write_bytes(&encoded)
    }

    /// An obfuscated text field keyed with `seq`, the sequence number of the
    /// message this body will travel in.
    pub fn write_obfuscated(self, seq: u16, text: &str) -> Result<Self, ProtocolError> {
        let (cipher, checksum) = obfuscate(&encode_text(text)?, seq);
        Ok(self.write_bytes(&cipher)?.write_u16(checksum))
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_reads_both_endiannesses() {
        let body = [0x12, 0x34, 0x12, 0x34, 0, 0, 0, 1, 1, 0, 0, 0, 0xAB];
        let mut r = BodyReader::new(&body, 0);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u16_le().unwrap(), 0x3412);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_u32_le().unwrap(), 1);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_reader_short_body_is_truncated_error() {
        let mut r = BodyReader::new(&[0x01], 0);
        assert!(matches!(
            r.read_u32(),
            Err(ProtocolError::Truncated {
                wanted: 4,
                remaining: 1
            })
        ));
    }

    #[test]
    fn test_reader_length_prefix_longer_than_body_is_truncated_error() {
        let mut r = BodyReader::new(&[0x00, 0x05, b'a'], 0);
        assert!(matches!(r.read_bytes(), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_string_field_trims_padding() {
        let body = BodyWriter::new().write_bytes(b"AB12\0\0").unwrap().finish();
        let mut r = BodyReader::new(&body, 0);
        assert_eq!(r.read_string().unwrap(), "AB12");
    }

    #[test]
    fn test_obfuscated_field_decodes_with_matching_seq() {
        let body = BodyWriter::new()
            .write_obfuscated(0x0203, "secret")
            .unwrap()
            .finish();
        let mut r = BodyReader::new(&body, 0x0203);
        assert_eq!(r.read_obfuscated().unwrap(), "secret");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_obfuscated_field_checksum_mismatch_yields_empty_string() {
        let mut bytes = BodyWriter::new()
            .write_obfuscated(9, "secret")
            .unwrap()
            .finish()
            .to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut r = BodyReader::new(&bytes, 9);
        assert_eq!(r.read_obfuscated().unwrap(), "");
    }

    #[test]
    fn test_writer_rejects_oversized_byte_string() {
        let data = vec![0u8; 70_000];
        assert!(matches!(
            BodyWriter::new().write_bytes(&data),
            Err(ProtocolError::BodyTooLarge(70_000))
        ));
    }

    #[test]
    fn test_read_rest_consumes_everything() {
        let mut r = BodyReader::new(&[1, 2, 3], 0);
        r.read_u8().unwrap();
        assert_eq!(r.read_rest(), &[2, 3]);
        assert_eq!(r.remaining(), 0);
    }
}
