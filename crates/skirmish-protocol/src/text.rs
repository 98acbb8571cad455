//! Legacy text handling: the client's double-byte encoding and the
//! obfuscated string field used for credentials.

use encoding_rs::SHIFT_JIS;

use crate::ProtocolError;

/// Decodes client text (Shift_JIS) to UTF-8, dropping trailing NUL padding.
///
/// Invalid sequences become U+FFFD rather than failing: a garbled name is
/// better than a dropped login.
pub fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let (text, _, _) = SHIFT_JIS.decode(&bytes[..end]);
    text.into_owned()
}

/// Encodes UTF-8 text for the client.
///
/// # Errors
/// [`ProtocolError::Unencodable`] if `text` has characters Shift_JIS
/// cannot represent.
pub fn encode_text(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let (bytes, _, had_errors) = SHIFT_JIS.encode(text);
    if had_errors {
        return Err(ProtocolError::Unencodable(text.to_string()));
    }
    Ok(bytes.into_owned())
}

// ---------------------------------------------------------------------------
// Obfuscated strings
// ---------------------------------------------------------------------------

// Placeholder key tables. Replace with the legacy client's own before
// talking to real hardware.
const KEY_A: [u8; 8] = [0x4B, 0x31, 0x9E, 0x07, 0xD2, 0x6C, 0xA5, 0x18];
const KEY_B: [u8; 8] = [0x2F, 0xB3, 0x58, 0xE1, 0x0C, 0x97, 0x7A, 0xC4];

fn key_byte(index: usize, seq: u16) -> u8 {
    KEY_A[index % 8] ^ KEY_B[(index + seq as usize) % 8] ^ (seq & 0xFF) as u8
}

/// XORs `plain` with the key stream for `seq` and returns the cipher bytes
/// plus the checksum (wrapping 16-bit sum of the plain bytes).
pub fn obfuscate(plain: &[u8], seq: u16) -> (Vec<u8>, u16) {
    let mut sum: u16 = 0;
    let cipher = plain
        .iter()
        .enumerate()
        .map(|(i, b)| {
            sum = sum.wrapping_add(u16::from(*b));
            b ^ key_byte(i, seq)
        })
        .collect();
    (cipher, sum)
}

/// Reverses [`obfuscate`]. Returns `None` when the checksum does not match.
pub fn deobfuscate(cipher: &[u8], seq: u16, checksum: u16) -> Option<Vec<u8>> {
    let mut sum: u16 = 0;
    let plain: Vec<u8> = cipher
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let p = b ^ key_byte(i, seq);
            sum = sum.wrapping_add(u16::from(p));
            p
        })
        .collect();
    (sum == checksum).then_some(plain)
}
