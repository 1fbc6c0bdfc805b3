//! Conversion between UTF-8 and the ISO-8859-15 wire charset.
//!
//! Names (users and rooms) travel strictly in ISO-8859-15. Message text is
//! accepted either as UTF-8 or ISO-8859-15 and sent as UTF-8.

use crate::error::CodecError;

/// The eight code points where ISO-8859-15 departs from ISO-8859-1.
const LATIN9_OVERRIDES: [(u8, char); 8] = [
    (0xA4, '\u{20AC}'),
    (0xA6, '\u{0160}'),
    (0xA8, '\u{0161}'),
    (0xB4, '\u{017D}'),
    (0xB8, '\u{017E}'),
    (0xBC, '\u{0152}'),
    (0xBD, '\u{0153}'),
    (0xBE, '\u{0178}'),
];

/// Text conversion between the wire and the application.
pub trait WireCodec: Send + Sync {
    /// Encode a user or room name for the wire.
    fn encode_name(&self, name: &str) -> Result<Vec<u8>, CodecError>;

    /// Decode a user or room name received from the wire.
    fn decode_name(&self, raw: &[u8]) -> Result<String, CodecError>;

    /// Decode message text: UTF-8 is taken as is, anything else goes through
    /// the name decoder.
    fn decode_text(&self, raw: &[u8]) -> Result<String, CodecError> {
        match std::str::from_utf8(raw) {
            Ok(text) => Ok(text.to_owned()),
            Err(_) => self.decode_name(raw),
        }
    }

    /// Encode message text for the wire.
    fn encode_text(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }
}

/// ISO-8859-15 ("Latin-9").
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin9;

impl WireCodec for Latin9 {
    fn encode_name(&self, name: &str) -> Result<Vec<u8>, CodecError> {
        name.chars().map(encode_char).collect()
    }

    fn decode_name(&self, raw: &[u8]) -> Result<String, CodecError> {
        Ok(raw.iter().map(|&b| decode_byte(b)).collect())
    }
}

fn encode_char(c: char) -> Result<u8, CodecError> {
    if let Some(&(byte, _)) = LATIN9_OVERRIDES.iter().find(|(_, ch)| *ch == c) {
        return Ok(byte);
    }
    let code = c as u32;
    if code > 0xFF || LATIN9_OVERRIDES.iter().any(|(byte, _)| u32::from(*byte) == code) {
        return Err(CodecError::Unrepresentable(c));
    }
    Ok(code as u8)
}

fn decode_byte(b: u8) -> char {
    LATIN9_OVERRIDES
        .iter()
        .find(|(byte, _)| *byte == b)
        .map(|(_, ch)| *ch)
        .unwrap_or(char::from(b))
}

/// Encode a name for the wire with the default codec.
pub fn encode_for_wire(name: &str) -> Result<Vec<u8>, CodecError> {
    Latin9.encode_name(name)
}

/// Decode a name from the wire with the default codec.
pub fn decode_from_wire(raw: &[u8]) -> Result<String, CodecError> {
    Latin9.decode_name(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        assert_eq!(encode_for_wire("bob").unwrap(), b"bob");
        assert_eq!(decode_from_wire(b"bob").unwrap(), "bob");
    }

    #[test]
    fn test_latin9_specific_characters() {
        assert_eq!(encode_for_wire("€uro").unwrap(), vec![0xA4, b'u', b'r', b'o']);
        assert_eq!(decode_from_wire(&[0xBC, 0xE4]).unwrap(), "Œä");
    }

    #[test]
    fn test_unrepresentable_characters_are_rejected() {
        // U+00A4 (currency sign) is replaced by the euro sign in Latin-9.
        assert_eq!(
            encode_for_wire("\u{00A4}"),
            Err(CodecError::Unrepresentable('\u{00A4}'))
        );
        assert!(encode_for_wire("日本").is_err());
    }

    #[test]
    fn test_decode_text_prefers_utf8() {
        assert_eq!(Latin9.decode_text("grüße".as_bytes()).unwrap(), "grüße");
        assert_eq!(Latin9.decode_text(&[b'g', 0xFC, b'n']).unwrap(), "gün");
    }
}
