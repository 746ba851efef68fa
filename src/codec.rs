//! Reversible content encoding for DAO Comms messages.
//!
//! Message content is stored on the ledger as a prefixed token. The default
//! [`Base64Codec`] is a stand-in for homomorphic encryption: it is plain
//! base64 and provides NO confidentiality. Anyone reading the ledger can
//! recover the plaintext. Swap in a real [`Codec`] implementation to change
//! that; callers only depend on the trait.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::types::{DaoCommsError, Result, CODEC_PREFIX};

/// Converts plaintext to a stored token and back.
pub trait Codec: Send + Sync {
    /// Encode plaintext into a token. Never fails.
    fn encode(&self, plaintext: &str) -> String;

    /// Decode a token back to plaintext.
    ///
    /// Tokens not produced by this codec are returned unchanged.
    fn decode(&self, token: &str) -> Result<String>;

    /// Whether the token carries this codec's marker.
    fn is_encoded(&self, token: &str) -> bool;

    /// Encode a numeric value.
    fn encode_number(&self, value: f64) -> String {
        self.encode(&value.to_string())
    }

    /// Decode a numeric value produced by [`Codec::encode_number`], or a bare number.
    fn decode_number(&self, token: &str) -> Result<f64> {
        let text = self.decode(token)?;
        text.trim()
            .parse::<f64>()
            .map_err(|e| DaoCommsError::Decoding(format!("Not a number: {}", e)))
    }
}

/// `"FHE-" + base64(utf8)` codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl Base64Codec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }
}

impl Codec for Base64Codec {
    fn encode(&self, plaintext: &str) -> String {
        format!("{}{}", CODEC_PREFIX, STANDARD.encode(plaintext.as_bytes()))
    }

    fn decode(&self, token: &str) -> Result<String> {
        let Some(payload) = token.strip_prefix(CODEC_PREFIX) else {
            return Ok(token.to_string());
        };

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| DaoCommsError::Decoding(format!("Invalid base64: {}", e)))?;

        String::from_utf8(bytes)
            .map_err(|e| DaoCommsError::Decoding(format!("Invalid UTF-8: {}", e)))
    }

    fn is_encoded(&self, token: &str) -> bool {
        token.starts_with(CODEC_PREFIX)
    }
}

/// Returns at most `max_chars` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let codec = Base64Codec::new();
        for text in [
            "",
            "hi",
            "Line 1\nLine 2",
            "Café résumé naïve",
            "Hello 👋 World 🌍",
            "FHE-not-really-encoded",
            r#"{"key": "value", "num": 42}"#,
        ] {
            let token = codec.encode(text);
            assert!(codec.is_encoded(&token));
            assert_eq!(codec.decode(&token).unwrap(), text);
        }
    }

    #[test]
    fn test_known_token() {
        let codec = Base64Codec::new();
        assert_eq!(codec.encode("hi"), "FHE-aGk=");
        assert_eq!(codec.decode("FHE-aGk=").unwrap(), "hi");
    }

    #[test]
    fn test_unprefixed_input_passes_through() {
        let codec = Base64Codec::new();
        for text in ["", "plain legacy text", "aGk=", "fhe-aGk="] {
            assert!(!codec.is_encoded(text));
            assert_eq!(codec.decode(text).unwrap(), text);
        }
    }

    #[test]
    fn test_invalid_payload() {
        let codec = Base64Codec::new();
        let result = codec.decode("FHE-***");
        assert!(matches!(result, Err(DaoCommsError::Decoding(_))));

        // Valid base64, invalid UTF-8
        let token = format!("{}{}", CODEC_PREFIX, STANDARD.encode([0xff, 0xfe]));
        assert!(matches!(codec.decode(&token), Err(DaoCommsError::Decoding(_))));
    }

    #[test]
    fn test_numbers() {
        let codec = Base64Codec::new();
        let token = codec.encode_number(42.0);
        assert_eq!(token, codec.encode("42"));
        assert_eq!(codec.decode_number(&token).unwrap(), 42.0);

        assert_eq!(codec.decode_number(&codec.encode_number(-3.25)).unwrap(), -3.25);
        assert_eq!(codec.decode_number("17.5").unwrap(), 17.5);
        assert!(codec.decode_number(&codec.encode("abc")).is_err());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("👋🌍x", 2), "👋🌍");
    }
}
