//! # Hex Encoding/Decoding Utilities
//!
//! Byte and hex-string conversions shared by the ECHONET Lite codec, the
//! facilities registry and the dongle command layer.
//!
//! The registry and every decoded frame carry lowercase hex; the dongle
//! command set expects uppercase fields (`SKSENDTO ... 000E`), so both
//! directions are provided.
//!
//! ```rust
//! use broute_rs::util::hex::{encode_hex, decode_hex};
//!
//! let data = [0x10, 0x81, 0x00, 0x01];
//! assert_eq!(encode_hex(&data), "10810001");
//! assert_eq!(decode_hex("10810001").unwrap(), data);
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Invalid hex character: {0}")]
    InvalidCharacter(char),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
///
/// This is the canonical representation for registry values and object codes.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.is_empty() {
        return Err(HexError::EmptyString);
    }

    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    if let Some(bad) = cleaned.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(HexError::InvalidCharacter(bad));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "10 81 00 01" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert a single hex byte string to u8
pub fn hex_byte(hex: &str) -> Result<u8, HexError> {
    if hex.len() != 2 {
        return Err(HexError::OddLength(hex.len()));
    }

    u8::from_str_radix(hex, 16).map_err(|_| {
        HexError::InvalidCharacter(hex.chars().find(|c| !c.is_ascii_hexdigit()).unwrap_or('?'))
    })
}

/// Helper for creating test data from hex strings
#[cfg(test)]
pub(crate) fn hex_to_bytes(hex: &str) -> Vec<u8> {
    decode_hex(hex).expect("Invalid hex in test data")
}
