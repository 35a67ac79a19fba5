//! # Utility Modules
//!
//! Common helpers used throughout the broute-rs crate.

pub mod hex;

pub use self::hex::{decode_hex, encode_hex, encode_hex_upper, format_hex_compact, hex_byte, HexError};
