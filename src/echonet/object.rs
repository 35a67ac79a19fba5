//! ECHONET Lite object identifiers and transaction ids.

use crate::util::hex::{decode_hex, encode_hex, HexError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// ECHONET Lite object: class group code, class code, instance code.
///
/// Displays (and serializes) as six lowercase hex digits, e.g. `028801`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eoj(pub [u8; 3]);

impl Eoj {
    pub const fn new(class_group: u8, class: u8, instance: u8) -> Self {
        Eoj([class_group, class, instance])
    }

    pub fn class_group(&self) -> u8 {
        self.0[0]
    }

    pub fn class(&self) -> u8 {
        self.0[1]
    }

    pub fn instance(&self) -> u8 {
        self.0[2]
    }
}

impl From<[u8; 3]> for Eoj {
    fn from(bytes: [u8; 3]) -> Self {
        Eoj(bytes)
    }
}

impl fmt::Display for Eoj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for Eoj {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 3] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| HexError::DecodeError(format!("EOJ must be 3 bytes, got {}", v.len())))?;
        Ok(Eoj(bytes))
    }
}

impl Serialize for Eoj {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Eoj {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Two-byte transaction id as carried on the wire (big endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tid(pub [u8; 2]);

impl Tid {
    /// Next id: the low byte wraps into the high byte, the high byte wraps to zero.
    pub fn next(self) -> Tid {
        Tid(u16::from_be_bytes(self.0).wrapping_add(1).to_be_bytes())
    }

    pub fn as_u16(&self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

/// Monotonic transaction counter owned by one session.
#[derive(Debug, Clone, Default)]
pub struct TransactionCounter {
    current: Tid,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting from `tid`; the next call to [`advance`](Self::advance) yields its successor.
    pub fn starting_at(tid: Tid) -> Self {
        TransactionCounter { current: tid }
    }

    /// Increments the counter and returns the id to use for the next frame.
    pub fn advance(&mut self) -> Tid {
        self.current = self.current.next();
        self.current
    }

    pub fn current(&self) -> Tid {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Tid::default();
    }
}
