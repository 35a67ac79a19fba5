//! # Smart Meter Error Handling
//!
//! This module defines the SmartMeterError enum, which represents the different
//! error types that can occur in the broute-rs crate.

use crate::echonet::frame::DecodeError;
use crate::util::hex::HexError;
use crate::wisun::session::SessionState;
use thiserror::Error;

/// Represents the different error types that can occur in the B-route crate.
#[derive(Debug, Error)]
pub enum SmartMeterError {
    /// Indicates the serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates a read or write on the transport failed.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Indicates a buffer is not a decodable ECHONET Lite frame.
    #[error("Error decoding ECHONET Lite frame: {0}")]
    Decode(#[from] DecodeError),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string: {0}")]
    Hex(#[from] HexError),

    /// The meter did not accept the PANA authentication.
    #[error("B-route join failed after {attempts} attempts")]
    JoinFailed { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation requires an established session.
    #[error("Session not available (state: {0})")]
    NotAvailable(SessionState),

    /// The driver task is gone.
    #[error("Smart meter driver closed")]
    Closed,
}

impl From<serde_json::Error> for SmartMeterError {
    fn from(err: serde_json::Error) -> Self {
        SmartMeterError::Config(err.to_string())
    }
}
