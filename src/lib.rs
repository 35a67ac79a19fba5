//! # broute-rs - A Rust Crate for Wi-SUN B-route Smart Meter Communication
//!
//! The broute-rs crate drives a Wi-SUN dongle (SKSTACK-IP command set) over a
//! serial link, joins the B-route of a low-voltage smart electric energy meter
//! and exchanges ECHONET Lite frames with it.
//!
//! ## Features
//!
//! - Bootstrap state machine: echo off, credentials, active scan, channel and
//!   PAN selection, address resolution and PANA join with retry and timeout
//! - ECHONET Lite frame codec, including both property-map encodings
//! - Facilities registry of every value reported by the meter
//! - Jittered observation polling that skips properties known to be static
//! - RL7023 Stick-D and BP35C0 dongle profiles with configurable commands
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! broute-rs = "0.1.0"
//! ```
//!
//! ```rust
//! use broute_rs::{ElFrame, Session, SessionConfig, SessionState};
//!
//! let frame = ElFrame::decode_hex("1081000102880105FF017201E704000001F4").unwrap();
//! assert_eq!(frame.to_string(), "1081 0001 028801 05ff01 72 01e704000001f4");
//!
//! let mut session = Session::new(&SessionConfig::new("00112233445566778899AABBCCDDEEFF", "0123456789AB"));
//! session.open();
//! assert_eq!(session.state(), SessionState::SetEcho);
//! ```

pub mod config;
pub mod constants;
pub mod echonet;
pub mod error;
pub mod logging;
pub mod observation;
pub mod smart_meter;
pub mod util;
pub mod wisun;

pub use crate::config::{SerialConfig, SessionConfig};
pub use crate::error::SmartMeterError;
pub use crate::logging::{init_logger, log_debug, log_error, log_info, log_warn};

pub use echonet::{ElData, ElFrame, Eoj, Facilities, PropertyList, PropertyMap, Tid};
pub use observation::{FiredPoll, ObservationScheduler, PollDecision, PollKey};
pub use smart_meter::{SmartMeter, SmartMeterHandle};
pub use wisun::{DongleKind, DongleProfile, Notification, PanDescriptor, PeerInfo, Request, Session, SessionState};
