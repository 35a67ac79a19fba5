//! # Session Configuration
//!
//! Settings for one B-route session, loadable from JSON:
//!
//! ```json
//! {
//!   "id": "00112233445566778899AABBCCDDEEFF",
//!   "password": "0123456789AB",
//!   "dongle": "bp35c0",
//!   "observation_epcs": ["E7", "E0"],
//!   "pan": { "channel": "21", "pan_id": "8888", "address": "001C640003EFEDFD" }
//! }
//! ```
//!
//! Every field has a default, so a file only needs what differs.

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_JOIN_RETRIES, DEFAULT_OBSERVATION_DISPERSION,
    DEFAULT_SCAN_RETRY_LIMIT,
};
use crate::error::SmartMeterError;
use crate::util::hex::hex_byte;
use crate::wisun::dongle::{CommandOverrides, DongleKind, DongleProfile};
use crate::wisun::pan::PanDescriptor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// B-route authentication id
    pub id: String,
    /// B-route password
    #[serde(skip_serializing)]
    pub password: Zeroizing<String>,
    pub dongle: DongleKind,
    /// Descriptor from an earlier scan; a known channel skips scanning
    pub pan: Option<PanDescriptor>,
    /// Properties polled while observation runs
    #[serde(serialize_with = "serialize_epcs", deserialize_with = "deserialize_epcs")]
    pub observation_epcs: Vec<u8>,
    pub debug: bool,
    pub connect_timeout_ms: u64,
    pub join_retries: u8,
    /// Failed scans before the id is set again
    pub scan_retry_limit: u8,
    pub observation_dispersion_ms: u64,
    /// Pause after each received chunk before the next read
    pub post_chunk_pause_ms: u64,
    /// Replaces parts of the dongle's default command vocabulary
    pub commands: Option<CommandOverrides>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            id: String::new(),
            password: Zeroizing::new(String::new()),
            dongle: DongleKind::default(),
            pan: None,
            observation_epcs: Vec::new(),
            debug: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            join_retries: DEFAULT_JOIN_RETRIES,
            scan_retry_limit: DEFAULT_SCAN_RETRY_LIMIT,
            observation_dispersion_ms: DEFAULT_OBSERVATION_DISPERSION.as_millis() as u64,
            post_chunk_pause_ms: 0,
            commands: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("id", &self.id)
            .field("password", &"<redacted>")
            .field("dongle", &self.dongle)
            .field("pan", &self.pan)
            .field("observation_epcs", &self.observation_epcs)
            .field("debug", &self.debug)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("join_retries", &self.join_retries)
            .field("scan_retry_limit", &self.scan_retry_limit)
            .field("observation_dispersion_ms", &self.observation_dispersion_ms)
            .field("post_chunk_pause_ms", &self.post_chunk_pause_ms)
            .field("commands", &self.commands)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        SessionConfig {
            id: id.into(),
            password: Zeroizing::new(password.into()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, SmartMeterError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SmartMeterError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SmartMeterError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Checks that the credentials are present.
    pub fn validate(&self) -> Result<(), SmartMeterError> {
        if self.id.trim().is_empty() {
            return Err(SmartMeterError::Config("B-route id is empty".into()));
        }
        if self.password.trim().is_empty() {
            return Err(SmartMeterError::Config("B-route password is empty".into()));
        }
        Ok(())
    }

    /// Dongle profile with any configured command overrides applied.
    pub fn profile(&self) -> DongleProfile {
        let profile = DongleProfile::for_kind(self.dongle);
        match &self.commands {
            Some(overrides) => profile.with_overrides(overrides),
            None => profile,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn observation_dispersion(&self) -> Duration {
        Duration::from_millis(self.observation_dispersion_ms)
    }

    pub fn post_chunk_pause(&self) -> Duration {
        Duration::from_millis(self.post_chunk_pause_ms)
    }
}

fn serialize_epcs<S: Serializer>(epcs: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(epcs.iter().map(|epc| format!("{epc:02X}")))
}

fn deserialize_epcs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let codes = Vec::<String>::deserialize(deserializer)?;
    codes
        .iter()
        .map(|code| hex_byte(code).map_err(serde::de::Error::custom))
        .collect()
}

/// Serial line settings for the dongle. The line is always 8N1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyUSB0".into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        SerialConfig {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = SessionConfig::from_json_str(r#"{"id":"00112233445566778899AABBCCDDEEFF","password":"0123456789AB"}"#).unwrap();
        assert_eq!(config.dongle, DongleKind::Rl7023StickD);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.join_retries, 3);
        assert_eq!(config.scan_retry_limit, 3);
        assert_eq!(config.observation_dispersion(), Duration::from_secs(30));
        assert!(config.pan.is_none());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "id": "00112233445566778899AABBCCDDEEFF",
            "password": "0123456789AB",
            "dongle": "bp35c0",
            "observation_epcs": ["E7", "e0"],
            "pan": {"channel": "21", "pan_id": "8888", "address": "001C640003EFEDFD"},
            "commands": {"join": "SKJOIN2 {ip}"}
        }"#;
        let config = SessionConfig::from_json_str(json).unwrap();
        assert_eq!(config.observation_epcs, vec![0xE7, 0xE0]);
        assert!(config.pan.as_ref().is_some_and(|p| p.has_channel()));

        let profile = config.profile();
        assert_eq!(profile.kind, DongleKind::Bp35c0);
        assert_eq!(profile.commands.join, "SKJOIN2 {ip}");
        assert_eq!(profile.commands.info, "SKINFO");
        assert_eq!(profile.commands.send_security, "1 0");
    }

    #[test]
    fn test_rejects_missing_credentials() {
        assert!(matches!(SessionConfig::from_json_str(r#"{"id":"0011"}"#), Err(SmartMeterError::Config(_))));
        assert!(matches!(SessionConfig::from_json_str(r#"{"observation_epcs":["ZZ"]}"#), Err(SmartMeterError::Config(_))));
    }

    #[test]
    fn test_password_is_not_exposed() {
        let config = SessionConfig::new("0011", "secret-pass");
        assert!(!format!("{config:?}").contains("secret-pass"));
        assert!(!serde_json::to_string(&config).unwrap().contains("secret-pass"));
    }
}
