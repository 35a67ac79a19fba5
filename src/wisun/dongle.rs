//! # Dongle Profiles
//!
//! The bootstrap vocabulary and the UDP envelope are firmware-defined. A
//! [`DongleProfile`] bundles the command templates and the ERXUDP shape for
//! one dongle variant; every field can be overridden from configuration.
//!
//! Templates use `{}`-style placeholders: `{password}`, `{id}`, `{channel}`,
//! `{pan_id}`, `{mac}` and `{ip}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported Wi-SUN dongle variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DongleKind {
    /// RL7023 Stick-D/IPS and other SKSTACK-IP dongles in ASCII receive mode
    #[default]
    Rl7023StickD,
    /// ROHM BP35C0 family, binary receive mode
    Bp35c0,
}

impl FromStr for DongleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rl7023" | "rl7023-stick-d" | "rl7023stickd" => Ok(DongleKind::Rl7023StickD),
            "bp35c0" => Ok(DongleKind::Bp35c0),
            other => Err(format!("unknown dongle type: {other}")),
        }
    }
}

impl fmt::Display for DongleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DongleKind::Rl7023StickD => f.write_str("rl7023-stick-d"),
            DongleKind::Bp35c0 => f.write_str("bp35c0"),
        }
    }
}

/// How the EL payload of an `ERXUDP` line is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadEncoding {
    /// Trailing ASCII-hex token
    HexToken,
    /// Raw bytes following the header tokens
    RawBytes,
}

/// Bootstrap and send command templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    pub disable_echo: String,
    pub set_password: String,
    pub set_id: String,
    pub scan: String,
    pub set_channel: String,
    pub set_pan_id: String,
    pub resolve_address: String,
    pub join: String,
    pub info: String,
    /// `SKSENDTO` keyword and fixed fields up to, not including, the destination address
    pub send_prefix: String,
    /// Fields between the UDP port and the payload length, e.g. `1` or `1 0`
    pub send_security: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        CommandSet {
            disable_echo: "SKSREG SFE 0".into(),
            set_password: "SKSETPWD C {password}".into(),
            set_id: "SKSETRBID {id}".into(),
            scan: "SKSCAN 2 FFFFFFFF 6".into(),
            set_channel: "SKSREG S2 {channel}".into(),
            set_pan_id: "SKSREG S3 {pan_id}".into(),
            resolve_address: "SKLL64 {mac}".into(),
            join: "SKJOIN {ip}".into(),
            info: "SKINFO".into(),
            send_prefix: "SKSENDTO 1".into(),
            send_security: "1".into(),
        }
    }
}

/// Per-field replacements for a [`CommandSet`]; unset fields keep the
/// variant's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOverrides {
    pub disable_echo: Option<String>,
    pub set_password: Option<String>,
    pub set_id: Option<String>,
    pub scan: Option<String>,
    pub set_channel: Option<String>,
    pub set_pan_id: Option<String>,
    pub resolve_address: Option<String>,
    pub join: Option<String>,
    pub info: Option<String>,
    pub send_prefix: Option<String>,
    pub send_security: Option<String>,
}

impl CommandOverrides {
    pub fn apply(&self, commands: &mut CommandSet) {
        let fields = [
            (&self.disable_echo, &mut commands.disable_echo),
            (&self.set_password, &mut commands.set_password),
            (&self.set_id, &mut commands.set_id),
            (&self.scan, &mut commands.scan),
            (&self.set_channel, &mut commands.set_channel),
            (&self.set_pan_id, &mut commands.set_pan_id),
            (&self.resolve_address, &mut commands.resolve_address),
            (&self.join, &mut commands.join),
            (&self.info, &mut commands.info),
            (&self.send_prefix, &mut commands.send_prefix),
            (&self.send_security, &mut commands.send_security),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                slot.clone_from(value);
            }
        }
    }
}

/// Everything that differs between dongle variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DongleProfile {
    pub kind: DongleKind,
    pub commands: CommandSet,
    pub payload: PayloadEncoding,
    /// Tokens of an ERXUDP line up to and including the data length
    pub erxudp_header_tokens: usize,
}

impl DongleProfile {
    pub fn for_kind(kind: DongleKind) -> Self {
        match kind {
            DongleKind::Rl7023StickD => DongleProfile {
                kind,
                commands: CommandSet::default(),
                payload: PayloadEncoding::HexToken,
                // ERXUDP SENDER DEST RPORT LPORT SENDERLLA SECURED DATALEN
                erxudp_header_tokens: 8,
            },
            DongleKind::Bp35c0 => DongleProfile {
                kind,
                commands: CommandSet {
                    scan: "SKSCAN 2 FFFFFFFF 6 0".into(),
                    send_security: "1 0".into(),
                    ..CommandSet::default()
                },
                payload: PayloadEncoding::RawBytes,
                // ERXUDP SENDER DEST RPORT LPORT SENDERLLA RSSI SECURED SIDE DATALEN
                erxudp_header_tokens: 10,
            },
        }
    }

    pub fn with_commands(mut self, commands: CommandSet) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_overrides(mut self, overrides: &CommandOverrides) -> Self {
        overrides.apply(&mut self.commands);
        self
    }

    /// Renders one bootstrap command line without the line terminator.
    pub fn render(&self, command: &Command<'_>) -> String {
        let c = &self.commands;
        match command {
            Command::DisableEcho => c.disable_echo.clone(),
            Command::SetPassword(password) => c.set_password.replace("{password}", password),
            Command::SetId(id) => c.set_id.replace("{id}", id),
            Command::Scan => c.scan.clone(),
            Command::SetChannel(channel) => c.set_channel.replace("{channel}", channel),
            Command::SetPanId(pan_id) => c.set_pan_id.replace("{pan_id}", pan_id),
            Command::ResolveAddress(mac) => c.resolve_address.replace("{mac}", mac),
            Command::Join(ip) => c.join.replace("{ip}", ip),
            Command::Info => c.info.clone(),
        }
    }

    /// Renders the line to write for `command`, terminated with CR/LF.
    pub fn line(&self, command: &Command<'_>) -> Vec<u8> {
        let mut line = self.render(command).into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }

    /// Wraps an EL payload into the UDP send envelope.
    pub fn send_envelope(&self, ip: &str, port: u16, payload: &[u8]) -> Vec<u8> {
        let header = format!(
            "{} {} {:04X} {} {:04X} ",
            self.commands.send_prefix,
            ip,
            port,
            self.commands.send_security,
            payload.len()
        );
        let mut out = header.into_bytes();
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl Default for DongleProfile {
    fn default() -> Self {
        Self::for_kind(DongleKind::default())
    }
}

/// A bootstrap command with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    DisableEcho,
    SetPassword(&'a str),
    SetId(&'a str),
    Scan,
    SetChannel(&'a str),
    SetPanId(&'a str),
    ResolveAddress(&'a str),
    Join(&'a str),
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_defaults() {
        let profile = DongleProfile::for_kind(DongleKind::Rl7023StickD);
        assert_eq!(profile.render(&Command::SetPassword("0123456789AB")), "SKSETPWD C 0123456789AB");
        assert_eq!(profile.render(&Command::SetChannel("21")), "SKSREG S2 21");
        assert_eq!(profile.line(&Command::DisableEcho), b"SKSREG SFE 0\r\n".to_vec());
    }

    #[test]
    fn test_envelope_differs_by_variant() {
        let ip = "FE80:0000:0000:0000:021C:6400:03EF:EDFD";
        let payload = [0x10, 0x81, 0x00, 0x01];

        let rl = DongleProfile::for_kind(DongleKind::Rl7023StickD).send_envelope(ip, 0x0E1A, &payload);
        assert!(rl.starts_with(format!("SKSENDTO 1 {ip} 0E1A 1 0004 ").as_bytes()));

        let bp = DongleProfile::for_kind(DongleKind::Bp35c0).send_envelope(ip, 0x0E1A, &payload);
        assert!(bp.starts_with(format!("SKSENDTO 1 {ip} 0E1A 1 0 0004 ").as_bytes()));
        assert!(bp.ends_with(&[0x10, 0x81, 0x00, 0x01, b'\r', b'\n']));
    }

    #[test]
    fn test_custom_commands() {
        let commands = CommandSet {
            join: "JOIN {ip}".into(),
            ..CommandSet::default()
        };
        let profile = DongleProfile::default().with_commands(commands);
        assert_eq!(profile.render(&Command::Join("FE80::1")), "JOIN FE80::1");
    }

    #[test]
    fn test_overrides_keep_variant_defaults() {
        let overrides = CommandOverrides {
            info: Some("SKINFO2".into()),
            ..CommandOverrides::default()
        };
        let profile = DongleProfile::for_kind(DongleKind::Bp35c0).with_overrides(&overrides);
        assert_eq!(profile.commands.info, "SKINFO2");
        assert_eq!(profile.commands.send_security, "1 0");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("BP35C0".parse::<DongleKind>(), Ok(DongleKind::Bp35c0));
        assert_eq!("rl7023".parse::<DongleKind>(), Ok(DongleKind::Rl7023StickD));
        assert!("xbee".parse::<DongleKind>().is_err());
    }
}
