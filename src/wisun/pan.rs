//! PAN descriptor captured during an active scan.
//!
//! The dongle reports a beacon as an `EPANDESC` block:
//!
//! ```text
//! EVENT 20 FE80:0000:0000:0000:021C:6400:03EF:EDFD 0
//! EPANDESC
//!   Channel:21
//!   Channel Page:09
//!   Pan ID:8888
//!   Addr:001C640003EFEDFD
//!   LQI:E1
//!   PairID:00AABBCC
//! ```
//!
//! The block may be split over several chunks, so lines are accumulated into
//! the same descriptor until the scan finishes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanDescriptor {
    pub channel: Option<String>,
    pub channel_page: Option<String>,
    pub pan_id: Option<String>,
    /// 64-bit MAC address of the coordinator
    pub address: Option<String>,
    pub lqi: Option<String>,
    pub pair_id: Option<String>,
}

impl PanDescriptor {
    pub fn has_channel(&self) -> bool {
        self.channel.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Whether channel, PAN ID and MAC address are all known.
    pub fn is_complete(&self) -> bool {
        self.has_channel() && self.pan_id.is_some() && self.address.is_some()
    }

    /// Folds the `key:value` lines of `text` into the descriptor.
    ///
    /// Returns true when the text contained an `EPANDESC` marker or at least
    /// one recognised field.
    pub fn accumulate(&mut self, text: &str) -> bool {
        let mut seen = false;

        for line in text.split(['\r', '\n']) {
            let line = line.trim_start_matches(' ');
            if line == "EPANDESC" {
                seen = true;
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = Some(value.trim_end().to_string());

            match key {
                "Channel" => self.channel = value,
                "Channel Page" => self.channel_page = value,
                "Pan ID" => self.pan_id = value,
                "Addr" => self.address = value,
                "LQI" => self.lqi = value,
                "PairID" => self.pair_id = value,
                _ => continue,
            }
            seen = true;
        }

        seen
    }

    /// Link quality as a number, if reported in hex.
    pub fn lqi_value(&self) -> Option<u8> {
        self.lqi.as_deref().and_then(|l| u8::from_str_radix(l, 16).ok())
    }
}
