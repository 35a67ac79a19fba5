//! # Facilities Registry
//!
//! In-memory record of everything learned from the network:
//! peer address → object → property → last known value (lowercase hex).
//!
//! The registry is updated only from authoritative frames (responses and
//! notifications). Echoes of requests (`GET`, `INF_REQ`, `SET_RES`) never
//! carry a new value and are delivered without touching it. Entries live for
//! the lifetime of the session; nothing is evicted.

use crate::constants::EPC_IDENTIFICATION_NUMBER;
use crate::echonet::frame::{ElData, ElFrame};
use crate::echonet::object::Eoj;
use crate::util::hex::{encode_hex, format_hex_compact};
use crate::wisun::datagram::{Datagram, PeerInfo};
use log::{debug, trace};
use serde::Serialize;
use std::collections::BTreeMap;

/// Properties of one object, keyed by EPC.
pub type PropertyValues = BTreeMap<u8, String>;

/// Objects of one peer.
pub type ObjectMap = BTreeMap<Eoj, PropertyValues>;

/// An identification number (`0x83`) seen on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentificationNumber {
    pub id: String,
    pub address: String,
    pub object: Eoj,
}

/// Result of a [`Facilities::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult<'a> {
    Device(&'a ObjectMap),
    Object(&'a PropertyValues),
    Value(&'a str),
}

/// Owned form of a [`SearchResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Found {
    Device(ObjectMap),
    Object(PropertyValues),
    Value(String),
}

impl From<SearchResult<'_>> for Found {
    fn from(result: SearchResult<'_>) -> Self {
        match result {
            SearchResult::Device(objects) => Found::Device(objects.clone()),
            SearchResult::Object(values) => Found::Object(values.clone()),
            SearchResult::Value(value) => Found::Value(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facilities {
    devices: BTreeMap<String, ObjectMap>,
    identification_numbers: Vec<IdentificationNumber>,
}

impl Facilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the properties of `frame` under its source object.
    pub fn update(&mut self, address: &str, frame: &ElData) {
        let objects = self.devices.entry(address.to_string()).or_default();
        let values = objects.entry(frame.seoj).or_insert_with(|| {
            debug!("new object {} at {}", frame.seoj, address);
            PropertyValues::new()
        });

        for property in &frame.properties {
            let value = encode_hex(&property.edt);
            if property.epc == EPC_IDENTIFICATION_NUMBER {
                self.identification_numbers.push(IdentificationNumber {
                    id: value.clone(),
                    address: address.to_string(),
                    object: frame.seoj,
                });
            }
            values.insert(property.epc, value);
        }
    }

    pub fn device(&self, address: &str) -> Option<&ObjectMap> {
        self.devices.get(address)
    }

    pub fn object(&self, address: &str, object: Eoj) -> Option<&PropertyValues> {
        self.devices.get(address)?.get(&object)
    }

    pub fn value(&self, address: &str, object: Eoj, epc: u8) -> Option<&str> {
        self.object(address, object)?.get(&epc).map(String::as_str)
    }

    /// Whether a non-empty value is cached for the property.
    pub fn has_value(&self, address: &str, object: Eoj, epc: u8) -> bool {
        self.value(address, object, epc).is_some_and(|v| !v.is_empty())
    }

    /// Looks up a device, an object of a device, or a single value.
    pub fn search(&self, address: &str, object: Option<Eoj>, epc: Option<u8>) -> Option<SearchResult<'_>> {
        match (object, epc) {
            (None, _) => self.device(address).map(SearchResult::Device),
            (Some(object), None) => self.object(address, object).map(SearchResult::Object),
            (Some(object), Some(epc)) => self.value(address, object, epc).map(SearchResult::Value),
        }
    }

    pub fn identification_numbers(&self) -> &[IdentificationNumber] {
        &self.identification_numbers
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.identification_numbers.clear();
    }

    /// Key-sorted JSON form of the registry, with EPCs as uppercase hex keys.
    pub fn snapshot_json(&self) -> String {
        let canonical: BTreeMap<&str, BTreeMap<String, BTreeMap<String, &str>>> = self
            .devices
            .iter()
            .map(|(address, objects)| {
                let objects = objects
                    .iter()
                    .map(|(eoj, values)| {
                        let values = values
                            .iter()
                            .map(|(epc, value)| (format!("{epc:02X}"), value.as_str()))
                            .collect();
                        (eoj.to_string(), values)
                    })
                    .collect();
                (address.as_str(), objects)
            })
            .collect();

        // Maps with string keys always serialize
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}

/// A frame handed back to the caller together with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub peer: PeerInfo,
    pub frame: ElFrame,
}

/// Decodes each datagram, updates the registry from authoritative frames and
/// returns the frames to deliver, in arrival order.
///
/// A datagram that does not decode, or that is in the arbitrary message
/// format, is dropped without affecting its siblings.
pub fn deliver(registry: &mut Facilities, datagrams: Vec<Datagram>) -> Vec<Delivery> {
    let mut deliveries = Vec::with_capacity(datagrams.len());

    for datagram in datagrams {
        trace!("EL payload from {}: {}", datagram.peer.address, format_hex_compact(&datagram.payload));

        let frame = match ElFrame::decode(&datagram.payload) {
            Ok(frame @ ElFrame::Specified(_)) => frame,
            Ok(ElFrame::Arbitrary { .. }) => {
                debug!("arbitrary message format from {}, ignored", datagram.peer.address);
                continue;
            }
            Err(e) => {
                debug!("not ECHONET Lite from {}, ignored: {}", datagram.peer.address, e);
                continue;
            }
        };

        if let Some(data) = frame.as_data() {
            if !data.is_request() {
                registry.update(&datagram.peer.address, data);
            }
        }

        deliveries.push(Delivery {
            peer: datagram.peer,
            frame,
        });
    }

    deliveries
}

/// Change detection over the registry's canonical snapshot.
#[derive(Debug, Clone)]
pub struct FacilitiesWatch {
    last: String,
}

impl FacilitiesWatch {
    pub fn new(registry: &Facilities) -> Self {
        FacilitiesWatch {
            last: registry.snapshot_json(),
        }
    }

    /// True when the snapshot differs from the one seen at the previous call.
    pub fn changed(&mut self, registry: &Facilities) -> bool {
        let current = registry.snapshot_json();
        if current == self.last {
            return false;
        }
        self.last = current;
        true
    }
}
