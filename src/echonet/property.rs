//! # ECHONET Lite Property Lists
//!
//! A property list is the `(EPC, PDC, EDT)` sequence following OPC in a
//! frame. It is parsed with `nom`; property-map EPCs whose PDC reaches the
//! bitmap threshold are rewritten into their Form-1 shape while parsing, so
//! callers only ever see one representation.

use crate::constants::{PROPERTY_MAP_EPCS, PROPERTY_MAP_FORM2_MIN_PDC};
use crate::echonet::frame::DecodeError;
use crate::echonet::property_map::PropertyMap;
use crate::util::hex::encode_hex;
use log::warn;
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

/// One property: code and value bytes. An empty `edt` is the GET placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub epc: u8,
    pub edt: Vec<u8>,
}

impl Property {
    pub fn new(epc: u8, edt: impl Into<Vec<u8>>) -> Self {
        Property { epc, edt: edt.into() }
    }

    /// Value as lowercase hex, empty for a GET placeholder.
    pub fn edt_hex(&self) -> String {
        encode_hex(&self.edt)
    }
}

/// Largest value a one-byte PDC or OPC can describe.
pub const MAX_COUNT: usize = u8::MAX as usize;

/// Ordered property list with unique codes; order is wire order.
///
/// A list holds at most [`MAX_COUNT`] properties of at most [`MAX_COUNT`]
/// bytes each, so OPC and every PDC always match the encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyList {
    properties: Vec<Property>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list of GET placeholders for `epcs`.
    pub fn with_empty(epcs: &[u8]) -> Self {
        let mut list = PropertyList::new();
        for &epc in epcs {
            list.insert(epc, Vec::new());
        }
        list
    }

    /// Inserts a property, replacing the value in place if the code is already present.
    ///
    /// A value longer than [`MAX_COUNT`] bytes is cut to that length. A new
    /// code is refused once the list is full.
    pub fn insert(&mut self, epc: u8, edt: impl Into<Vec<u8>>) {
        let mut edt = edt.into();
        if edt.len() > MAX_COUNT {
            warn!("EDT of {:02X} cut from {} to {} bytes", epc, edt.len(), MAX_COUNT);
            edt.truncate(MAX_COUNT);
        }
        let len = self.properties.len();
        match self.properties.iter_mut().find(|p| p.epc == epc) {
            Some(existing) => existing.edt = edt,
            None if len >= MAX_COUNT => {
                warn!("property list full, {:02X} dropped", epc);
            }
            None => self.properties.push(Property { epc, edt }),
        }
    }

    pub fn get(&self, epc: u8) -> Option<&[u8]> {
        self.properties
            .iter()
            .find(|p| p.epc == epc)
            .map(|p| p.edt.as_slice())
    }

    pub fn contains(&self, epc: u8) -> bool {
        self.get(epc).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn epcs(&self) -> Vec<u8> {
        self.properties.iter().map(|p| p.epc).collect()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Property count as carried in OPC.
    pub fn opc(&self) -> u8 {
        u8::try_from(self.properties.len()).unwrap_or(u8::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Appends the Form-1 wire encoding of every property to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for property in &self.properties {
            out.push(property.epc);
            out.push(u8::try_from(property.edt.len()).unwrap_or(u8::MAX));
            out.extend_from_slice(&property.edt);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

impl<'a> IntoIterator for &'a PropertyList {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.iter()
    }
}

impl FromIterator<Property> for PropertyList {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        let mut list = PropertyList::new();
        for property in iter {
            list.insert(property.epc, property.edt);
        }
        list
    }
}

/// Parses one raw `(EPC, PDC, EDT)` triple.
fn raw_property(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (input, epc) = be_u8(input)?;
    let (input, pdc) = be_u8(input)?;
    let (input, edt) = take(pdc)(input)?;
    Ok((input, (epc, edt)))
}

/// Decodes `opc` properties from `input`. Trailing bytes after the last property are ignored.
pub fn parse_property_list(opc: u8, input: &[u8]) -> Result<PropertyList, DecodeError> {
    let mut list = PropertyList::new();
    let mut rest = input;

    for index in 0..opc {
        let (remaining, (epc, edt)) = raw_property(rest).map_err(|_| DecodeError::Truncated {
            index,
            opc,
        })?;
        rest = remaining;

        if PROPERTY_MAP_EPCS.contains(&epc) && edt.len() >= PROPERTY_MAP_FORM2_MIN_PDC as usize {
            let map = PropertyMap::from_form2(edt)?;
            list.insert(epc, map.to_form1());
        } else {
            list.insert(epc, edt);
        }
    }

    Ok(list)
}
