//! # ECHONET Lite Frame Codec
//!
//! This module decodes and encodes ECHONET Lite frames as exchanged with the
//! smart meter over the B-route. It leverages the `nom` crate for parsing.
//!
//! ## Layout
//!
//! ```text
//! EHD(2) TID(2) SEOJ(3) DEOJ(3) ESV(1) OPC(1) { EPC(1) PDC(1) EDT(PDC) } * OPC
//! ```
//!
//! Only the specified message format (`EHD = 0x1081`) is decoded. Frames in
//! the arbitrary message format (`EHD = 0x1082`) are captured as an opaque
//! tail and never looked into.
//!
//! ## Usage
//!
//! ```rust
//! use broute_rs::echonet::frame::ElFrame;
//!
//! let frame = ElFrame::decode_hex("1081000102880105FF017201E704000001F4").unwrap();
//! let data = frame.as_data().unwrap();
//! assert_eq!(data.esv, 0x72);
//! assert_eq!(data.properties.get(0xE7), Some(&[0x00, 0x00, 0x01, 0xF4][..]));
//! ```

use crate::constants::{
    EL_HEADER_ARBITRARY, EL_HEADER_SPECIFIED, EL_MIN_FRAME_LEN, ESV_GET, ESV_INF_REQ, ESV_SET_RES,
};
use crate::echonet::object::{Eoj, Tid};
use crate::echonet::property::{parse_property_list, PropertyList};
use crate::util::hex::{decode_hex, encode_hex, HexError};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;
use std::fmt;
use thiserror::Error;

/// Reasons a buffer is not a decodable ECHONET Lite frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short: {0} bytes, at least 14 required")]
    TooShort(usize),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Unknown EHD: 0x{0:04X}")]
    UnknownHeader(u16),

    #[error("Property list truncated at property {index} of {opc}")]
    Truncated { index: u8, opc: u8 },

    #[error("Malformed property map ({0} bytes)")]
    PropertyMap(usize),
}

impl From<HexError> for DecodeError {
    fn from(err: HexError) -> Self {
        match err {
            HexError::OddLength(len) => DecodeError::OddLength(len),
            HexError::EmptyString => DecodeError::TooShort(0),
            other => DecodeError::InvalidHex(other.to_string()),
        }
    }
}

/// A frame in the specified message format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElData {
    pub tid: Tid,
    pub seoj: Eoj,
    pub deoj: Eoj,
    pub esv: u8,
    pub opc: u8,
    /// Decoded properties; property maps always appear in Form-1 shape.
    pub properties: PropertyList,
    /// Raw bytes after OPC exactly as carried on the wire.
    pub detail: Vec<u8>,
}

impl ElData {
    fn from_properties(tid: Tid, seoj: Eoj, deoj: Eoj, esv: u8, properties: PropertyList) -> Self {
        ElData {
            tid,
            seoj,
            deoj,
            esv,
            opc: properties.opc(),
            detail: properties.encode(),
            properties,
        }
    }

    /// Whether this frame is an echo of a request rather than authoritative data.
    pub fn is_request(&self) -> bool {
        matches!(self.esv, ESV_GET | ESV_INF_REQ | ESV_SET_RES)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.detail.len());
        out.extend_from_slice(&EL_HEADER_SPECIFIED.to_be_bytes());
        out.extend_from_slice(&self.tid.0);
        out.extend_from_slice(&self.seoj.0);
        out.extend_from_slice(&self.deoj.0);
        out.push(self.esv);
        out.push(self.opc);
        out.extend_from_slice(&self.detail);
        out
    }
}

/// A decoded ECHONET Lite frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElFrame {
    /// `EHD = 0x1081`
    Specified(ElData),
    /// `EHD = 0x1082`, everything after the header kept opaque
    Arbitrary { amf: Vec<u8> },
}

impl ElFrame {
    /// Decodes a frame from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < EL_MIN_FRAME_LEN {
            return Err(DecodeError::TooShort(bytes.len()));
        }

        let ehd = u16::from_be_bytes([bytes[0], bytes[1]]);
        let rest = &bytes[2..];

        match ehd {
            EL_HEADER_ARBITRARY => Ok(ElFrame::Arbitrary { amf: rest.to_vec() }),
            EL_HEADER_SPECIFIED => {
                let (detail, (tid, seoj, deoj, esv, opc)) =
                    specified_header(rest).map_err(|_| DecodeError::TooShort(bytes.len()))?;
                let properties = parse_property_list(opc, detail)?;
                Ok(ElFrame::Specified(ElData {
                    tid,
                    seoj,
                    deoj,
                    esv,
                    opc,
                    properties,
                    detail: detail.to_vec(),
                }))
            }
            other => Err(DecodeError::UnknownHeader(other)),
        }
    }

    /// Decodes a frame from its hex representation (either case).
    pub fn decode_hex(hex: &str) -> Result<Self, DecodeError> {
        if hex.len() % 2 != 0 {
            return Err(DecodeError::OddLength(hex.len()));
        }
        if hex.len() < EL_MIN_FRAME_LEN * 2 {
            return Err(DecodeError::TooShort(hex.len() / 2));
        }
        let bytes = decode_hex(hex)?;
        Self::decode(&bytes)
    }

    pub fn as_data(&self) -> Option<&ElData> {
        match self {
            ElFrame::Specified(data) => Some(data),
            ElFrame::Arbitrary { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<ElData> {
        match self {
            ElFrame::Specified(data) => Some(data),
            ElFrame::Arbitrary { .. } => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ElFrame::Specified(data) => data.to_bytes(),
            ElFrame::Arbitrary { amf } => {
                let mut out = EL_HEADER_ARBITRARY.to_be_bytes().to_vec();
                out.extend_from_slice(amf);
                out
            }
        }
    }
}

impl From<ElData> for ElFrame {
    fn from(data: ElData) -> Self {
        ElFrame::Specified(data)
    }
}

/// Separated form used in logs: `EHD TID SEOJ DEOJ ESV OPC+DETAIL`.
impl fmt::Display for ElData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x} {} {} {} {:02x} {:02x}{}",
            EL_HEADER_SPECIFIED,
            self.tid,
            self.seoj,
            self.deoj,
            self.esv,
            self.opc,
            encode_hex(&self.detail)
        )
    }
}

impl fmt::Display for ElFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElFrame::Specified(data) => fmt::Display::fmt(data, f),
            ElFrame::Arbitrary { amf } => write!(f, "{:04x} {}", EL_HEADER_ARBITRARY, encode_hex(amf)),
        }
    }
}

/// TID SEOJ DEOJ ESV OPC, following EHD.
fn specified_header(input: &[u8]) -> IResult<&[u8], (Tid, Eoj, Eoj, u8, u8)> {
    let (input, tid) = take(2usize)(input)?;
    let (input, seoj) = take(3usize)(input)?;
    let (input, deoj) = take(3usize)(input)?;
    let (input, esv) = be_u8(input)?;
    let (input, opc) = be_u8(input)?;
    Ok((
        input,
        (
            Tid([tid[0], tid[1]]),
            Eoj([seoj[0], seoj[1], seoj[2]]),
            Eoj([deoj[0], deoj[1], deoj[2]]),
            esv,
            opc,
        ),
    ))
}

/// GET with one property and an empty EDT.
pub fn encode_get(tid: Tid, seoj: Eoj, deoj: Eoj, epc: u8) -> ElData {
    ElData::from_properties(tid, seoj, deoj, ESV_GET, PropertyList::with_empty(&[epc]))
}

/// GET with one empty EDT per requested property; OPC is the list length.
pub fn encode_multi_get(tid: Tid, seoj: Eoj, deoj: Eoj, epcs: &[u8]) -> ElData {
    ElData::from_properties(tid, seoj, deoj, ESV_GET, PropertyList::with_empty(epcs))
}

/// Single-property frame for any service code. A GET always carries an empty EDT.
pub fn encode_opc1(tid: Tid, seoj: Eoj, deoj: Eoj, esv: u8, epc: u8, edt: &[u8]) -> ElData {
    let mut properties = PropertyList::new();
    if esv == ESV_GET {
        properties.insert(epc, Vec::new());
    } else {
        properties.insert(epc, edt);
    }
    ElData::from_properties(tid, seoj, deoj, esv, properties)
}
