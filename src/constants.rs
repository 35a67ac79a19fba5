//! ECHONET Lite and B-route Constants
//!
//! This module defines constants used by the ECHONET Lite codec and the
//! Wi-SUN B-route session, based on the ECHONET Lite standard and the
//! "Appendix Detailed Requirements for ECHONET Device objects" for the
//! low-voltage smart electric energy meter class.

use std::time::Duration;

/// EHD for the specified message format (EHD1 = 0x10, EHD2 = 0x81)
pub const EL_HEADER_SPECIFIED: u16 = 0x1081;

/// EHD for the arbitrary message format, captured opaquely
pub const EL_HEADER_ARBITRARY: u16 = 0x1082;

/// Smallest decodable frame: EHD(2) TID(2) SEOJ(3) DEOJ(3) ESV(1) OPC(1) EPC(1) PDC(1)
pub const EL_MIN_FRAME_LEN: usize = 14;

/// UDP port used by ECHONET Lite (3610)
pub const EL_UDP_PORT: u16 = 0x0E1A;

// ----------------------------------------------------------------------------
// Service codes (ESV)
// ----------------------------------------------------------------------------

pub const ESV_SETI: u8 = 0x60;
pub const ESV_SETC: u8 = 0x61;
pub const ESV_GET: u8 = 0x62;
pub const ESV_INF_REQ: u8 = 0x63;
pub const ESV_SETGET: u8 = 0x6E;
pub const ESV_SET_RES: u8 = 0x71;
pub const ESV_GET_RES: u8 = 0x72;
pub const ESV_INF: u8 = 0x73;
pub const ESV_INFC: u8 = 0x74;
pub const ESV_INFC_RES: u8 = 0x7A;
pub const ESV_SETGET_RES: u8 = 0x7E;
pub const ESV_SETI_SNA: u8 = 0x50;
pub const ESV_SETC_SNA: u8 = 0x51;
pub const ESV_GET_SNA: u8 = 0x52;
pub const ESV_INF_SNA: u8 = 0x53;
pub const ESV_SETGET_SNA: u8 = 0x5E;

// ----------------------------------------------------------------------------
// Object codes (EOJ)
// ----------------------------------------------------------------------------

/// Controller object used as SEOJ for every request we send
pub const EOJ_CONTROLLER: [u8; 3] = [0x05, 0xFF, 0x01];

/// Low-voltage smart electric energy meter
pub const EOJ_SMART_METER: [u8; 3] = [0x02, 0x88, 0x01];

/// Node profile object
pub const EOJ_NODE_PROFILE: [u8; 3] = [0x0E, 0xF0, 0x01];

// ----------------------------------------------------------------------------
// Property codes (EPC)
// ----------------------------------------------------------------------------

pub const EPC_OPERATION_STATUS: u8 = 0x80;
pub const EPC_INSTALLATION_LOCATION: u8 = 0x81;
pub const EPC_STANDARD_VERSION: u8 = 0x82;
pub const EPC_IDENTIFICATION_NUMBER: u8 = 0x83;
pub const EPC_MANUFACTURER_CODE: u8 = 0x8A;
pub const EPC_PRODUCTION_NUMBER: u8 = 0x8D;
pub const EPC_STATUS_CHANGE_MAP: u8 = 0x9D;
pub const EPC_SET_PROPERTY_MAP: u8 = 0x9E;
pub const EPC_GET_PROPERTY_MAP: u8 = 0x9F;
pub const EPC_COEFFICIENT: u8 = 0xD3;
pub const EPC_INSTANCE_LIST_NOTIFICATION: u8 = 0xD5;
pub const EPC_EFFECTIVE_DIGITS: u8 = 0xD7;
pub const EPC_CUMULATIVE_ENERGY_NORMAL: u8 = 0xE0;
pub const EPC_CUMULATIVE_ENERGY_UNIT: u8 = 0xE1;
pub const EPC_INSTANTANEOUS_POWER: u8 = 0xE7;
pub const EPC_CUMULATIVE_ENERGY_FIXED_NORMAL: u8 = 0xEA;
pub const EPC_CUMULATIVE_ENERGY_FIXED_REVERSE: u8 = 0xEB;

/// Property-map EPCs that may use the bitmap (Form 2) encoding
pub const PROPERTY_MAP_EPCS: [u8; 3] = [
    EPC_STATUS_CHANGE_MAP,
    EPC_SET_PROPERTY_MAP,
    EPC_GET_PROPERTY_MAP,
];

/// PDC from which a property map is encoded as a bitmap
pub const PROPERTY_MAP_FORM2_MIN_PDC: u8 = 17;

/// Properties whose value does not change during the life of a session
pub const STATIC_EPCS: [u8; 11] = [
    EPC_OPERATION_STATUS,
    EPC_INSTALLATION_LOCATION,
    EPC_STANDARD_VERSION,
    EPC_MANUFACTURER_CODE,
    EPC_PRODUCTION_NUMBER,
    EPC_STATUS_CHANGE_MAP,
    EPC_SET_PROPERTY_MAP,
    EPC_GET_PROPERTY_MAP,
    EPC_COEFFICIENT,
    EPC_EFFECTIVE_DIGITS,
    EPC_CUMULATIVE_ENERGY_UNIT,
];

/// Properties requested by the bulk static GET
pub const STATIC_GET_EPCS: [u8; 7] = [
    EPC_INSTALLATION_LOCATION,
    EPC_STANDARD_VERSION,
    EPC_MANUFACTURER_CODE,
    EPC_PRODUCTION_NUMBER,
    EPC_STATUS_CHANGE_MAP,
    EPC_SET_PROPERTY_MAP,
    EPC_GET_PROPERTY_MAP,
];

// ----------------------------------------------------------------------------
// Dongle events
// ----------------------------------------------------------------------------

pub const EVENT_BEACON_RECEIVED: &str = "20";
pub const EVENT_SCAN_FINISHED: &str = "22";
pub const EVENT_PANA_FAILED: &str = "24";
pub const EVENT_PANA_SUCCEEDED: &str = "25";

/// Acknowledgement token for every bootstrap command
pub const ACK_TOKEN: &str = "OK";

// ----------------------------------------------------------------------------
// Session defaults
// ----------------------------------------------------------------------------

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_JOIN_RETRIES: u8 = 3;
pub const DEFAULT_SCAN_RETRY_LIMIT: u8 = 3;
pub const DEFAULT_OBSERVATION_DISPERSION: Duration = Duration::from_secs(30);
