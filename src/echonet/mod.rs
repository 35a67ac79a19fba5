//! The echonet module contains the ECHONET Lite application layer: the frame
//! codec, property lists and maps, object identifiers and the facilities
//! registry fed by inbound frames.

pub mod facilities;
pub mod frame;
pub mod object;
pub mod property;
pub mod property_map;

pub use facilities::{deliver, Delivery, Facilities, FacilitiesWatch, Found, IdentificationNumber, SearchResult};
pub use frame::{encode_get, encode_multi_get, encode_opc1, DecodeError, ElData, ElFrame};
pub use object::{Eoj, Tid, TransactionCounter};
pub use property::{Property, PropertyList};
pub use property_map::PropertyMap;
