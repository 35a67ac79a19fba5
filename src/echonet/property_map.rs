//! # Property Maps
//!
//! `9D`/`9E`/`9F` carry the set of properties an object supports. Up to 15
//! codes are listed directly (Form 1: count followed by the codes). From 16
//! codes on, the EDT is a count followed by a 16-byte bitmap (Form 2): bit
//! `b` of byte `y` (1..=16) stands for code `0x80 + 16 * b + (y - 1)`.

use crate::echonet::frame::DecodeError;
use crate::echonet::property::PropertyList;

const BITMAP_LEN: usize = 16;

/// Ordered set of property codes advertised by an object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyMap {
    codes: Vec<u8>,
}

impl PropertyMap {
    pub fn new(mut codes: Vec<u8>) -> Self {
        codes.sort_unstable();
        codes.dedup();
        PropertyMap { codes }
    }

    /// Decodes an EDT in whichever form its length indicates.
    pub fn decode(edt: &[u8]) -> Result<Self, DecodeError> {
        if edt.len() > BITMAP_LEN {
            Self::from_form2(edt)
        } else {
            Self::from_form1(edt)
        }
    }

    /// Count byte followed by that many codes.
    pub fn from_form1(edt: &[u8]) -> Result<Self, DecodeError> {
        let (&count, codes) = edt.split_first().ok_or(DecodeError::PropertyMap(0))?;
        let codes = codes
            .get(..count as usize)
            .ok_or(DecodeError::PropertyMap(edt.len()))?;
        Ok(PropertyMap::new(codes.to_vec()))
    }

    /// Count byte followed by the 16-byte bitmap. The count byte is not trusted;
    /// the set bits are authoritative.
    pub fn from_form2(edt: &[u8]) -> Result<Self, DecodeError> {
        let bitmap = edt
            .get(1..=BITMAP_LEN)
            .ok_or(DecodeError::PropertyMap(edt.len()))?;

        let mut codes = Vec::new();
        let mut code: u8 = 0x80;
        for bit in 0..8 {
            for &byte in bitmap {
                if (byte >> bit) & 0x01 == 0x01 {
                    codes.push(code);
                }
                code = code.wrapping_add(1);
            }
        }

        Ok(PropertyMap { codes })
    }

    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub fn contains(&self, epc: u8) -> bool {
        self.codes.binary_search(&epc).is_ok()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Count byte of either form; a map of every code saturates at 255.
    fn count(&self) -> u8 {
        u8::try_from(self.codes.len()).unwrap_or(u8::MAX)
    }

    /// Form-1 EDT: count followed by the codes.
    pub fn to_form1(&self) -> Vec<u8> {
        let mut edt = Vec::with_capacity(self.codes.len() + 1);
        edt.push(self.count());
        edt.extend_from_slice(&self.codes);
        edt
    }

    /// Form-2 EDT: count followed by the bitmap. Codes below 0x80 cannot be represented and are skipped.
    pub fn to_form2(&self) -> Vec<u8> {
        let mut edt = vec![0u8; BITMAP_LEN + 1];
        edt[0] = self.count();
        for &code in self.codes.iter().filter(|&&c| c >= 0x80) {
            let offset = code - 0x80;
            let byte = (offset % 16) as usize;
            let bit = offset / 16;
            edt[1 + byte] |= 1 << bit;
        }
        edt
    }

    /// GET placeholders for every advertised property.
    pub fn to_get_list(&self) -> PropertyList {
        PropertyList::with_empty(&self.codes)
    }
}
