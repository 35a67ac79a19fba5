//! Transaction/command sender.
//!
//! Every outbound EL request takes the next transaction id, is framed through
//! the codec and wrapped into the dongle's UDP send envelope. The caller gets
//! the tid back for optional correlation; nothing here waits for a response.

use crate::constants::{
    EL_UDP_PORT, EOJ_CONTROLLER, EOJ_NODE_PROFILE, EOJ_SMART_METER, EPC_CUMULATIVE_ENERGY_FIXED_NORMAL,
    EPC_CUMULATIVE_ENERGY_FIXED_REVERSE, EPC_GET_PROPERTY_MAP, EPC_INSTANCE_LIST_NOTIFICATION,
    EPC_INSTANTANEOUS_POWER, ESV_GET, STATIC_GET_EPCS,
};
use crate::echonet::frame::{encode_get, encode_multi_get, encode_opc1, ElData};
use crate::echonet::object::{Eoj, Tid, TransactionCounter};
use crate::wisun::dongle::DongleProfile;
use log::debug;

/// Source and destination object of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectPair {
    pub seoj: Eoj,
    pub deoj: Eoj,
}

impl ObjectPair {
    pub fn new(seoj: impl Into<Eoj>, deoj: impl Into<Eoj>) -> Self {
        ObjectPair {
            seoj: seoj.into(),
            deoj: deoj.into(),
        }
    }

    /// Controller → low-voltage smart meter.
    pub fn smart_meter() -> Self {
        Self::new(EOJ_CONTROLLER, EOJ_SMART_METER)
    }

    /// Controller → node profile.
    pub fn node_profile() -> Self {
        Self::new(EOJ_CONTROLLER, EOJ_NODE_PROFILE)
    }
}

/// A framed request ready to be written to the dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub tid: Tid,
    pub frame: ElData,
    /// Send envelope including the payload and the line terminator
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    profile: DongleProfile,
    counter: TransactionCounter,
}

impl CommandSender {
    pub fn new(profile: DongleProfile) -> Self {
        CommandSender {
            profile,
            counter: TransactionCounter::new(),
        }
    }

    pub fn with_counter(profile: DongleProfile, counter: TransactionCounter) -> Self {
        CommandSender { profile, counter }
    }

    pub fn profile(&self) -> &DongleProfile {
        &self.profile
    }

    /// Transaction id used by the last request.
    pub fn last_tid(&self) -> Tid {
        self.counter.current()
    }

    pub fn send_get(&mut self, ip: &str, objects: ObjectPair, epc: u8) -> Outbound {
        let tid = self.counter.advance();
        self.wrap(ip, encode_get(tid, objects.seoj, objects.deoj, epc))
    }

    pub fn send_multi_get(&mut self, ip: &str, objects: ObjectPair, epcs: &[u8]) -> Outbound {
        let tid = self.counter.advance();
        self.wrap(ip, encode_multi_get(tid, objects.seoj, objects.deoj, epcs))
    }

    pub fn send_opc1(&mut self, ip: &str, objects: ObjectPair, esv: u8, epc: u8, edt: &[u8]) -> Outbound {
        let tid = self.counter.advance();
        self.wrap(ip, encode_opc1(tid, objects.seoj, objects.deoj, esv, epc, edt))
    }

    pub fn get_e7(&mut self, ip: &str) -> Outbound {
        self.send_get(ip, ObjectPair::smart_meter(), EPC_INSTANTANEOUS_POWER)
    }

    pub fn get_ea(&mut self, ip: &str) -> Outbound {
        self.send_get(ip, ObjectPair::smart_meter(), EPC_CUMULATIVE_ENERGY_FIXED_NORMAL)
    }

    pub fn get_eb(&mut self, ip: &str) -> Outbound {
        self.send_get(ip, ObjectPair::smart_meter(), EPC_CUMULATIVE_ENERGY_FIXED_REVERSE)
    }

    pub fn get_9f(&mut self, ip: &str) -> Outbound {
        self.send_get(ip, ObjectPair::smart_meter(), EPC_GET_PROPERTY_MAP)
    }

    pub fn get_d5(&mut self, ip: &str) -> Outbound {
        self.send_opc1(ip, ObjectPair::node_profile(), ESV_GET, EPC_INSTANCE_LIST_NOTIFICATION, &[])
    }

    /// Bulk GET of the properties that never change during a session.
    pub fn get_static(&mut self, ip: &str) -> Outbound {
        self.send_multi_get(ip, ObjectPair::smart_meter(), &STATIC_GET_EPCS)
    }

    fn wrap(&self, ip: &str, frame: ElData) -> Outbound {
        debug!("send {} to {}", frame, ip);
        let bytes = self.profile.send_envelope(ip, EL_UDP_PORT, &frame.to_bytes());
        Outbound {
            tid: frame.tid,
            frame,
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wisun::dongle::DongleKind;

    const METER: &str = "FE80:0000:0000:0000:021C:6400:03EF:EDFD";

    #[test]
    fn test_tids_are_consecutive() {
        let mut sender = CommandSender::new(DongleProfile::default());
        let first = sender.get_e7(METER);
        let second = sender.get_ea(METER);
        assert_eq!(first.tid, Tid([0x00, 0x01]));
        assert_eq!(second.tid, Tid([0x00, 0x02]));
        assert_eq!(sender.last_tid(), Tid([0x00, 0x02]));
    }

    /// Tests that a cloned sender carries its own copy of the transaction counter.
    #[test]
    fn test_clone_keeps_counter_state() {
        let mut sender = CommandSender::new(DongleProfile::default());
        sender.get_e7(METER);
        let mut copy = sender.clone();
        assert_eq!(copy.get_ea(METER).tid, Tid([0x00, 0x02]));
        assert_eq!(sender.last_tid(), Tid([0x00, 0x01]));
    }

    #[test]
    fn test_get_e7_envelope() {
        let mut sender = CommandSender::new(DongleProfile::for_kind(DongleKind::Rl7023StickD));
        let out = sender.get_e7(METER);

        let mut expected = format!("SKSENDTO 1 {METER} 0E1A 1 000E ").into_bytes();
        expected.extend_from_slice(&[0x10, 0x81, 0x00, 0x01, 0x05, 0xFF, 0x01, 0x02, 0x88, 0x01, 0x62, 0x01, 0xE7, 0x00]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(out.bytes, expected);
    }

    #[test]
    fn test_get_static_lists_all_properties() {
        let mut sender = CommandSender::new(DongleProfile::for_kind(DongleKind::Bp35c0));
        let out = sender.get_static(METER);
        assert_eq!(out.frame.opc, 7);
        assert_eq!(out.frame.properties.epcs(), STATIC_GET_EPCS.to_vec());
        assert!(out.frame.properties.iter().all(|p| p.edt.is_empty()));
        assert!(out.bytes.starts_with(format!("SKSENDTO 1 {METER} 0E1A 1 0 001A ").as_bytes()));
    }

    #[test]
    fn test_counter_wraps() {
        let mut sender = CommandSender::with_counter(DongleProfile::default(), TransactionCounter::starting_at(Tid([0xFF, 0xFF])));
        assert_eq!(sender.get_d5(METER).tid, Tid([0x00, 0x00]));
    }
}
