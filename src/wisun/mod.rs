//! The wisun module contains the Wi-SUN dongle side of the B-route: line
//! demultiplexing, dongle command profiles, PAN descriptors, ERXUDP datagram
//! extraction, the command sender, the connection session and the serial
//! transport.

pub mod datagram;
pub mod demux;
pub mod dongle;
pub mod pan;
pub mod sender;
pub mod session;
pub mod transport;

pub use datagram::{extract_datagrams, Datagram, PeerInfo};
pub use demux::{demultiplex, Batch};
pub use dongle::{Command, CommandOverrides, CommandSet, DongleKind, DongleProfile, PayloadEncoding};
pub use pan::PanDescriptor;
pub use sender::{CommandSender, ObjectPair, Outbound};
pub use session::{Action, Notification, Request, Session, SessionState, Status};
pub use transport::{open_serial, ChunkReader, DonglePort};
