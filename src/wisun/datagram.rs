//! Extraction of UDP datagrams from `ERXUDP` events.
//!
//! ```text
//! ERXUDP SENDER DEST RPORT LPORT SENDERLLA SECURED DATALEN DATA                (hex token)
//! ERXUDP SENDER DEST RPORT LPORT SENDERLLA RSSI SECURED SIDE DATALEN <bytes>   (raw bytes)
//! ```
//!
//! With the hex-token encoding the payload is the last token of a message of
//! exactly the configured arity. With raw bytes the payload may contain any
//! byte, including blanks and line breaks, so it is sliced from the received
//! chunk using the declared data length instead of the token stream.

use crate::util::hex::decode_hex;
use crate::wisun::demux::Batch;
use crate::wisun::dongle::{DongleProfile, PayloadEncoding};
use log::debug;
use nom::bytes::complete::{tag, take, take_till1};
use nom::error::{make_error, ErrorKind};
use nom::multi::count;
use nom::sequence::preceded;
use nom::IResult;
use serde::Serialize;

const ERXUDP: &str = "ERXUDP";

/// Sender of a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub address: String,
    pub port: u16,
}

/// One received UDP datagram with its EL payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub peer: PeerInfo,
    pub payload: Vec<u8>,
}

/// Collects the datagrams of one chunk, in arrival order.
///
/// Messages that are not `ERXUDP` events, or that do not have the shape the
/// profile expects, are skipped.
pub fn extract_datagrams(batch: &Batch, chunk: &[u8], profile: &DongleProfile) -> Vec<Datagram> {
    match profile.payload {
        PayloadEncoding::HexToken => from_hex_tokens(batch, profile.erxudp_header_tokens + 1),
        PayloadEncoding::RawBytes => from_raw_chunk(chunk, profile.erxudp_header_tokens),
    }
}

fn from_hex_tokens(batch: &Batch, arity: usize) -> Vec<Datagram> {
    let mut out = Vec::new();

    for msg in &batch.msgs {
        if msg.len() != arity || msg[0] != ERXUDP {
            continue;
        }
        let Some(peer) = peer_info(&msg[1], &msg[3]) else {
            debug!("ERXUDP with invalid port {}, ignored", msg[3]);
            continue;
        };
        match decode_hex(&msg[arity - 1]) {
            Ok(payload) => out.push(Datagram { peer, payload }),
            Err(e) => debug!("ERXUDP payload from {} is not hex: {}", peer.address, e),
        }
    }

    out
}

fn from_raw_chunk(chunk: &[u8], header_tokens: usize) -> Vec<Datagram> {
    let mut out = Vec::new();
    let mut rest = chunk;
    let marker = ERXUDP.as_bytes();

    while let Some(at) = rest.windows(marker.len()).position(|w| w == marker) {
        match raw_message(&rest[at..], header_tokens) {
            Ok((tail, (fields, payload))) => {
                let sender = String::from_utf8_lossy(fields[0]);
                let port = String::from_utf8_lossy(fields[2]);
                match peer_info(&sender, &port) {
                    Some(peer) => out.push(Datagram {
                        peer,
                        payload: payload.to_vec(),
                    }),
                    None => debug!("ERXUDP with invalid port {}, ignored", port),
                }
                rest = tail;
            }
            Err(_) => {
                debug!("malformed ERXUDP header, ignored");
                rest = &rest[at + marker.len()..];
            }
        }
    }

    out
}

fn is_separator(b: u8) -> bool {
    matches!(b, b' ' | b'\r' | b'\n')
}

/// `ERXUDP` followed by the header fields, a blank and DATALEN raw bytes.
fn raw_message(input: &[u8], header_tokens: usize) -> IResult<&[u8], (Vec<&[u8]>, &[u8])> {
    let (input, (fields, len)) = raw_header(input, header_tokens)?;
    let (input, payload) = take(len)(input)?;
    Ok((input, (fields, payload)))
}

/// `ERXUDP` and its header fields up to the blank before the payload, with DATALEN.
fn raw_header(input: &[u8], header_tokens: usize) -> IResult<&[u8], (Vec<&[u8]>, usize)> {
    let (input, _) = tag(ERXUDP)(input)?;
    let (input, fields) = count(preceded(tag(" "), take_till1(is_separator)), header_tokens.saturating_sub(1))(input)?;

    let len = fields
        .last()
        .and_then(|f| std::str::from_utf8(f).ok())
        .and_then(|s| usize::from_str_radix(s, 16).ok());
    let Some(len) = len.filter(|_| fields.len() >= 3) else {
        return Err(nom::Err::Error(make_error(input, ErrorKind::HexDigit)));
    };

    let (input, _) = tag(" ")(input)?;
    Ok((input, (fields, len)))
}

/// Start of the last raw `ERXUDP` beginning before `limit`, and the offset
/// just past its payload. Needs a complete header; the payload itself may
/// not have arrived yet.
pub(crate) fn last_raw_message(buf: &[u8], limit: usize, header_tokens: usize) -> Option<(usize, usize)> {
    let marker = ERXUDP.as_bytes();
    let start = buf[..limit.min(buf.len())]
        .windows(marker.len())
        .rposition(|w| w == marker)?;
    let message = &buf[start..];
    let (payload, (_, len)) = raw_header(message, header_tokens).ok()?;
    Some((start, start + (message.len() - payload.len()) + len))
}

fn peer_info(address: &str, port: &str) -> Option<PeerInfo> {
    Some(PeerInfo {
        address: address.to_string(),
        port: u16::from_str_radix(port, 16).ok()?,
    })
}
