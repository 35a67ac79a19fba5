//! # Dongle Transport
//!
//! Opening the serial line to the dongle and cutting its output into chunks.
//!
//! A chunk is everything received up to and including the last CR/LF seen so
//! far; bytes after it stay buffered until the next line ending arrives. For
//! dongles that send `ERXUDP` payloads as raw bytes, a CR/LF inside a payload
//! that has not fully arrived is not a chunk end. The
//! stack above works on any `AsyncRead + AsyncWrite` port, so an in-memory
//! pipe can stand in for the serial line.

use crate::config::SerialConfig;
use crate::error::SmartMeterError;
use crate::wisun::datagram::last_raw_message;
use crate::wisun::dongle::{DongleProfile, PayloadEncoding};
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Anything the driver can talk to the dongle through.
pub trait DonglePort: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> DonglePort for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens the dongle's serial port, 8N1 at the configured baud rate.
pub fn open_serial(config: &SerialConfig) -> Result<SerialStream, SmartMeterError> {
    info!("opening {} at {} baud", config.port, config.baud_rate);
    tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(config.read_timeout())
        .open_native_async()
        .map_err(|e| SmartMeterError::SerialPortError(format!("{}: {}", config.port, e)))
}

/// Buffers inbound bytes and yields CR/LF-terminated chunks.
#[derive(Debug)]
pub struct ChunkReader<R> {
    reader: R,
    buf: BytesMut,
    raw_header_tokens: Option<usize>,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, 1024)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        ChunkReader {
            reader,
            buf: BytesMut::with_capacity(capacity),
            raw_header_tokens: None,
        }
    }

    /// A reader that keeps every raw-bytes `ERXUDP` of `profile` in one chunk.
    pub fn for_profile(reader: R, profile: &DongleProfile) -> Self {
        let chunks = Self::new(reader);
        match profile.payload {
            PayloadEncoding::RawBytes => chunks.with_raw_payloads(profile.erxudp_header_tokens),
            PayloadEncoding::HexToken => chunks,
        }
    }

    /// Holds back a chunk end that falls inside a raw `ERXUDP` payload with
    /// `header_tokens` header fields.
    pub fn with_raw_payloads(mut self, header_tokens: usize) -> Self {
        self.raw_header_tokens = Some(header_tokens);
        self
    }

    /// Next chunk, or `None` once the port reached end of stream.
    ///
    /// Cancel safe: bytes read before cancellation stay buffered.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.take_chunk() {
                return Ok(Some(chunk));
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                if !self.buf.is_empty() {
                    debug!("port closed with {} unterminated bytes", self.buf.len());
                }
                return Ok(None);
            }
        }
    }

    /// Splits off everything up to the last CR/LF, if there is one.
    fn take_chunk(&mut self) -> Option<Bytes> {
        let mut end = line_end(&self.buf)?;
        if let Some(tokens) = self.raw_header_tokens {
            if let Some((start, payload_end)) = last_raw_message(&self.buf, end, tokens) {
                // The payload is followed by its own CR/LF
                if end < payload_end + 2 {
                    debug!("ERXUDP payload incomplete, waiting for {} more bytes", (payload_end + 2).saturating_sub(self.buf.len()));
                    end = line_end(&self.buf[..start])?;
                }
            }
        }
        Some(self.buf.split_to(end).freeze())
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).rposition(|w| w == b"\r\n").map(|at| at + 2)
}
