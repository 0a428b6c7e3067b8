//! API frame structure and stream splitting.
//!
//! This module defines the frame types understood by the codec, the decoded
//! [`ApiFrame`], and the [`FrameDecoder`] that cuts a raw serial byte stream
//! into complete escaped frame spans.

use crate::codec::{ESCAPE, ESCAPE_XOR, START_DELIMITER};
use crate::WireError;
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Largest frame data length accepted by the decoder
pub const DEFAULT_MAX_FRAME_DATA: usize = 1024;

/// API frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Local AT command
    AtCommand,
    /// Transmit request to a remote device
    TransmitRequest,
    /// AT command executed on a remote device
    RemoteAtCommand,
    /// Response to a local AT command
    AtCommandResponse,
    /// Modem status notification
    ModemStatus,
    /// Delivery status of a transmit request
    TransmitStatus,
    /// Data received from a remote device
    ReceivePacket,
    /// Response to a remote AT command
    RemoteAtCommandResponse,
    /// Any other type byte, e.g. node identification indicators (0x95)
    Unknown(u8),
}

impl FrameType {
    /// Map a type byte; bytes the host has no parser for become `Unknown`
    pub fn from_code(code: u8) -> Self {
        match code {
            0x08 => FrameType::AtCommand,
            0x10 => FrameType::TransmitRequest,
            0x17 => FrameType::RemoteAtCommand,
            0x88 => FrameType::AtCommandResponse,
            0x8A => FrameType::ModemStatus,
            0x8B => FrameType::TransmitStatus,
            0x90 => FrameType::ReceivePacket,
            0x97 => FrameType::RemoteAtCommandResponse,
            other => FrameType::Unknown(other),
        }
    }

    /// Type byte on the wire
    pub fn code(self) -> u8 {
        match self {
            FrameType::AtCommand => 0x08,
            FrameType::TransmitRequest => 0x10,
            FrameType::RemoteAtCommand => 0x17,
            FrameType::AtCommandResponse => 0x88,
            FrameType::ModemStatus => 0x8A,
            FrameType::TransmitStatus => 0x8B,
            FrameType::ReceivePacket => 0x90,
            FrameType::RemoteAtCommandResponse => 0x97,
            FrameType::Unknown(code) => code,
        }
    }
}

/// A decoded, checksum-validated API frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFrame {
    /// Frame type (first byte of the frame data)
    pub frame_type: FrameType,
    /// Frame data following the type byte
    pub data: Bytes,
}

impl ApiFrame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, data: Bytes) -> Self {
        Self { frame_type, data }
    }

    /// Frame id carried by request/response frames, `None` for unsolicited ones
    pub fn frame_id(&self) -> Option<u8> {
        match self.frame_type {
            FrameType::ModemStatus | FrameType::ReceivePacket | FrameType::Unknown(_) => None,
            _ => self.data.first().copied(),
        }
    }

    /// Encode to an escaped, delimited span
    pub fn encode(&self) -> Result<Bytes, WireError> {
        crate::codec::encode_frame(self.frame_type, &self.data)
    }
}

/// Splits a raw byte stream into escaped frame spans
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_data: usize,
    discarded: u64,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_frame_data: DEFAULT_MAX_FRAME_DATA,
            discarded: 0,
        }
    }

    /// Total noise bytes dropped while searching for a start delimiter
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Cut the next complete span from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Bytes before a start
    /// delimiter are dropped. A delimiter in the middle of an unfinished
    /// frame means the previous frame lost bytes: the partial frame is
    /// dropped and `WireError::Incomplete` is returned so the caller can
    /// count it; the next call resumes at the new delimiter.
    pub fn next_span(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        match buf.iter().position(|&b| b == START_DELIMITER) {
            Some(0) => {}
            Some(skip) => {
                trace!("Dropping {} bytes before start delimiter", skip);
                self.discarded += skip as u64;
                buf.advance(skip);
            }
            None => {
                self.discarded += buf.len() as u64;
                buf.clear();
                return Ok(None);
            }
        }

        // Walk the escaped bytes after the delimiter, counting unescaped ones.
        let mut unescaped = Vec::with_capacity(3);
        let mut needed: Option<usize> = None;
        let mut count = 0usize;
        let mut i = 1;
        while i < buf.len() {
            let mut byte = buf[i];
            if byte == START_DELIMITER {
                self.discarded += i as u64;
                buf.advance(i);
                return Err(WireError::Incomplete);
            }
            if byte == ESCAPE {
                if i + 1 >= buf.len() {
                    return Ok(None);
                }
                i += 1;
                byte = buf[i] ^ ESCAPE_XOR;
            }
            i += 1;
            count += 1;

            if unescaped.len() < 2 {
                unescaped.push(byte);
                if unescaped.len() == 2 {
                    let len = u16::from_be_bytes([unescaped[0], unescaped[1]]) as usize;
                    if len > self.max_frame_data {
                        buf.advance(1);
                        return Err(WireError::Size(len));
                    }
                    // length bytes + frame data + checksum
                    needed = Some(2 + len + 1);
                }
            }

            if Some(count) == needed {
                return Ok(Some(buf.split_to(i).freeze()));
            }
        }

        Ok(None)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
