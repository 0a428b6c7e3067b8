//! Encoding and decoding of escaped API frames.
//!
//! ```text
//! +------+--------+--------+------------+------------------+----------+
//! | 0x7E | len_hi | len_lo | frame type | frame-specific.. | checksum |
//! +------+--------+--------+------------+------------------+----------+
//! ```
//!
//! `len` counts the frame type and frame-specific bytes. The checksum is
//! `0xFF` minus the low byte of the sum of those same bytes. Every byte after
//! the delimiter that collides with a control byte is sent as `0x7D` followed
//! by the byte XOR `0x20`.

use crate::frame::{ApiFrame, FrameType};
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};

/// Start delimiter
pub const START_DELIMITER: u8 = 0x7E;
/// Escape marker
pub const ESCAPE: u8 = 0x7D;
/// Value XORed onto escaped bytes
pub const ESCAPE_XOR: u8 = 0x20;
/// Software flow control on
pub const XON: u8 = 0x11;
/// Software flow control off
pub const XOFF: u8 = 0x13;

/// Whether `byte` must be escaped on the wire
pub fn needs_escape(byte: u8) -> bool {
    matches!(byte, START_DELIMITER | ESCAPE | XON | XOFF)
}

/// Checksum over unescaped frame data (type byte included)
pub fn checksum(frame_data: &[u8]) -> u8 {
    let sum = frame_data
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    0xFF - sum
}

fn put_escaped(buf: &mut BytesMut, byte: u8) {
    if needs_escape(byte) {
        buf.put_u8(ESCAPE);
        buf.put_u8(byte ^ ESCAPE_XOR);
    } else {
        buf.put_u8(byte);
    }
}

/// Encode a frame type and its frame-specific data into an escaped span
pub fn encode_frame(frame_type: FrameType, data: &[u8]) -> Result<Bytes, WireError> {
    let len = data.len() + 1;
    if len > u16::MAX as usize {
        return Err(WireError::Size(len));
    }

    let mut buf = BytesMut::with_capacity(2 * (len + 3));
    buf.put_u8(START_DELIMITER);
    for byte in (len as u16).to_be_bytes() {
        put_escaped(&mut buf, byte);
    }

    let kind = frame_type.code();
    put_escaped(&mut buf, kind);
    let mut sum = kind;
    for &byte in data {
        put_escaped(&mut buf, byte);
        sum = sum.wrapping_add(byte);
    }
    put_escaped(&mut buf, 0xFF - sum);

    Ok(buf.freeze())
}

/// Remove escaping from the bytes following the start delimiter
pub fn unescape(raw: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter();
    while let Some(&byte) = iter.next() {
        if byte == ESCAPE {
            let next = iter.next().ok_or(WireError::Escape)?;
            out.push(next ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

/// Decode one escaped span into a validated frame.
///
/// Truncated input, length mismatches and bad checksums are rejected; no
/// partially populated frame is ever returned.
pub fn decode_frame(span: &[u8]) -> Result<ApiFrame, WireError> {
    let (&first, rest) = span.split_first().ok_or(WireError::Incomplete)?;
    if first != START_DELIMITER {
        return Err(WireError::Delimiter(first));
    }

    let body = unescape(rest)?;
    if body.len() < 2 {
        return Err(WireError::Incomplete);
    }

    let declared = u16::from_be_bytes([body[0], body[1]]) as usize;
    let present = body.len() - 2;
    // frame data plus one checksum byte
    if present != declared + 1 || declared == 0 {
        return Err(WireError::Length {
            declared,
            present: present.saturating_sub(1),
        });
    }

    let frame_data = &body[2..2 + declared];
    let carried = body[2 + declared];
    let expected = checksum(frame_data);
    if carried != expected {
        return Err(WireError::Checksum {
            expected,
            actual: carried,
        });
    }

    let frame_type = FrameType::from_code(frame_data[0]);
    Ok(ApiFrame::new(
        frame_type,
        Bytes::copy_from_slice(&frame_data[1..]),
    ))
}
