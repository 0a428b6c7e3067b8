//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete frame (need more data)
    #[error("incomplete frame")]
    Incomplete,

    /// Span does not start with the start delimiter
    #[error("bad start delimiter 0x{0:02X}")]
    Delimiter(u8),

    /// Declared length does not match the bytes present
    #[error("length mismatch: declared {declared}, present {present}")]
    Length {
        /// Length from the frame header
        declared: usize,
        /// Frame data bytes actually present
        present: usize,
    },

    /// Checksum mismatch
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum {
        /// Checksum computed over the frame data
        expected: u8,
        /// Checksum carried by the frame
        actual: u8,
    },

    /// Escape byte at the end of the span
    #[error("dangling escape")]
    Escape,

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Frame of a different type than the one being parsed
    #[error("unexpected type 0x{actual:02X}, expected 0x{expected:02X}")]
    UnexpectedType {
        /// Frame type the parser handles
        expected: u8,
        /// Frame type that was received
        actual: u8,
    },

    /// Cursor read or write past the end of the buffer
    #[error("buffer overrun: need {need}, remaining {remaining}")]
    Overrun {
        /// Bytes requested
        need: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Unknown device type code in a discovery record
    #[error("unknown device type {0}")]
    DeviceType(u8),

    /// AT command name is not two ASCII characters
    #[error("invalid AT command {0:?}")]
    Command(String),

    /// Malformed frame structure
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}
