//! API frame codec, typed packets, and discovery records for XBee radios.
//!
//! This crate provides the low-level wire protocol the host speaks to an XBee
//! module in API mode 2 (escaped): frame encoding and checksum validation,
//! splitting a serial byte stream into frames, bounds-checked buffer cursors,
//! typed request/response packets, and node discovery record parsing.
//!
//! ## Features
//!
//! - **Escaped Framing**: delimiter, big-endian length, 8-bit checksum
//! - **Stream Splitting**: resynchronizes on noise and truncated frames
//! - **Checked Cursors**: explicit overrun errors instead of panics
//! - **Typed Packets**: requests name the response type that answers them
//!
//! ## Wire Format
//!
//! ```text
//! +------+--------------+---------------------------+----------+
//! | 0x7E | u16 length   | frame type + frame data   | checksum |
//! +------+--------------+---------------------------+----------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod buffer;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod frame;

// Re-export main types
pub use api::{
    at, AtCommand, AtCommandResponse, AtName, AtParameter, CommandStatus, DeliveryStatus, Packet,
    ReceiveOptions, ReceivePacket, RemoteAtCommand, RemoteAtCommandResponse,
    RemoteCommandOptions, Request, Response, TransmitOptions, TransmitRequest, TransmitStatus,
    UNKNOWN_ADDR16,
};
pub use buffer::{ReadBuffer, WriteBuffer};
pub use codec::{checksum, decode_frame, encode_frame, START_DELIMITER};
pub use discovery::{encode_record, NodeRecord};
pub use error::WireError;
pub use frame::{ApiFrame, FrameDecoder, FrameType, DEFAULT_MAX_FRAME_DATA};
