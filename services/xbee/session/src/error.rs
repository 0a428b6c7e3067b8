//! Transport and coordinator error types.

use thiserror::Error;
use xbee_wire::{AtName, CommandStatus, FrameType, WireError};

/// Byte-stream level failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport was closed or never opened
    #[error("transport is not open")]
    NotOpen,

    /// No complete frame arrived before the deadline
    #[error("read timed out")]
    Timeout,

    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Coordinator operation failures
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Transport failed for this operation
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A received frame failed length, checksum or field validation
    #[error("frame integrity error: {0}")]
    Integrity(#[from] WireError),

    /// Only frames for other requests arrived
    #[error("expected {expected_type:?} with frame id {expected_id}, discarded {discarded} other frames")]
    Mismatch {
        /// Response type being waited for
        expected_type: FrameType,
        /// Frame id of the outstanding request
        expected_id: u8,
        /// Frames dropped while waiting
        discarded: usize,
    },

    /// `receive` was called with no request sent
    #[error("no request outstanding")]
    NoRequestOutstanding,

    /// The radio answered with a non-OK command status
    #[error("AT command {command} failed: {status:?}")]
    CommandFailed {
        /// Command that failed
        command: AtName,
        /// Status reported by the radio
        status: CommandStatus,
    },

    /// A register value could not be interpreted
    #[error("unexpected value for AT command {command}: {len} bytes")]
    Register {
        /// Command whose value was read
        command: AtName,
        /// Length of the value
        len: usize,
    },

    /// Every attempt of a retried exchange failed
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Failure of the final attempt
        last: Box<CoordinatorError>,
    },

    /// The device was discovered by a different coordinator
    #[error("device {serial:016X} belongs to another coordinator")]
    ForeignDevice {
        /// Serial number of the device
        serial: u64,
    },

    /// The radio reported that a transmission was not delivered
    #[error("delivery to {dest16:04X} failed with status 0x{status:02X}")]
    DeliveryFailed {
        /// Destination network address
        dest16: u16,
        /// Delivery status code
        status: u8,
    },
}

impl CoordinatorError {
    /// Whether the failure is a read timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            CoordinatorError::Transport(TransportError::Timeout) => true,
            CoordinatorError::RetriesExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}
