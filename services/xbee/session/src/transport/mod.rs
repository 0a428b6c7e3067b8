//! Byte-stream transports that carry escaped API frames.
//!
//! A transport delivers whole frame spans (start delimiter included, still
//! escaped) and accepts already encoded frames for writing. Decoding and
//! validation belong to the coordinator.

use crate::error::TransportError;
use bytes::Bytes;
use std::time::Duration;

pub mod mem;
pub mod serial;

pub use mem::{MemTransport, Responder};
pub use serial::{SerialTransport, DEFAULT_BAUD_RATE};

/// Duplex frame channel to a radio
pub trait Transport {
    /// Write one encoded frame
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Block until one complete frame span arrives or `timeout` elapses
    fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Whether the transport can still be used
    fn is_open(&self) -> bool;

    /// Release the underlying resource; later calls fail with `NotOpen`
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).write(frame)
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        (**self).read_frame(timeout)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
