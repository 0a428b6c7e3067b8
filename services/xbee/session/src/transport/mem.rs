//! In-memory transport for tests and simulations.

use super::Transport;
use crate::error::TransportError;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::time::Duration;
use xbee_wire::{decode_frame, encode_frame, ApiFrame, FrameType, WireError};

/// Hook that answers each written frame with zero or more inbound spans
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Bytes> + Send>;

/// Scripted transport.
///
/// Reads pop queued spans and report `Timeout` once the queue is empty,
/// without sleeping. Writes are recorded and handed to the responder, if one
/// is installed.
#[derive(Default)]
pub struct MemTransport {
    inbound: VecDeque<Bytes>,
    written: Vec<Bytes>,
    responder: Option<Responder>,
    failing_writes: usize,
    reads: usize,
    closed: bool,
}

impl MemTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that answers writes with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Bytes> + Send + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    /// Queue a raw span for reading
    pub fn push_inbound(&mut self, span: Bytes) {
        self.inbound.push_back(span);
    }

    /// Encode and queue a frame for reading
    pub fn push_frame(&mut self, frame_type: FrameType, data: &[u8]) -> Result<(), WireError> {
        let span = encode_frame(frame_type, data)?;
        self.inbound.push_back(span);
        Ok(())
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&mut self, count: usize) {
        self.failing_writes = count;
    }

    /// Spans written so far, including failed writes
    pub fn written(&self) -> &[Bytes] {
        &self.written
    }

    /// Written spans decoded back into frames
    pub fn written_frames(&self) -> Result<Vec<ApiFrame>, WireError> {
        self.written.iter().map(|span| decode_frame(span)).collect()
    }

    /// Number of read calls made
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Spans still queued
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }
}

impl fmt::Debug for MemTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTransport")
            .field("inbound", &self.inbound.len())
            .field("written", &self.written.len())
            .field("responder", &self.responder.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport for MemTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotOpen);
        }
        self.written.push(Bytes::copy_from_slice(frame));

        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }

        if let Some(responder) = self.responder.as_mut() {
            self.inbound.extend(responder(frame));
        }
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> Result<Bytes, TransportError> {
        if self.closed {
            return Err(TransportError::NotOpen);
        }
        self.reads += 1;
        self.inbound.pop_front().ok_or(TransportError::Timeout)
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) {
        self.closed = true;
        self.inbound.clear();
    }
}
