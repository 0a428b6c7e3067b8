//! Serial port transport.

use super::Transport;
use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use xbee_wire::FrameDecoder;

/// Bit rate the radios ship configured for
pub const DEFAULT_BAUD_RATE: u32 = 57600;

const READ_CHUNK: usize = 256;

/// Transport over a serial port in 8N1 framing without flow control
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
    decoder: FrameDecoder,
    buffer: BytesMut,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        info!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self {
            path: path.to_string(),
            port: Some(port),
            decoder: FrameDecoder::new(),
            buffer: BytesMut::with_capacity(1024),
        })
    }

    /// Device path of the port
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Noise bytes dropped while hunting for frame starts
    pub fn discarded_bytes(&self) -> u64 {
        self.decoder.discarded()
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(frame)?;
        port.flush()?;
        trace!("Wrote {} bytes to {}", frame.len(), self.path);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match self.decoder.next_span(&mut self.buffer) {
                Ok(Some(span)) => return Ok(span),
                Ok(None) => {}
                Err(e) => {
                    // decoder has already skipped past the damage
                    debug!("Dropped damaged bytes on {}: {}", self.path, e);
                    continue;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }

            let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
            port.set_timeout(deadline - now)?;
            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    trace!("Read {} bytes, buffer now has {} bytes", n, self.buffer.len() + n);
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            self.buffer.clear();
            info!(
                "Closed serial port {} ({} noise bytes dropped)",
                self.path,
                self.discarded_bytes()
            );
        }
    }
}
