//! Transports, retry policy, and the coordinator for XBee meshes.
//!
//! This crate turns a serial byte stream into correlated, retried
//! request/response exchanges with the coordinator radio, and runs node
//! discovery to learn which remote devices are in the mesh.
//!
//! ## Features
//!
//! - **Serial Transport**: 8N1 serial port at 57600 baud by default
//! - **Scripted Transport**: in-memory stand-in for tests and simulations
//! - **Correlation**: every request carries a fresh frame id; stale replies are dropped
//! - **Retries**: bounded full resends with an inspectable exchange report
//! - **Discovery**: windowed `ND` scans feeding a device registry
//!
//! ## Example
//!
//! ```rust,no_run
//! use xbee_session::{CoordinatorConfig, SerialTransport, XBeeCoordinator, DEFAULT_BAUD_RATE};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = SerialTransport::open("/dev/ttyUSB0", DEFAULT_BAUD_RATE)?;
//! let mut coordinator = XBeeCoordinator::connect(transport, CoordinatorConfig::default())?;
//!
//! let found = coordinator.scan_devices()?;
//! println!("{} devices", found);
//! for device in coordinator.connected_devices() {
//!     println!("{} ({})", device.identity(), device.device_type());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod retry;
pub mod transport;

// Re-export main types
pub use coordinator::{CoordinatorConfig, XBeeCoordinator, INITIAL_FRAME_ID};
pub use error::{CoordinatorError, TransportError};
pub use retry::{run_with_retries, ExchangeReport};
pub use transport::{MemTransport, Responder, SerialTransport, Transport, DEFAULT_BAUD_RATE};
