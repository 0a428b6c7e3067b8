//! Device identities, discovered remote devices, and the scan registry.
//!
//! A mesh consists of one coordinator attached to the host and any number of
//! remote devices found by broadcasting a node discovery command. This crate
//! models both sides and keeps the snapshot of the last completed scan.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod registry;

pub use device::{CoordinatorId, DeviceIdentity, DeviceType, RemoteDevice, COORDINATOR_ADDRESS};
pub use registry::{DeviceRegistry, RegistryStats};
