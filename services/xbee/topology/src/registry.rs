//! Registry of devices found by the most recent discovery scan.

use crate::device::{DeviceType, RemoteDevice};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Snapshot of the mesh as seen by the last completed scan.
///
/// A completed scan replaces the whole registry: a device that stopped
/// answering is forgotten rather than kept with a stale network address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// Devices in the order their replies arrived
    devices: Vec<RemoteDevice>,
    /// Serial number -> index into `devices`
    by_serial: HashMap<u64, usize>,
    /// Number of completed scans
    generation: u64,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the result of a completed scan.
    ///
    /// Invalid devices are dropped. Repeated replies from one serial number
    /// keep the position of the first reply and the contents of the last.
    pub fn replace(&mut self, found: Vec<RemoteDevice>) -> usize {
        let previous = self.devices.len();
        self.devices.clear();
        self.by_serial.clear();

        for device in found.into_iter().filter(RemoteDevice::is_valid) {
            match self.by_serial.get(&device.serial_number()) {
                Some(&idx) => {
                    debug!(
                        "Duplicate discovery reply from {:016X}, keeping latest",
                        device.serial_number()
                    );
                    self.devices[idx] = device;
                }
                None => {
                    self.by_serial
                        .insert(device.serial_number(), self.devices.len());
                    self.devices.push(device);
                }
            }
        }

        self.generation = self.generation.wrapping_add(1);
        info!(
            "Device registry generation {}: {} devices (previously {})",
            self.generation,
            self.devices.len(),
            previous
        );
        self.devices.len()
    }

    /// Read-only view of all devices
    pub fn devices(&self) -> &[RemoteDevice] {
        &self.devices
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is known
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of completed scans installed so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look up a device by serial number
    pub fn by_serial(&self, serial_number: u64) -> Option<&RemoteDevice> {
        self.by_serial
            .get(&serial_number)
            .map(|&idx| &self.devices[idx])
    }

    /// Look up a device by network address
    pub fn by_address(&self, network_address: u16) -> Option<&RemoteDevice> {
        self.devices
            .iter()
            .find(|d| d.network_address() == network_address)
    }

    /// Look up a device by node identifier
    pub fn by_name(&self, name: &str) -> Option<&RemoteDevice> {
        self.devices.iter().find(|d| d.name() == Some(name))
    }

    /// Devices that associate through `parent_address`
    pub fn children_of(&self, parent_address: u16) -> impl Iterator<Item = &RemoteDevice> {
        self.devices
            .iter()
            .filter(move |d| d.parent_address() == parent_address)
    }

    /// Registry statistics
    pub fn stats(&self) -> RegistryStats {
        let count = |kind| self.devices.iter().filter(|d| d.device_type() == kind).count();
        RegistryStats {
            total_devices: self.devices.len(),
            coordinators: count(DeviceType::Coordinator),
            routers: count(DeviceType::Router),
            end_devices: count(DeviceType::EndDevice),
            generation: self.generation,
        }
    }
}

/// Device registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Total number of devices
    pub total_devices: usize,
    /// Devices reporting the coordinator role
    pub coordinators: usize,
    /// Routers
    pub routers: usize,
    /// End devices
    pub end_devices: usize,
    /// Completed scans
    pub generation: u64,
}
