//! Device identity and remote device model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use xbee_wire::{NodeRecord, WireError};

/// Network address of the coordinator
pub const COORDINATOR_ADDRESS: u16 = 0x0000;

/// Attributes every mesh participant has
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    serial_number: u64,
    network_address: u16,
    name: Option<String>,
    hardware_version: u16,
    software_version: u16,
}

impl DeviceIdentity {
    /// Create an identity
    pub fn new(serial_number: u64, network_address: u16, name: Option<String>) -> Self {
        Self {
            serial_number,
            network_address,
            name,
            hardware_version: 0,
            software_version: 0,
        }
    }

    /// Same identity with version codes filled in
    pub fn with_versions(mut self, hardware_version: u16, software_version: u16) -> Self {
        self.hardware_version = hardware_version;
        self.software_version = software_version;
        self
    }

    /// A zero serial number marks an identity that failed to load
    pub fn is_valid(&self) -> bool {
        self.serial_number != 0
    }

    /// 64-bit serial number (the MAC address)
    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    /// 16-bit network address; only valid for the current association
    pub fn network_address(&self) -> u16 {
        self.network_address
    }

    /// Node identifier, if one is configured
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Hardware version code
    pub fn hardware_version(&self) -> u16 {
        self.hardware_version
    }

    /// Firmware version code
    pub fn software_version(&self) -> u16 {
        self.software_version
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016X}@{:04X}",
            self.serial_number, self.network_address
        )?;
        if let Some(name) = &self.name {
            write!(f, " '{}'", name)?;
        }
        Ok(())
    }
}

/// Role of a device in the mesh
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Network coordinator
    Coordinator = 0x00,
    /// Router
    Router = 0x01,
    /// (Sleeping) end device
    #[default]
    EndDevice = 0x02,
}

impl TryFrom<u8> for DeviceType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DeviceType::Coordinator),
            0x01 => Ok(DeviceType::Router),
            0x02 => Ok(DeviceType::EndDevice),
            _ => Err(WireError::DeviceType(value)),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Coordinator => "coordinator",
            DeviceType::Router => "router",
            DeviceType::EndDevice => "end device",
        };
        f.write_str(name)
    }
}

/// Opaque handle naming the coordinator that discovered a device.
///
/// Handles are unique per coordinator instance within the process and carry
/// no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CoordinatorId(u32);

impl CoordinatorId {
    /// Allocate a fresh handle
    pub fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the handle
    pub fn get(self) -> u32 {
        self.0
    }
}

/// A device reached through the coordinator, as learned from discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteDevice {
    identity: DeviceIdentity,
    parent_address: u16,
    device_type: DeviceType,
    profile_id: u16,
    manufacturer_id: u16,
    coordinator: CoordinatorId,
}

impl RemoteDevice {
    /// Build from a parsed discovery record
    pub fn from_record(coordinator: CoordinatorId, record: NodeRecord) -> Result<Self, WireError> {
        let device_type = DeviceType::try_from(record.device_type)?;
        Ok(Self {
            identity: DeviceIdentity::new(
                record.serial_number,
                record.network_address,
                record.name,
            ),
            parent_address: record.parent_address,
            device_type,
            profile_id: record.profile_id,
            manufacturer_id: record.manufacturer_id,
            coordinator,
        })
    }

    /// Parse the data of a discovery reply
    pub fn try_from_discovery_reply(
        coordinator: CoordinatorId,
        data: bytes::Bytes,
    ) -> Result<Self, WireError> {
        Self::from_record(coordinator, NodeRecord::parse(data)?)
    }

    /// Parse the data of a discovery reply, yielding an invalid device
    /// (`is_valid() == false`) when the record is malformed
    pub fn from_discovery_reply(coordinator: CoordinatorId, data: bytes::Bytes) -> Self {
        Self::try_from_discovery_reply(coordinator, data)
            .unwrap_or_else(|_| Self::invalid(coordinator))
    }

    fn invalid(coordinator: CoordinatorId) -> Self {
        Self {
            identity: DeviceIdentity::default(),
            parent_address: 0,
            device_type: DeviceType::default(),
            profile_id: 0,
            manufacturer_id: 0,
            coordinator,
        }
    }

    /// Same device with version codes filled in
    pub fn with_versions(mut self, hardware_version: u16, software_version: u16) -> Self {
        self.identity = self
            .identity
            .with_versions(hardware_version, software_version);
        self
    }

    /// Identity attributes
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// See [`DeviceIdentity::is_valid`]
    pub fn is_valid(&self) -> bool {
        self.identity.is_valid()
    }

    /// 64-bit serial number
    pub fn serial_number(&self) -> u64 {
        self.identity.serial_number()
    }

    /// 16-bit network address
    pub fn network_address(&self) -> u16 {
        self.identity.network_address()
    }

    /// Node identifier
    pub fn name(&self) -> Option<&str> {
        self.identity.name()
    }

    /// Network address of the parent this device associates through
    pub fn parent_address(&self) -> u16 {
        self.parent_address
    }

    /// Role in the mesh
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Application profile id
    pub fn profile_id(&self) -> u16 {
        self.profile_id
    }

    /// Manufacturer id
    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    /// Coordinator that discovered this device
    pub fn coordinator(&self) -> CoordinatorId {
        self.coordinator
    }
}
