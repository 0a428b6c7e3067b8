//! Rendering of scan results.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use xbee_topology::{DeviceIdentity, DeviceRegistry, RegistryStats, RemoteDevice};

/// One completed scan as printed by the host
#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub scan: u32,
    pub scanned_at: DateTime<Utc>,
    pub coordinator: &'a DeviceIdentity,
    pub stats: RegistryStats,
    pub devices: &'a [RemoteDevice],
}

impl<'a> ScanReport<'a> {
    pub fn new(scan: u32, coordinator: &'a DeviceIdentity, registry: &'a DeviceRegistry) -> Self {
        Self {
            scan,
            scanned_at: Utc::now(),
            coordinator,
            stats: registry.stats(),
            devices: registry.devices(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "Scan {} at {} via {}: {} devices ({} routers, {} end devices)\n",
            self.scan,
            self.scanned_at.format("%Y-%m-%d %H:%M:%S"),
            self.coordinator,
            self.stats.total_devices,
            self.stats.routers,
            self.stats.end_devices
        );
        out.push_str(&render_table(self.devices));
        out
    }
}

/// Fixed-width table of devices
pub fn render_table(devices: &[RemoteDevice]) -> String {
    let mut out = format!(
        "{:<18}{:<6}{:<8}{:<12}{:<10}NAME\n",
        "SERIAL", "ADDR", "PARENT", "TYPE", "VERSION"
    );
    for device in devices {
        let identity = device.identity();
        let version = if identity.hardware_version() == 0 && identity.software_version() == 0 {
            "-".to_string()
        } else {
            format!("{:X}/{:X}", identity.hardware_version(), identity.software_version())
        };
        out.push_str(&format!(
            "{:016X}  {:04X}  {:04X}    {:<12}{:<10}{}\n",
            device.serial_number(),
            device.network_address(),
            device.parent_address(),
            device.device_type().to_string(),
            version,
            device.name().unwrap_or("-")
        ));
    }
    out
}
