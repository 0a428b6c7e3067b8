//! Node discovery reply records.
//!
//! Each remote device answers a broadcast `ND` with one AT command response
//! whose data field carries the record below.
//!
//! ```text
//! +-----+---------+---------+--------+--------+------+--------+---------+--------------+------+------+
//! | MY  | SH      | SL      | NI\0   | PARENT | TYPE | STATUS | PROFILE | MANUFACTURER | DD?  | RSSI?|
//! | u16 | u32     | u32     | cstr   | u16    | u8   | u8     | u16     | u16          | u32  | u8   |
//! +-----+---------+---------+--------+--------+------+--------+---------+--------------+------+------+
//! ```

use crate::buffer::ReadBuffer;
use crate::WireError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Parsed node discovery record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// 16-bit network address
    pub network_address: u16,
    /// 64-bit serial number (SH << 32 | SL)
    pub serial_number: u64,
    /// Node identifier, `None` when not configured
    pub name: Option<String>,
    /// Network address of the parent
    pub parent_address: u16,
    /// Raw device type code
    pub device_type: u8,
    /// Reserved status byte
    pub status: u8,
    /// Application profile id
    pub profile_id: u16,
    /// Manufacturer id
    pub manufacturer_id: u16,
    /// Device type identifier, present when enabled with `NO`
    pub device_identifier: Option<u32>,
    /// RSSI of the last hop, present when enabled with `NO`
    pub rssi: Option<u8>,
}

impl NodeRecord {
    /// Parse a record from the data of an `ND` response
    pub fn parse(data: Bytes) -> Result<Self, WireError> {
        let mut rd = ReadBuffer::new(data);

        let network_address = rd.read_u16()?;
        let high = rd.read_u32()? as u64;
        let low = rd.read_u32()? as u64;
        let name = rd.read_cstr()?;
        let parent_address = rd.read_u16()?;
        let device_type = rd.read_u8()?;
        let status = rd.read_u8()?;
        let profile_id = rd.read_u16()?;
        let manufacturer_id = rd.read_u16()?;

        let (device_identifier, rssi) = match rd.remaining() {
            0 => (None, None),
            1 => (None, Some(rd.read_u8()?)),
            4 => (Some(rd.read_u32()?), None),
            5 => (Some(rd.read_u32()?), Some(rd.read_u8()?)),
            _ => return Err(WireError::Malformed("trailing bytes in discovery record")),
        };

        Ok(Self {
            network_address,
            serial_number: (high << 32) | low,
            name: if name.trim().is_empty() {
                None
            } else {
                Some(name)
            },
            parent_address,
            device_type,
            status,
            profile_id,
            manufacturer_id,
            device_identifier,
            rssi,
        })
    }
}

/// Build the data of an `ND` response for a record; used by simulators and tests
pub fn encode_record(record: &NodeRecord) -> Bytes {
    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(&record.network_address.to_be_bytes());
    out.extend_from_slice(&record.serial_number.to_be_bytes());
    if let Some(name) = &record.name {
        out.extend_from_slice(name.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&record.parent_address.to_be_bytes());
    out.push(record.device_type);
    out.push(record.status);
    out.extend_from_slice(&record.profile_id.to_be_bytes());
    out.extend_from_slice(&record.manufacturer_id.to_be_bytes());
    if let Some(dd) = record.device_identifier {
        out.extend_from_slice(&dd.to_be_bytes());
    }
    if let Some(rssi) = record.rssi {
        out.push(rssi);
    }
    Bytes::from(out)
}
