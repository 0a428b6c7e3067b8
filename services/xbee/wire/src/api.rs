//! Typed API packets.
//!
//! Requests know how to serialize themselves behind a frame id and name the
//! response type that answers them; responses parse themselves out of a
//! decoded [`ApiFrame`]. [`Packet`] covers the untyped receive path.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::frame::{ApiFrame, FrameType, DEFAULT_MAX_FRAME_DATA};
use crate::WireError;
use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// 16-bit address meaning "unknown / use the 64-bit address"
pub const UNKNOWN_ADDR16: u16 = 0xFFFE;

/// Two-character AT command name
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtName([u8; 2]);

impl AtName {
    /// Build from two raw bytes
    pub const fn new(name: [u8; 2]) -> Self {
        Self(name)
    }

    /// Raw bytes as sent on the wire
    pub fn as_bytes(&self) -> [u8; 2] {
        self.0
    }
}

impl TryFrom<&str> for AtName {
    type Error = WireError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.as_bytes() {
            [a, b] if a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric() => {
                Ok(Self([a.to_ascii_uppercase(), b.to_ascii_uppercase()]))
            }
            _ => Err(WireError::Command(value.to_string())),
        }
    }
}

impl fmt::Display for AtName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0[0] as char, self.0[1] as char)
    }
}

impl fmt::Debug for AtName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtName({})", self)
    }
}

/// Well-known AT commands used by the coordinator
pub mod at {
    use super::AtName;

    /// Serial number high
    pub const SH: AtName = AtName::new(*b"SH");
    /// Serial number low
    pub const SL: AtName = AtName::new(*b"SL");
    /// 16-bit network address
    pub const MY: AtName = AtName::new(*b"MY");
    /// Parent network address
    pub const MP: AtName = AtName::new(*b"MP");
    /// Node identifier string
    pub const NI: AtName = AtName::new(*b"NI");
    /// Hardware version
    pub const HV: AtName = AtName::new(*b"HV");
    /// Firmware version
    pub const VR: AtName = AtName::new(*b"VR");
    /// Node discover
    pub const ND: AtName = AtName::new(*b"ND");
    /// Node discover timeout
    pub const NT: AtName = AtName::new(*b"NT");
}

/// Status byte of an AT command response
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// Command succeeded
    Ok = 0,
    /// Generic error
    GenericError = 1,
    /// Unknown command
    InvalidCommand = 2,
    /// Parameter out of range
    InvalidParameter = 3,
    /// Remote command could not be delivered
    TxFailure = 4,
}

impl TryFrom<u8> for CommandStatus {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        // upper bits carry RSSI-invalid flags on some firmware
        match value & 0x0F {
            0 => Ok(CommandStatus::Ok),
            1 => Ok(CommandStatus::GenericError),
            2 => Ok(CommandStatus::InvalidCommand),
            3 => Ok(CommandStatus::InvalidParameter),
            4 => Ok(CommandStatus::TxFailure),
            _ => Err(WireError::Malformed("command status")),
        }
    }
}

bitflags! {
    /// Transmit request options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransmitOptions: u8 {
        /// Do not retry at the MAC layer
        const DISABLE_RETRIES = 0x01;
        /// Enable APS end-to-end encryption
        const APS_ENCRYPTION = 0x20;
        /// Use the extended transmission timeout (sleeping end devices)
        const EXTENDED_TIMEOUT = 0x40;
    }
}

bitflags! {
    /// Remote AT command options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RemoteCommandOptions: u8 {
        /// Disable retries
        const DISABLE_ACK = 0x01;
        /// Apply changes immediately
        const APPLY_CHANGES = 0x02;
        /// Use the extended transmission timeout
        const EXTENDED_TIMEOUT = 0x40;
    }
}

bitflags! {
    /// Receive packet options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ReceiveOptions: u8 {
        /// Packet was acknowledged
        const ACKNOWLEDGED = 0x01;
        /// Packet was a broadcast
        const BROADCAST = 0x02;
        /// Packet was encrypted with APS encryption
        const APS_ENCRYPTED = 0x20;
        /// Packet came from an end device
        const FROM_END_DEVICE = 0x40;
    }
}

/// Delivery status byte of a transmit status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus(pub u8);

impl DeliveryStatus {
    /// Delivered
    pub const SUCCESS: DeliveryStatus = DeliveryStatus(0x00);
    /// No MAC acknowledgement
    pub const MAC_ACK_FAILURE: DeliveryStatus = DeliveryStatus(0x01);
    /// Destination address not found
    pub const ADDRESS_NOT_FOUND: DeliveryStatus = DeliveryStatus(0x24);
    /// Route to the destination not found
    pub const ROUTE_NOT_FOUND: DeliveryStatus = DeliveryStatus(0x25);

    /// Whether the packet was delivered
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

/// A request frame; the coordinator assigns the frame id
pub trait Request {
    /// Frame type of the request
    const FRAME_TYPE: FrameType;
    /// Response that answers this request
    type Response: Response;

    /// Write the frame-specific bytes after the frame id
    fn write_body(&self, out: &mut WriteBuffer) -> Result<(), WireError>;

    /// Serialize into frame data carrying `frame_id`
    fn to_frame(&self, frame_id: u8) -> Result<ApiFrame, WireError> {
        let mut out = WriteBuffer::with_limit(DEFAULT_MAX_FRAME_DATA - 1);
        out.put_u8(frame_id)?;
        self.write_body(&mut out)?;
        Ok(ApiFrame::new(Self::FRAME_TYPE, out.freeze()))
    }
}

/// A response frame correlated to a request by frame id
pub trait Response: Sized {
    /// Frame type of the response
    const FRAME_TYPE: FrameType;

    /// Parse the frame data (frame id first)
    fn parse(rd: &mut ReadBuffer) -> Result<Self, WireError>;

    /// Frame id echoed from the request
    fn frame_id(&self) -> u8;

    /// Parse from a decoded frame, checking the frame type
    fn from_frame(frame: &ApiFrame) -> Result<Self, WireError> {
        if frame.frame_type != Self::FRAME_TYPE {
            return Err(WireError::UnexpectedType {
                expected: Self::FRAME_TYPE.code(),
                actual: frame.frame_type.code(),
            });
        }
        Self::parse(&mut ReadBuffer::new(frame.data.clone()))
    }
}

/// AT parameter bytes; most parameters fit inline
pub type AtParameter = SmallVec<[u8; 8]>;

/// Local AT command (0x08)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommand {
    /// Command name
    pub command: AtName,
    /// Optional parameter (empty to query)
    pub parameter: AtParameter,
}

impl AtCommand {
    /// Query a register
    pub fn query(command: AtName) -> Self {
        Self {
            command,
            parameter: AtParameter::new(),
        }
    }

    /// Set a register
    pub fn set(command: AtName, parameter: &[u8]) -> Self {
        Self {
            command,
            parameter: AtParameter::from_slice(parameter),
        }
    }
}

impl Request for AtCommand {
    const FRAME_TYPE: FrameType = FrameType::AtCommand;
    type Response = AtCommandResponse;

    fn write_body(&self, out: &mut WriteBuffer) -> Result<(), WireError> {
        out.put_slice(&self.command.as_bytes())?;
        out.put_slice(&self.parameter)
    }
}

/// Local AT command response (0x88)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommandResponse {
    /// Frame id of the request
    pub frame_id: u8,
    /// Command name echoed back
    pub command: AtName,
    /// Command status
    pub status: CommandStatus,
    /// Register value or command output
    pub data: Bytes,
}

impl Response for AtCommandResponse {
    const FRAME_TYPE: FrameType = FrameType::AtCommandResponse;

    fn parse(rd: &mut ReadBuffer) -> Result<Self, WireError> {
        Ok(Self {
            frame_id: rd.read_u8()?,
            command: AtName::new(rd.read_array()?),
            status: CommandStatus::try_from(rd.read_u8()?)?,
            data: rd.read_rest(),
        })
    }

    fn frame_id(&self) -> u8 {
        self.frame_id
    }
}

/// Remote AT command (0x17)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAtCommand {
    /// Destination 64-bit address
    pub dest64: u64,
    /// Destination 16-bit address, or [`UNKNOWN_ADDR16`]
    pub dest16: u16,
    /// Command options
    pub options: RemoteCommandOptions,
    /// Command name
    pub command: AtName,
    /// Optional parameter
    pub parameter: AtParameter,
}

impl RemoteAtCommand {
    /// Query a register on a remote device
    pub fn query(dest64: u64, dest16: u16, command: AtName) -> Self {
        Self {
            dest64,
            dest16,
            options: RemoteCommandOptions::empty(),
            command,
            parameter: AtParameter::new(),
        }
    }
}

impl Request for RemoteAtCommand {
    const FRAME_TYPE: FrameType = FrameType::RemoteAtCommand;
    type Response = RemoteAtCommandResponse;

    fn write_body(&self, out: &mut WriteBuffer) -> Result<(), WireError> {
        out.put_u64(self.dest64)?;
        out.put_u16(self.dest16)?;
        out.put_u8(self.options.bits())?;
        out.put_slice(&self.command.as_bytes())?;
        out.put_slice(&self.parameter)
    }
}

/// Remote AT command response (0x97)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAtCommandResponse {
    /// Frame id of the request
    pub frame_id: u8,
    /// Responder 64-bit address
    pub source64: u64,
    /// Responder 16-bit address
    pub source16: u16,
    /// Command name echoed back
    pub command: AtName,
    /// Command status
    pub status: CommandStatus,
    /// Register value
    pub data: Bytes,
}

impl Response for RemoteAtCommandResponse {
    const FRAME_TYPE: FrameType = FrameType::RemoteAtCommandResponse;

    fn parse(rd: &mut ReadBuffer) -> Result<Self, WireError> {
        Ok(Self {
            frame_id: rd.read_u8()?,
            source64: rd.read_u64()?,
            source16: rd.read_u16()?,
            command: AtName::new(rd.read_array()?),
            status: CommandStatus::try_from(rd.read_u8()?)?,
            data: rd.read_rest(),
        })
    }

    fn frame_id(&self) -> u8 {
        self.frame_id
    }
}

/// Transmit request (0x10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRequest {
    /// Destination 64-bit address
    pub dest64: u64,
    /// Destination 16-bit address, or [`UNKNOWN_ADDR16`]
    pub dest16: u16,
    /// Maximum hops for broadcasts, 0 for the network maximum
    pub radius: u8,
    /// Transmit options
    pub options: TransmitOptions,
    /// RF payload
    pub payload: Bytes,
}

impl TransmitRequest {
    /// Unicast `payload` to a device
    pub fn unicast(dest64: u64, dest16: u16, payload: Bytes) -> Self {
        Self {
            dest64,
            dest16,
            radius: 0,
            options: TransmitOptions::empty(),
            payload,
        }
    }
}

impl Request for TransmitRequest {
    const FRAME_TYPE: FrameType = FrameType::TransmitRequest;
    type Response = TransmitStatus;

    fn write_body(&self, out: &mut WriteBuffer) -> Result<(), WireError> {
        out.put_u64(self.dest64)?;
        out.put_u16(self.dest16)?;
        out.put_u8(self.radius)?;
        out.put_u8(self.options.bits())?;
        out.put_slice(&self.payload)
    }
}

/// Transmit status (0x8B)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitStatus {
    /// Frame id of the request
    pub frame_id: u8,
    /// 16-bit address the packet was delivered to
    pub dest16: u16,
    /// MAC-level retries used
    pub retry_count: u8,
    /// Delivery outcome
    pub delivery: DeliveryStatus,
    /// Route / address discovery overhead
    pub discovery: u8,
}

impl Response for TransmitStatus {
    const FRAME_TYPE: FrameType = FrameType::TransmitStatus;

    fn parse(rd: &mut ReadBuffer) -> Result<Self, WireError> {
        Ok(Self {
            frame_id: rd.read_u8()?,
            dest16: rd.read_u16()?,
            retry_count: rd.read_u8()?,
            delivery: DeliveryStatus(rd.read_u8()?),
            discovery: rd.read_u8()?,
        })
    }

    fn frame_id(&self) -> u8 {
        self.frame_id
    }
}

/// Data received from a remote device (0x90)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivePacket {
    /// Sender 64-bit address
    pub source64: u64,
    /// Sender 16-bit address
    pub source16: u16,
    /// Receive options
    pub options: ReceiveOptions,
    /// RF payload
    pub data: Bytes,
}

impl ReceivePacket {
    fn parse(rd: &mut ReadBuffer) -> Result<Self, WireError> {
        Ok(Self {
            source64: rd.read_u64()?,
            source16: rd.read_u16()?,
            options: ReceiveOptions::from_bits_retain(rd.read_u8()?),
            data: rd.read_rest(),
        })
    }
}

/// Any frame the coordinator may receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Local AT command response
    AtResponse(AtCommandResponse),
    /// Remote AT command response
    RemoteAtResponse(RemoteAtCommandResponse),
    /// Transmit status
    TransmitStatus(TransmitStatus),
    /// Received RF data
    Receive(ReceivePacket),
    /// Modem status code
    ModemStatus(u8),
    /// A valid frame of a type the host never expects to receive
    Other(ApiFrame),
}

impl Packet {
    /// Interpret a decoded frame
    pub fn from_frame(frame: ApiFrame) -> Result<Self, WireError> {
        let mut rd = ReadBuffer::new(frame.data.clone());
        Ok(match frame.frame_type {
            FrameType::AtCommandResponse => Packet::AtResponse(AtCommandResponse::parse(&mut rd)?),
            FrameType::RemoteAtCommandResponse => {
                Packet::RemoteAtResponse(RemoteAtCommandResponse::parse(&mut rd)?)
            }
            FrameType::TransmitStatus => Packet::TransmitStatus(TransmitStatus::parse(&mut rd)?),
            FrameType::ReceivePacket => Packet::Receive(ReceivePacket::parse(&mut rd)?),
            FrameType::ModemStatus => Packet::ModemStatus(rd.read_u8()?),
            _ => Packet::Other(frame),
        })
    }

    /// Frame id for correlated responses
    pub fn frame_id(&self) -> Option<u8> {
        match self {
            Packet::AtResponse(r) => Some(r.frame_id),
            Packet::RemoteAtResponse(r) => Some(r.frame_id),
            Packet::TransmitStatus(r) => Some(r.frame_id),
            Packet::Receive(_) | Packet::ModemStatus(_) => None,
            Packet::Other(frame) => frame.frame_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, encode_frame};

    #[test]
    fn test_at_name_parsing() {
        assert_eq!(AtName::try_from("nd").unwrap(), at::ND);
        assert_eq!(at::ND.to_string(), "ND");
        assert!(AtName::try_from("N").is_err());
        assert!(AtName::try_from("N?").is_err());
    }

    #[test]
    fn test_at_command_frame_layout() {
        let frame = AtCommand::set(AtName::new(*b"NI"), b"ab").to_frame(7).unwrap();
        assert_eq!(frame.frame_type, FrameType::AtCommand);
        assert_eq!(&frame.data[..], &[7, b'N', b'I', b'a', b'b']);
        assert_eq!(frame.frame_id(), Some(7));
    }

    #[test]
    fn test_remote_at_command_layout() {
        let frame = RemoteAtCommand::query(0x0013A200_40522BAA, 0x1234, at::MP)
            .to_frame(9)
            .unwrap();
        assert_eq!(
            &frame.data[..],
            &[9, 0x00, 0x13, 0xA2, 0x00, 0x40, 0x52, 0x2B, 0xAA, 0x12, 0x34, 0x00, b'M', b'P']
        );
    }

    #[test]
    fn test_at_response_parse() {
        let span = encode_frame(
            FrameType::AtCommandResponse,
            &[0x05, b'M', b'Y', 0x00, 0xAB, 0xCD],
        )
        .unwrap();
        let frame = decode_frame(&span).unwrap();
        let resp = AtCommandResponse::from_frame(&frame).unwrap();
        assert_eq!(resp.frame_id, 5);
        assert_eq!(resp.command, at::MY);
        assert_eq!(resp.status, CommandStatus::Ok);
        assert_eq!(&resp.data[..], &[0xAB, 0xCD]);
    }

    #[test]
    fn test_response_type_checked() {
        let frame = ApiFrame::new(FrameType::ModemStatus, Bytes::from_static(&[0x06]));
        assert_eq!(
            AtCommandResponse::from_frame(&frame),
            Err(WireError::UnexpectedType {
                expected: 0x88,
                actual: 0x8A
            })
        );
    }

    #[test]
    fn test_short_transmit_status_is_overrun() {
        let frame = ApiFrame::new(FrameType::TransmitStatus, Bytes::from_static(&[0x01, 0xFF]));
        assert!(matches!(
            TransmitStatus::from_frame(&frame),
            Err(WireError::Overrun { .. })
        ));
    }

    #[test]
    fn test_packet_dispatch() {
        let rx = ApiFrame::new(
            FrameType::ReceivePacket,
            Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 1, 0x00, 0x02, 0x02, b'h', b'i']),
        );
        match Packet::from_frame(rx).unwrap() {
            Packet::Receive(p) => {
                assert_eq!(p.source64, 1);
                assert_eq!(p.source16, 2);
                assert!(p.options.contains(ReceiveOptions::BROADCAST));
                assert_eq!(&p.data[..], b"hi");
            }
            other => panic!("unexpected packet {:?}", other),
        }

        let status = ApiFrame::new(FrameType::ModemStatus, Bytes::from_static(&[0x02]));
        let packet = Packet::from_frame(status).unwrap();
        assert_eq!(packet, Packet::ModemStatus(0x02));
        assert_eq!(packet.frame_id(), None);
    }

    #[test]
    fn test_delivery_status() {
        assert!(DeliveryStatus(0).is_success());
        assert!(!DeliveryStatus::ROUTE_NOT_FOUND.is_success());
    }
}
