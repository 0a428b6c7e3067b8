//! The coordinator radio attached to the host.
//!
//! [`XBeeCoordinator`] owns the transport and turns it into correlated
//! request/response exchanges: every request carries a fresh frame id, and
//! only a reply of the right type echoing that id is accepted. Exchanges are
//! retried with a full resend up to the configured count. Node discovery
//! broadcasts `ND` and collects replies for a bounded window, replacing the
//! device registry with what was found.
//!
//! All operations block the calling thread. The only suspension point is the
//! transport read, which is always bounded by a timeout.

use crate::error::{CoordinatorError, TransportError};
use crate::retry::{run_with_retries, ExchangeReport};
use crate::transport::Transport;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use xbee_topology::{CoordinatorId, DeviceIdentity, DeviceRegistry, RemoteDevice};
use xbee_wire::{
    at, decode_frame, ApiFrame, AtCommand, AtName, AtParameter, CommandStatus, Packet,
    RemoteAtCommand, RemoteCommandOptions, Request, Response, TransmitRequest, TransmitStatus,
};

/// Frame id carried by the first request after construction
pub const INITIAL_FRAME_ID: u8 = 1;

/// Unit of the `NT` register
const DISCOVERY_TIMEOUT_UNIT: Duration = Duration::from_millis(100);

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Additional attempts after a failed exchange
    pub retries: u32,
    /// Bound on a single wait for a reply
    pub read_timeout: Duration,
    /// How long a scan collects discovery replies
    pub discovery_window: Duration,
    /// Stop a scan once this many devices were found
    pub max_devices: Option<usize>,
    /// Read hardware and firmware versions of every discovered device
    pub query_versions: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            read_timeout: Duration::from_secs(1),
            // radio default for NT is 0x3C
            discovery_window: Duration::from_secs(6),
            max_devices: None,
            query_versions: false,
        }
    }
}

/// The radio wired to the host, and the registry of devices it found
pub struct XBeeCoordinator<T: Transport> {
    id: CoordinatorId,
    transport: T,
    config: CoordinatorConfig,
    /// Frame id the next request will carry
    next_frame_id: u8,
    /// Frame id of the request awaiting its reply
    outstanding: Option<u8>,
    identity: DeviceIdentity,
    registry: DeviceRegistry,
    last_exchange: ExchangeReport,
    discarded: u64,
}

impl<T: Transport> XBeeCoordinator<T> {
    /// Bind a coordinator to an open transport
    pub fn new(transport: T, config: CoordinatorConfig) -> Self {
        let id = CoordinatorId::next();
        debug!("Created coordinator {} ({} retries)", id.get(), config.retries);
        Self {
            id,
            transport,
            config,
            next_frame_id: INITIAL_FRAME_ID,
            outstanding: None,
            identity: DeviceIdentity::default(),
            registry: DeviceRegistry::new(),
            last_exchange: ExchangeReport::default(),
            discarded: 0,
        }
    }

    /// Bind to `transport` and read the coordinator's own identity.
    ///
    /// The transport is released if the identity cannot be read.
    pub fn connect(transport: T, config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let mut coordinator = Self::new(transport, config);
        coordinator.read_identity()?;
        Ok(coordinator)
    }

    /// Handle that discovered devices refer back to
    pub fn id(&self) -> CoordinatorId {
        self.id
    }

    /// Identity read by [`read_identity`](Self::read_identity); invalid until then
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Current settings
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether the transport is still open
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Frame id the next request will carry
    pub fn next_frame_id(&self) -> u8 {
        self.next_frame_id
    }

    /// Frames dropped because they answered nothing outstanding
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    /// Attempts and last failure of the most recent [`process`](Self::process)
    pub fn last_exchange(&self) -> &ExchangeReport {
        &self.last_exchange
    }

    /// Set how many times a failed exchange is retried; applies from the next call
    pub fn set_number_of_retries(&mut self, retries: u32) {
        self.config.retries = retries;
    }

    /// Retries per exchange
    pub fn number_of_retries(&self) -> u32 {
        self.config.retries
    }

    /// Set how long scans collect discovery replies
    pub fn set_discovery_window(&mut self, window: Duration) {
        self.config.discovery_window = window;
    }

    /// Encode and write one request without waiting for a reply.
    ///
    /// The frame counter advances even when the write fails, so a retry never
    /// reuses the id of a request that may still be answered.
    ///
    /// Ids wrap after 255 through 0. Radios do not answer a request carrying
    /// frame id 0, so the exchange that draws it times out once and succeeds
    /// on its retry with id 1; with no retries configured it fails.
    pub fn send<Q: Request>(&mut self, request: &Q) -> Result<u8, CoordinatorError> {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        self.outstanding = Some(frame_id);
        if frame_id == 0 {
            debug!("Frame id wrapped to 0; the radio will not reply to this request");
        }

        let span = request.to_frame(frame_id)?.encode()?;
        self.transport.write(&span)?;
        debug!("Sent {:?} frame {} ({} bytes)", Q::FRAME_TYPE, frame_id, span.len());
        Ok(frame_id)
    }

    /// Wait for the reply to the request just sent.
    ///
    /// Frames of another type or carrying another frame id are discarded
    /// until the read timeout runs out. Fails on timeout, on an integrity
    /// error, or with `Mismatch` when only unrelated frames arrived.
    pub fn receive<R: Response>(&mut self) -> Result<R, CoordinatorError> {
        let expected_id = self
            .outstanding
            .ok_or(CoordinatorError::NoRequestOutstanding)?;
        let deadline = Instant::now() + self.config.read_timeout;
        let mut discarded = 0usize;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = match self.read_frame(remaining) {
                Ok(frame) => frame,
                Err(e) if discarded > 0 && e.is_timeout() => {
                    return Err(CoordinatorError::Mismatch {
                        expected_type: R::FRAME_TYPE,
                        expected_id,
                        discarded,
                    });
                }
                Err(e) => return Err(e),
            };

            if frame.frame_type == R::FRAME_TYPE && frame.frame_id() == Some(expected_id) {
                let response = R::from_frame(&frame)?;
                self.outstanding = None;
                return Ok(response);
            }

            discarded += 1;
            self.discarded += 1;
            debug!(
                "Discarding {:?} frame {:?} while waiting for {:?} frame {}",
                frame.frame_type,
                frame.frame_id(),
                R::FRAME_TYPE,
                expected_id
            );
        }
    }

    /// Read the next frame of any type within the read timeout
    pub fn receive_any(&mut self) -> Result<Packet, CoordinatorError> {
        let timeout = self.config.read_timeout;
        self.receive_any_within(timeout)
    }

    /// Read the next frame of any type within `timeout`
    pub fn receive_any_within(&mut self, timeout: Duration) -> Result<Packet, CoordinatorError> {
        let frame = self.read_frame(timeout)?;
        Ok(Packet::from_frame(frame)?)
    }

    /// Send `request` and wait for its reply, resending on failure.
    ///
    /// Makes at most `retries + 1` attempts; each one writes the full request
    /// under a fresh frame id. The first accepted reply is returned.
    pub fn process<Q: Request>(&mut self, request: &Q) -> Result<Q::Response, CoordinatorError> {
        if !self.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        let retries = self.config.retries;
        let (result, report) = run_with_retries(retries, |attempt| {
            if attempt > 0 {
                debug!("Retrying {:?} (attempt {})", Q::FRAME_TYPE, attempt + 1);
            }
            self.send(request)?;
            self.receive::<Q::Response>()
        });

        self.last_exchange = report;
        result.map_err(|last| CoordinatorError::RetriesExhausted {
            attempts: self.last_exchange.attempts,
            last: Box::new(last),
        })
    }

    /// Run a local AT command and return its value
    pub fn at_command(
        &mut self,
        command: AtName,
        parameter: &[u8],
    ) -> Result<Bytes, CoordinatorError> {
        let request = AtCommand {
            command,
            parameter: AtParameter::from_slice(parameter),
        };
        let response = self.process(&request)?;
        if response.status != CommandStatus::Ok {
            return Err(CoordinatorError::CommandFailed {
                command,
                status: response.status,
            });
        }
        Ok(response.data)
    }

    /// Run an AT command on a device this coordinator discovered
    pub fn remote_at_command(
        &mut self,
        device: &RemoteDevice,
        command: AtName,
        parameter: &[u8],
    ) -> Result<Bytes, CoordinatorError> {
        self.check_owner(device)?;

        let options = if parameter.is_empty() {
            RemoteCommandOptions::empty()
        } else {
            RemoteCommandOptions::APPLY_CHANGES
        };
        let request = RemoteAtCommand {
            dest64: device.serial_number(),
            dest16: device.network_address(),
            options,
            command,
            parameter: AtParameter::from_slice(parameter),
        };
        let response = self.process(&request)?;
        if response.status != CommandStatus::Ok {
            return Err(CoordinatorError::CommandFailed {
                command,
                status: response.status,
            });
        }
        Ok(response.data)
    }

    /// Read the coordinator's own serial number, address, name and versions
    pub fn read_identity(&mut self) -> Result<&DeviceIdentity, CoordinatorError> {
        let high = self.read_register(at::SH, 4)?;
        let low = self.read_register(at::SL, 4)?;
        let address = self.read_register(at::MY, 2)? as u16;
        let name = self.at_command(at::NI, &[])?;
        let hardware = self.read_register(at::HV, 2)? as u16;
        let software = self.read_register(at::VR, 2)? as u16;

        self.identity = DeviceIdentity::new((high << 32) | low, address, node_name(&name))
            .with_versions(hardware, software);
        info!("Coordinator identity: {}", self.identity);
        Ok(&self.identity)
    }

    /// How long the radio collects discovery replies (`NT`)
    pub fn read_discovery_timeout(&mut self) -> Result<Duration, CoordinatorError> {
        let units = self.read_register(at::NT, 2)?;
        Ok(DISCOVERY_TIMEOUT_UNIT * units as u32)
    }

    /// Ask a device for the address of its current parent (`MP`)
    pub fn query_parent_address(&mut self, device: &RemoteDevice) -> Result<u16, CoordinatorError> {
        let data = self.remote_at_command(device, at::MP, &[])?;
        Ok(register_value(at::MP, &data, 2)? as u16)
    }

    /// Ask a device for its hardware and firmware versions (`HV`, `VR`)
    pub fn query_versions(
        &mut self,
        device: &RemoteDevice,
    ) -> Result<(u16, u16), CoordinatorError> {
        let hardware = self.remote_at_command(device, at::HV, &[])?;
        let software = self.remote_at_command(device, at::VR, &[])?;
        Ok((
            register_value(at::HV, &hardware, 2)? as u16,
            register_value(at::VR, &software, 2)? as u16,
        ))
    }

    /// Send `payload` to a device and check that it was delivered
    pub fn transmit(
        &mut self,
        device: &RemoteDevice,
        payload: Bytes,
    ) -> Result<TransmitStatus, CoordinatorError> {
        self.check_owner(device)?;

        let request =
            TransmitRequest::unicast(device.serial_number(), device.network_address(), payload);
        let status = self.process(&request)?;
        if !status.delivery.is_success() {
            return Err(CoordinatorError::DeliveryFailed {
                dest16: status.dest16,
                status: status.delivery.0,
            });
        }
        Ok(status)
    }

    /// Broadcast node discovery and replace the registry with the replies.
    ///
    /// Replies are collected until the discovery window elapses, the radio
    /// signals the end of discovery, or the configured device limit is
    /// reached. Malformed replies are skipped. An empty mesh yields `Ok(0)`.
    /// On a transport failure the previous registry is kept.
    pub fn scan_devices(&mut self) -> Result<usize, CoordinatorError> {
        if !self.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        let window = self.config.discovery_window;
        let limit = self.config.max_devices;
        info!("Scanning for devices ({} ms window)", window.as_millis());

        let frame_id = self.send(&AtCommand::query(at::ND))?;
        let deadline = Instant::now() + window;
        let mut found: Vec<RemoteDevice> = Vec::new();
        let mut seen: HashMap<u64, usize> = HashMap::new();
        let mut skipped = 0usize;

        loop {
            if limit.is_some_and(|max| found.len() >= max) {
                debug!("Device limit reached, ending scan");
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let reply = match self.receive_any_within(remaining) {
                Ok(Packet::AtResponse(reply))
                    if reply.frame_id == frame_id && reply.command == at::ND =>
                {
                    reply
                }
                Ok(other) => {
                    self.discarded += 1;
                    debug!("Ignoring {:?} during scan", other);
                    continue;
                }
                Err(e) if e.is_timeout() => break,
                Err(CoordinatorError::Integrity(e)) => {
                    skipped += 1;
                    warn!("Dropping damaged frame during scan: {}", e);
                    continue;
                }
                Err(e) => {
                    self.outstanding = None;
                    return Err(e);
                }
            };

            if reply.status != CommandStatus::Ok {
                self.outstanding = None;
                return Err(CoordinatorError::CommandFailed {
                    command: at::ND,
                    status: reply.status,
                });
            }
            // an empty reply marks the end of discovery
            if reply.data.is_empty() {
                debug!("Radio finished discovery");
                break;
            }

            let device = RemoteDevice::from_discovery_reply(self.id, reply.data);
            if !device.is_valid() {
                skipped += 1;
                warn!("Skipping malformed discovery reply");
                continue;
            }
            // a repeated serial keeps its slot and takes the latest reply
            match seen.get(&device.serial_number()) {
                Some(&idx) => {
                    debug!("Repeated discovery reply from {}", device.identity());
                    found[idx] = device;
                }
                None => {
                    debug!("Discovered {} ({})", device.identity(), device.device_type());
                    seen.insert(device.serial_number(), found.len());
                    found.push(device);
                }
            }
        }
        self.outstanding = None;

        if self.config.query_versions {
            let mut versioned = Vec::with_capacity(found.len());
            for device in found {
                match self.query_versions(&device) {
                    Ok((hardware, software)) => {
                        versioned.push(device.with_versions(hardware, software))
                    }
                    Err(e) => {
                        warn!("Could not read versions of {}: {}", device.identity(), e);
                        versioned.push(device);
                    }
                }
            }
            found = versioned;
        }

        let count = self.registry.replace(found);
        info!("Scan complete: {} devices, {} replies skipped", count, skipped);
        Ok(count)
    }

    /// Devices found by the most recent completed scan
    pub fn connected_devices(&self) -> &[RemoteDevice] {
        self.registry.devices()
    }

    /// Registry of the most recent completed scan
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Release the transport
    pub fn close(&mut self) {
        if self.transport.is_open() {
            self.transport.close();
            info!("Coordinator {} closed", self.id.get());
        }
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<ApiFrame, CoordinatorError> {
        let span = self.transport.read_frame(timeout)?;
        let frame = decode_frame(&span).map_err(|e| {
            warn!("Rejected frame: {}", e);
            e
        })?;
        trace!("Received {:?} frame ({} data bytes)", frame.frame_type, frame.data.len());
        Ok(frame)
    }

    fn read_register(&mut self, command: AtName, width: usize) -> Result<u64, CoordinatorError> {
        let data = self.at_command(command, &[])?;
        register_value(command, &data, width)
    }

    fn check_owner(&self, device: &RemoteDevice) -> Result<(), CoordinatorError> {
        if device.coordinator() != self.id {
            return Err(CoordinatorError::ForeignDevice {
                serial: device.serial_number(),
            });
        }
        Ok(())
    }
}

impl<T: Transport> Drop for XBeeCoordinator<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Big-endian register value of at most `width` bytes
fn register_value(command: AtName, data: &[u8], width: usize) -> Result<u64, CoordinatorError> {
    if data.is_empty() || data.len() > width {
        return Err(CoordinatorError::Register {
            command,
            len: data.len(),
        });
    }
    Ok(data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Node identifier from an `NI` value; the radio reports a blank name as a space
fn node_name(data: &[u8]) -> Option<String> {
    let name = String::from_utf8_lossy(data).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemTransport;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use xbee_topology::DeviceType;
    use xbee_wire::{encode_frame, encode_record, AtCommandResponse, FrameType, NodeRecord};

    const HUB_SERIAL: u64 = 0x0013_A200_40A1_B2C3;

    fn at_reply(frame_id: u8, command: AtName, status: u8, data: &[u8]) -> Bytes {
        let mut body = vec![frame_id];
        body.extend_from_slice(&command.as_bytes());
        body.push(status);
        body.extend_from_slice(data);
        encode_frame(FrameType::AtCommandResponse, &body).unwrap()
    }

    fn remote_reply(
        frame_id: u8,
        source64: u64,
        source16: u16,
        command: AtName,
        status: u8,
        data: &[u8],
    ) -> Bytes {
        let mut body = vec![frame_id];
        body.extend_from_slice(&source64.to_be_bytes());
        body.extend_from_slice(&source16.to_be_bytes());
        body.extend_from_slice(&command.as_bytes());
        body.push(status);
        body.extend_from_slice(data);
        encode_frame(FrameType::RemoteAtCommandResponse, &body).unwrap()
    }

    fn node(serial: u64, address: u16, parent: u16, device_type: u8) -> Bytes {
        encode_record(&NodeRecord {
            network_address: address,
            serial_number: serial,
            name: Some(format!("NODE-{}", serial)),
            parent_address: parent,
            device_type,
            status: 0,
            profile_id: 0xC105,
            manufacturer_id: 0x101E,
            device_identifier: None,
            rssi: None,
        })
    }

    /// Scripted radio answering from register tables
    #[derive(Default)]
    struct Radio {
        registers: HashMap<AtName, Vec<u8>>,
        nodes: Vec<Bytes>,
        remote: HashMap<(u64, AtName), Vec<u8>>,
        delivery: u8,
    }

    impl Radio {
        fn hub() -> Self {
            let mut radio = Radio::default();
            radio.registers.insert(at::SH, vec![0x00, 0x13, 0xA2, 0x00]);
            radio.registers.insert(at::SL, vec![0x40, 0xA1, 0xB2, 0xC3]);
            radio.registers.insert(at::MY, vec![0x00, 0x00]);
            radio.registers.insert(at::NI, b"HUB".to_vec());
            radio.registers.insert(at::HV, vec![0x1E, 0x46]);
            radio.registers.insert(at::VR, vec![0x23, 0xA7]);
            radio.registers.insert(at::NT, vec![0x3C]);
            radio
        }

        fn answer(&mut self, span: &[u8]) -> Vec<Bytes> {
            let frame = decode_frame(span).unwrap();
            let data = &frame.data;
            let id = data[0];
            match frame.frame_type {
                FrameType::AtCommand => {
                    let command = AtName::new([data[1], data[2]]);
                    if command == at::ND {
                        let mut replies: Vec<Bytes> = self
                            .nodes
                            .iter()
                            .map(|record| at_reply(id, at::ND, 0, record))
                            .collect();
                        replies.push(at_reply(id, at::ND, 0, &[]));
                        replies
                    } else {
                        match self.registers.get(&command) {
                            Some(value) => vec![at_reply(id, command, 0, value)],
                            None => vec![at_reply(id, command, 2, &[])],
                        }
                    }
                }
                FrameType::RemoteAtCommand => {
                    let mut dest64 = [0u8; 8];
                    dest64.copy_from_slice(&data[1..9]);
                    let dest64 = u64::from_be_bytes(dest64);
                    let dest16 = u16::from_be_bytes([data[9], data[10]]);
                    let command = AtName::new([data[12], data[13]]);
                    match self.remote.get(&(dest64, command)) {
                        Some(value) => vec![remote_reply(id, dest64, dest16, command, 0, value)],
                        None => vec![remote_reply(id, dest64, dest16, command, 4, &[])],
                    }
                }
                FrameType::TransmitRequest => {
                    let status = [id, data[9], data[10], 0, self.delivery, 0];
                    vec![encode_frame(FrameType::TransmitStatus, &status).unwrap()]
                }
                _ => Vec::new(),
            }
        }

        fn into_transport(mut self) -> MemTransport {
            MemTransport::with_responder(move |span| self.answer(span))
        }
    }

    /// Transport wrapper that records when it was released
    struct Tracked {
        inner: MemTransport,
        closed: Arc<AtomicBool>,
    }

    impl Tracked {
        fn new(inner: MemTransport) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    inner,
                    closed: closed.clone(),
                },
                closed,
            )
        }
    }

    impl Transport for Tracked {
        fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.inner.write(frame)
        }

        fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
            self.inner.read_frame(timeout)
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
            self.inner.close();
        }
    }

    fn config(retries: u32) -> CoordinatorConfig {
        CoordinatorConfig {
            retries,
            read_timeout: Duration::from_millis(50),
            discovery_window: Duration::from_secs(1),
            ..CoordinatorConfig::default()
        }
    }

    fn written_ids(coordinator: &XBeeCoordinator<MemTransport>) -> Vec<u8> {
        coordinator
            .transport()
            .written_frames()
            .unwrap()
            .iter()
            .map(|frame| frame.frame_id().unwrap())
            .collect()
    }

    #[test]
    fn test_process_round_trip() {
        let mut coordinator = XBeeCoordinator::new(Radio::hub().into_transport(), config(3));

        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(response.frame_id, INITIAL_FRAME_ID);
        assert_eq!(response.status, CommandStatus::Ok);
        assert_eq!(&response.data[..], b"HUB");
        assert_eq!(coordinator.last_exchange().attempts, 1);
        assert!(coordinator.last_exchange().succeeded);
        assert_eq!(coordinator.next_frame_id(), 2);
    }

    #[test]
    fn test_sequence_ids_differ_per_request() {
        let mut coordinator = XBeeCoordinator::new(Radio::hub().into_transport(), config(0));
        for _ in 0..3 {
            coordinator.process(&AtCommand::query(at::MY)).unwrap();
        }
        assert_eq!(written_ids(&coordinator), vec![1, 2, 3]);
    }

    #[test]
    fn test_retry_bound() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(3));

        let err = coordinator.process(&AtCommand::query(at::NI)).unwrap_err();
        match &err {
            CoordinatorError::RetriesExhausted { attempts, last } => {
                assert_eq!(*attempts, 4);
                assert!(last.is_timeout());
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.is_timeout());
        assert_eq!(written_ids(&coordinator), vec![1, 2, 3, 4]);
        assert_eq!(coordinator.transport().reads(), 4);
        assert_eq!(coordinator.last_exchange().attempts, 4);
        assert!(!coordinator.last_exchange().succeeded);
    }

    #[test]
    fn test_retry_success_path() {
        let mut calls = 0;
        let transport = MemTransport::with_responder(move |span| {
            calls += 1;
            if calls < 3 {
                return Vec::new();
            }
            let id = decode_frame(span).unwrap().data[0];
            vec![at_reply(id, at::NI, 0, b"HUB")]
        });
        let mut coordinator = XBeeCoordinator::new(transport, config(5));

        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(response.frame_id, 3);
        assert_eq!(coordinator.transport().written().len(), 3);
        assert_eq!(coordinator.last_exchange().attempts, 3);
    }

    #[test]
    fn test_retries_setting_applies_to_next_call() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(3));
        coordinator.set_number_of_retries(1);
        assert_eq!(coordinator.number_of_retries(), 1);

        assert!(coordinator.process(&AtCommand::query(at::NI)).is_err());
        assert_eq!(coordinator.transport().written().len(), 2);
    }

    #[test]
    fn test_integrity_failure_consumes_attempt() {
        let mut calls = 0;
        let transport = MemTransport::with_responder(move |span| {
            calls += 1;
            let id = decode_frame(span).unwrap().data[0];
            let reply = at_reply(id, at::NI, 0, b"HUB");
            if calls == 1 {
                let mut damaged = reply.to_vec();
                let last = damaged.len() - 1;
                damaged[last] ^= 0x01;
                vec![Bytes::from(damaged)]
            } else {
                vec![reply]
            }
        });
        let mut coordinator = XBeeCoordinator::new(transport, config(2));

        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(response.frame_id, 2);
        assert_eq!(coordinator.last_exchange().attempts, 2);
        assert!(coordinator
            .last_exchange()
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("frame integrity error"));
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let mut transport = Radio::hub().into_transport();
        transport.push_inbound(at_reply(0x42, at::NI, 0, b"OLD"));
        let mut coordinator = XBeeCoordinator::new(transport, config(0));

        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(&response.data[..], b"HUB");
        assert_eq!(coordinator.discarded_frames(), 1);
        assert_eq!(coordinator.transport().written().len(), 1);
    }

    #[test]
    fn test_unsolicited_indicator_is_discarded() {
        let mut transport = Radio::hub().into_transport();
        // node identification indicator from a router joining the mesh
        transport
            .push_frame(
                FrameType::Unknown(0x95),
                &[0x00, 0x13, 0xA2, 0x00, 0x40, 0x11, 0x22, 0x33, 0x4F, 0x10, 0x02],
            )
            .unwrap();
        let mut coordinator = XBeeCoordinator::new(transport, config(0));

        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(&response.data[..], b"HUB");
        assert_eq!(coordinator.discarded_frames(), 1);
        assert_eq!(coordinator.last_exchange().attempts, 1);
        assert_eq!(coordinator.transport().written().len(), 1);

        coordinator
            .transport_mut()
            .push_frame(FrameType::Unknown(0x91), &[0x00])
            .unwrap();
        match coordinator.receive_any().unwrap() {
            Packet::Other(frame) => assert_eq!(frame.frame_type, FrameType::Unknown(0x91)),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_receive_rejects_unrelated_frames() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(0));
        let id = coordinator.send(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(id, INITIAL_FRAME_ID);

        coordinator
            .transport_mut()
            .push_inbound(at_reply(id.wrapping_add(1), at::NI, 0, b"HUB"));
        coordinator
            .transport_mut()
            .push_frame(FrameType::ModemStatus, &[0x06])
            .unwrap();

        match coordinator.receive::<AtCommandResponse>() {
            Err(CoordinatorError::Mismatch {
                expected_id,
                discarded,
                ..
            }) => {
                assert_eq!(expected_id, id);
                assert_eq!(discarded, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_receive_without_request() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(0));
        assert!(matches!(
            coordinator.receive::<AtCommandResponse>(),
            Err(CoordinatorError::NoRequestOutstanding)
        ));
    }

    #[test]
    fn test_failed_send_still_advances_counter() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(0));
        coordinator.transport_mut().fail_next_writes(1);

        assert!(matches!(
            coordinator.send(&AtCommand::query(at::NI)),
            Err(CoordinatorError::Transport(TransportError::Io(_)))
        ));
        assert_eq!(coordinator.send(&AtCommand::query(at::NI)).unwrap(), 2);
    }

    #[test]
    fn test_counter_wraparound() {
        let mut coordinator = XBeeCoordinator::new(Radio::hub().into_transport(), config(0));

        for n in 0..257u32 {
            let response = coordinator.process(&AtCommand::query(at::MY)).unwrap();
            assert_eq!(response.frame_id, (INITIAL_FRAME_ID as u32 + n) as u8);
        }
        let ids = written_ids(&coordinator);
        assert_eq!(ids[0], INITIAL_FRAME_ID);
        assert_eq!(ids[255], 0);
        assert_eq!(ids[256], INITIAL_FRAME_ID);
        assert_eq!(coordinator.discarded_frames(), 0);
    }

    #[test]
    fn test_silent_frame_id_zero_costs_one_retry() {
        let transport = MemTransport::with_responder(|span| {
            let id = decode_frame(span).unwrap().data[0];
            if id == 0 {
                return Vec::new();
            }
            vec![at_reply(id, at::MY, 0, &[0x00, 0x00])]
        });
        let mut coordinator = XBeeCoordinator::new(transport, config(1));
        for _ in 0..255 {
            coordinator.process(&AtCommand::query(at::MY)).unwrap();
        }
        assert_eq!(coordinator.next_frame_id(), 0);

        let response = coordinator.process(&AtCommand::query(at::MY)).unwrap();
        assert_eq!(response.frame_id, INITIAL_FRAME_ID);
        assert_eq!(coordinator.last_exchange().attempts, 2);
    }

    #[test]
    fn test_stale_replies_rejected_across_wrap() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(0));
        for _ in 0..255 {
            coordinator.send(&AtCommand::query(at::MY)).unwrap();
        }
        assert_eq!(coordinator.next_frame_id(), 0);

        // reply to the request sent just before the wrap arrives late
        coordinator
            .transport_mut()
            .push_inbound(at_reply(255, at::NI, 0, b"OLD"));
        coordinator
            .transport_mut()
            .push_inbound(at_reply(0, at::NI, 0, b"HUB"));
        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(response.frame_id, 0);
        assert_eq!(&response.data[..], b"HUB");

        // a leftover answer to id 0 must not satisfy the wrapped request 1
        coordinator
            .transport_mut()
            .push_inbound(at_reply(0, at::NI, 0, b"OLD"));
        coordinator
            .transport_mut()
            .push_frame(FrameType::TransmitStatus, &[INITIAL_FRAME_ID, 0xFF, 0xFE, 0, 0, 0])
            .unwrap();
        coordinator
            .transport_mut()
            .push_inbound(at_reply(INITIAL_FRAME_ID, at::NI, 0, b"NEW"));
        let response = coordinator.process(&AtCommand::query(at::NI)).unwrap();
        assert_eq!(response.frame_id, INITIAL_FRAME_ID);
        assert_eq!(&response.data[..], b"NEW");
        assert_eq!(coordinator.discarded_frames(), 3);
    }

    #[test]
    fn test_at_command_failure_is_not_retried() {
        let mut coordinator = XBeeCoordinator::new(Radio::default().into_transport(), config(3));

        match coordinator.at_command(at::NI, &[]) {
            Err(CoordinatorError::CommandFailed { command, status }) => {
                assert_eq!(command, at::NI);
                assert_eq!(status, CommandStatus::InvalidCommand);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(coordinator.transport().written().len(), 1);
    }

    #[test]
    fn test_connect_reads_identity() {
        let coordinator =
            XBeeCoordinator::connect(Radio::hub().into_transport(), config(1)).unwrap();

        let identity = coordinator.identity();
        assert!(identity.is_valid());
        assert_eq!(identity.serial_number(), HUB_SERIAL);
        assert_eq!(identity.network_address(), 0);
        assert_eq!(identity.name(), Some("HUB"));
        assert_eq!(identity.hardware_version(), 0x1E46);
        assert_eq!(identity.software_version(), 0x23A7);
    }

    #[test]
    fn test_failed_connect_releases_transport() {
        let (transport, closed) = Tracked::new(Radio::default().into_transport());
        let result = XBeeCoordinator::connect(transport, config(0));

        assert!(matches!(
            result,
            Err(CoordinatorError::CommandFailed { command, .. }) if command == at::SH
        ));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_and_close_release_transport() {
        let (transport, closed) = Tracked::new(MemTransport::new());
        drop(XBeeCoordinator::new(transport, config(0)));
        assert!(closed.load(Ordering::SeqCst));

        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(2));
        coordinator.close();
        assert!(!coordinator.is_open());
        assert!(matches!(
            coordinator.process(&AtCommand::query(at::NI)),
            Err(CoordinatorError::Transport(TransportError::NotOpen))
        ));
        assert!(coordinator.transport().written().is_empty());
    }

    #[test]
    fn test_read_discovery_timeout() {
        let mut coordinator = XBeeCoordinator::new(Radio::hub().into_transport(), config(0));
        assert_eq!(
            coordinator.read_discovery_timeout().unwrap(),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn test_empty_mesh_scan() {
        let mut coordinator = XBeeCoordinator::new(MemTransport::new(), config(0));

        assert_eq!(coordinator.scan_devices().unwrap(), 0);
        assert!(coordinator.connected_devices().is_empty());
        assert_eq!(coordinator.registry().generation(), 1);

        let frames = coordinator.transport().written_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::AtCommand);
        assert_eq!(&frames[0].data[1..3], b"ND");
    }

    #[test]
    fn test_multi_device_scan() {
        let mut radio = Radio::hub();
        radio.nodes = vec![
            node(0x0013_A200_0000_0001, 0x1111, 0x0000, 1),
            node(0x0013_A200_0000_0002, 0x2222, 0x1111, 2),
            node(0x0013_A200_0000_0003, 0x3333, 0x0000, 2),
        ];
        let mut coordinator = XBeeCoordinator::new(radio.into_transport(), config(0));

        assert_eq!(coordinator.scan_devices().unwrap(), 3);
        let devices = coordinator.connected_devices();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial_number(), 0x0013_A200_0000_0001);
        assert_eq!(devices[0].network_address(), 0x1111);
        assert_eq!(devices[0].device_type(), DeviceType::Router);
        assert_eq!(devices[1].parent_address(), 0x1111);
        assert_eq!(devices[2].device_type(), DeviceType::EndDevice);
        assert!(devices.iter().all(|d| d.coordinator() == coordinator.id()));
        assert_eq!(coordinator.registry().children_of(0x0000).count(), 2);
    }

    #[test]
    fn test_malformed_reply_does_not_abort_scan() {
        let mut radio = Radio::hub();
        radio.nodes = vec![
            node(1, 0x1111, 0, 1),
            Bytes::from_static(&[0x12, 0x34, 0x00]),
            node(2, 0x2222, 0, 2),
        ];
        let mut transport = radio.into_transport();
        // damaged frame queued ahead of the replies
        transport.push_inbound(Bytes::from_static(&[0x7E, 0x00, 0x02, 0x8A, 0x06, 0x00]));
        let mut coordinator = XBeeCoordinator::new(transport, config(0));

        assert_eq!(coordinator.scan_devices().unwrap(), 2);
        let serials: Vec<u64> = coordinator
            .connected_devices()
            .iter()
            .map(|d| d.serial_number())
            .collect();
        assert_eq!(serials, vec![1, 2]);
    }

    #[test]
    fn test_rescan_replaces_registry() {
        let mut round = 0;
        let transport = MemTransport::with_responder(move |span| {
            let id = decode_frame(span).unwrap().data[0];
            round += 1;
            let nodes = if round == 1 {
                vec![node(1, 0x1111, 0, 1), node(2, 0x2222, 0, 2)]
            } else {
                vec![node(2, 0x2A2A, 0, 2)]
            };
            nodes.iter().map(|n| at_reply(id, at::ND, 0, n)).collect()
        });
        let mut coordinator = XBeeCoordinator::new(transport, config(0));

        assert_eq!(coordinator.scan_devices().unwrap(), 2);
        assert_eq!(coordinator.scan_devices().unwrap(), 1);
        assert!(coordinator.registry().by_serial(1).is_none());
        assert_eq!(
            coordinator.registry().by_serial(2).unwrap().network_address(),
            0x2A2A
        );
    }

    #[test]
    fn test_scan_stops_at_device_limit() {
        let mut radio = Radio::hub();
        radio.nodes = vec![node(1, 0x1111, 0, 1), node(2, 0x2222, 0, 2), node(3, 0x3333, 0, 2)];
        let mut coordinator = XBeeCoordinator::new(
            radio.into_transport(),
            CoordinatorConfig {
                max_devices: Some(2),
                ..config(0)
            },
        );

        assert_eq!(coordinator.scan_devices().unwrap(), 2);
        assert_eq!(coordinator.transport().pending(), 2);
    }

    #[test]
    fn test_repeated_reply_does_not_use_up_device_limit() {
        let mut radio = Radio::hub();
        radio.nodes = vec![
            node(1, 0x1111, 0, 1),
            node(1, 0x1A1A, 0, 1),
            node(2, 0x2222, 0, 2),
            node(3, 0x3333, 0, 2),
        ];
        let mut coordinator = XBeeCoordinator::new(
            radio.into_transport(),
            CoordinatorConfig {
                max_devices: Some(2),
                ..config(0)
            },
        );

        assert_eq!(coordinator.scan_devices().unwrap(), 2);
        let devices = coordinator.connected_devices();
        assert_eq!(devices[0].serial_number(), 1);
        assert_eq!(devices[0].network_address(), 0x1A1A);
        assert_eq!(devices[1].serial_number(), 2);
    }

    #[test]
    fn test_scan_queries_versions() {
        let mut radio = Radio::hub();
        radio.nodes = vec![node(7, 0x7777, 0, 1), node(8, 0x8888, 0x7777, 2)];
        radio.remote.insert((7, at::HV), vec![0x1E, 0x46]);
        radio.remote.insert((7, at::VR), vec![0x40, 0x5E]);
        let mut coordinator = XBeeCoordinator::new(
            radio.into_transport(),
            CoordinatorConfig {
                query_versions: true,
                ..config(0)
            },
        );

        assert_eq!(coordinator.scan_devices().unwrap(), 2);
        let router = coordinator.registry().by_serial(7).unwrap();
        assert_eq!(router.identity().hardware_version(), 0x1E46);
        assert_eq!(router.identity().software_version(), 0x405E);
        // the end device did not answer; it is kept without versions
        let end_device = coordinator.registry().by_serial(8).unwrap();
        assert_eq!(end_device.identity().hardware_version(), 0);
    }

    #[test]
    fn test_remote_queries() {
        let mut radio = Radio::hub();
        radio.nodes = vec![node(9, 0x9999, 0x1234, 2)];
        radio.remote.insert((9, at::MP), vec![0x12, 0x34]);
        let mut coordinator = XBeeCoordinator::new(radio.into_transport(), config(0));
        coordinator.scan_devices().unwrap();

        let device = coordinator.connected_devices()[0].clone();
        assert_eq!(coordinator.query_parent_address(&device).unwrap(), 0x1234);

        let frames = coordinator.transport().written_frames().unwrap();
        let request = frames.last().unwrap();
        assert_eq!(request.frame_type, FrameType::RemoteAtCommand);
        assert_eq!(&request.data[1..9], &9u64.to_be_bytes());
        assert_eq!(&request.data[9..11], &[0x99u8, 0x99][..]);
    }

    #[test]
    fn test_foreign_device_rejected() {
        let mut coordinator = XBeeCoordinator::new(Radio::hub().into_transport(), config(0));
        let stranger =
            RemoteDevice::from_discovery_reply(CoordinatorId::next(), node(5, 0x5555, 0, 2));

        assert!(matches!(
            coordinator.query_parent_address(&stranger),
            Err(CoordinatorError::ForeignDevice { serial: 5 })
        ));
        assert!(matches!(
            coordinator.transmit(&stranger, Bytes::from_static(b"hi")),
            Err(CoordinatorError::ForeignDevice { .. })
        ));
        assert!(coordinator.transport().written().is_empty());
    }

    #[test]
    fn test_transmit_checks_delivery() {
        let mut radio = Radio::hub();
        radio.nodes = vec![node(3, 0x3333, 0, 2)];
        radio.delivery = 0x24;
        let mut coordinator = XBeeCoordinator::new(radio.into_transport(), config(0));
        coordinator.scan_devices().unwrap();
        let device = coordinator.connected_devices()[0].clone();

        match coordinator.transmit(&device, Bytes::from_static(b"ping")) {
            Err(CoordinatorError::DeliveryFailed { dest16, status }) => {
                assert_eq!(dest16, 0x3333);
                assert_eq!(status, 0x24);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let mut radio = Radio::hub();
        radio.nodes = vec![node(3, 0x3333, 0, 2)];
        let mut coordinator = XBeeCoordinator::new(radio.into_transport(), config(0));
        coordinator.scan_devices().unwrap();
        let device = coordinator.connected_devices()[0].clone();
        let status = coordinator
            .transmit(&device, Bytes::from_static(b"ping"))
            .unwrap();
        assert!(status.delivery.is_success());
    }

    #[test]
    fn test_register_helpers() {
        assert_eq!(register_value(at::MY, &[0x12, 0x34], 2).unwrap(), 0x1234);
        assert_eq!(register_value(at::NT, &[0x3C], 2).unwrap(), 0x3C);
        assert!(register_value(at::MY, &[], 2).is_err());
        assert!(register_value(at::MY, &[1, 2, 3], 2).is_err());
        assert_eq!(node_name(b" "), None);
        assert_eq!(node_name(b"HUB\r"), Some("HUB".to_string()));
    }
}
