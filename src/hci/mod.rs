//! The Host Controller Interface handler.
//!
//! `Hci` owns the one reader thread per adapter that demultiplexes everything the controller
//! sends: events (matched against an outstanding command, or broadcast to subscribers) and ACL
//! data (routed by connection handle and L2CAP channel id to whichever `l2cap::Channel` inbox is
//! listening). There is no event loop on the caller's side -- `send_command` and
//! `create_le_connection` block the calling thread until the controller answers or the command
//! times out, the same blocking style as `l2cap::Channel`/`att::client::Client`.

pub mod common;
pub mod events;
pub mod opcodes;
pub mod transport;

use crate::addr::Address;
use crate::error::{Error, ErrorKind};
use crate::gap::Advertisement;
use crate::hci::common::{ConnectionHandle, ConnectionInterval, ConnectionLatency, SupervisionTimeout};
use crate::hci::events::{Event, Status};
use crate::hci::opcodes::{ControllerAndBaseband, HciCommand, InformationParameters, LeController, LinkControl};
use crate::hci::transport::ControllerTransport;
use crate::l2cap::{Channel, ChannelIdentifier, LeUChannelIdentifier};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

/// How long `send_command` waits for a Command Complete/Status event before giving up.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `create_le_connection` waits for the LE Connection Complete event once the
/// controller has accepted the create-connection command.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);

fn check_status(status: Status) -> Result<(), Error> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::State, format!("controller returned status {:#04x}", status.0)))
    }
}

/// Default parameters for an LE connection request.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionParams {
    pub interval_min: ConnectionInterval,
    pub interval_max: ConnectionInterval,
    pub latency: ConnectionLatency,
    pub supervision_timeout: SupervisionTimeout,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        ConnectionParams {
            interval_min: ConnectionInterval::try_from(0x0018).unwrap(),
            interval_max: ConnectionInterval::try_from(0x0028).unwrap(),
            latency: ConnectionLatency::try_from(0x0000).unwrap(),
            supervision_timeout: SupervisionTimeout::try_from(0x01F4).unwrap(),
        }
    }
}

/// Parameters for `LE Set Advertising Parameters`. Field meanings per Core Spec Vol 4, Part E
/// §7.8.5.
#[derive(Debug, Clone, Copy)]
pub struct AdvertisingParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub connectable: bool,
    pub own_address_type: u8,
    pub channel_map: u8,
    pub filter_policy: u8,
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        AdvertisingParams {
            interval_min: 0x0800,
            interval_max: 0x0800,
            connectable: true,
            own_address_type: 0x00,
            channel_map: 0x07,
            filter_policy: 0x00,
        }
    }
}

/// Parameters for passive/active scanning.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryParams {
    pub active: bool,
    pub interval: u16,
    pub window: u16,
    pub own_address_type: u8,
    pub filter_duplicates: bool,
}

impl Default for DiscoveryParams {
    fn default() -> Self {
        DiscoveryParams { active: true, interval: 0x0010, window: 0x0010, own_address_type: 0x00, filter_duplicates: true }
    }
}

struct PendingCommand {
    opcode: u16,
    reply: mpsc::Sender<Event>,
}

struct ConnectionState {
    peer_address: Address,
}

/// The HCI handler for one adapter. One reader thread runs for the lifetime of the `Hci`; it
/// exits as soon as `transport.recv()` errors, which happens once the socket is closed either by
/// the peer or by an explicit call to `shutdown`.
pub struct Hci {
    transport: Arc<dyn ControllerTransport>,
    command_lock: Mutex<()>,
    pending: Mutex<Option<PendingCommand>>,
    connections: RwLock<HashMap<ConnectionHandle, ConnectionState>>,
    channel_senders: RwLock<HashMap<(ConnectionHandle, u16), mpsc::Sender<Vec<u8>>>>,
    subscribers: Mutex<Vec<mpsc::Sender<Event>>>,
    default_conn_params: Mutex<ConnectionParams>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Hci {
    /// Spawns the reader thread and returns a handle to the running `Hci`. `transport` should
    /// already be open (bound to its adapter) before this is called.
    pub fn new(transport: Arc<dyn ControllerTransport>) -> Arc<Self> {
        let hci = Arc::new(Hci {
            transport,
            command_lock: Mutex::new(()),
            pending: Mutex::new(None),
            connections: RwLock::new(HashMap::new()),
            channel_senders: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            default_conn_params: Mutex::new(ConnectionParams::default()),
            reader: Mutex::new(None),
        });

        let reader_hci = Arc::clone(&hci);
        let handle = thread::spawn(move || reader_hci.reader_loop());
        *hci.reader.lock().unwrap() = Some(handle);

        hci
    }

    /// Tears down the transport and blocks until the reader thread has exited, then drops every
    /// subscriber channel so anything parked in `for event in hci.subscribe() { .. }` also ends.
    /// Safe to call more than once; a second call finds no reader thread left to join.
    pub(crate) fn shutdown(&self) {
        let _ = self.transport.close();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.subscribers.lock().unwrap().clear();
    }

    fn reader_loop(self: Arc<Self>) {
        loop {
            match self.transport.recv() {
                Ok(bytes) => self.dispatch(&bytes),
                Err(e) => {
                    log::warn!("hci reader thread exiting: {}", e);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, bytes: &[u8]) {
        match bytes.first() {
            Some(0x04) => self.dispatch_event(&bytes[1..]),
            Some(0x02) => self.dispatch_acl(&bytes[1..]),
            Some(other) => log::trace!("dropping hci packet with unrecognized indicator {:#04x}", other),
            None => {}
        }
    }

    fn dispatch_event(&self, raw: &[u8]) {
        let event = match Event::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("failed to decode hci event: {}", e);
                return;
            }
        };

        log::trace!("hci event: {:?}", event);

        if let Some(opcode) = event.completes_opcode() {
            let mut pending = self.pending.lock().unwrap();
            if let Some(p) = pending.as_ref() {
                if p.opcode == opcode {
                    let p = pending.take().unwrap();
                    let _ = p.reply.send(event.clone());
                    self.broadcast(event);
                    return;
                }
            }
        }

        self.handle_connection_lifecycle(&event);
        self.broadcast(event);
    }

    fn handle_connection_lifecycle(&self, event: &Event) {
        match event {
            Event::LeConnectionComplete { status, handle, peer_address, .. } if status.is_success() => {
                self.connections.write().unwrap().insert(*handle, ConnectionState { peer_address: *peer_address });
                log::info!("le connection complete: handle {} to {}", handle.raw(), peer_address);
            }
            Event::DisconnectionComplete { handle, reason, .. } => {
                self.connections.write().unwrap().remove(handle);
                self.channel_senders.write().unwrap().retain(|(h, _), _| h != handle);
                log::info!("disconnected: handle {} reason {:#04x}", handle.raw(), reason);
            }
            _ => {}
        }
    }

    fn dispatch_acl(&self, raw: &[u8]) {
        if raw.len() < 4 {
            log::warn!("dropping acl packet shorter than its 4 byte header");
            return;
        }

        let handle_and_flags = u16::from_le_bytes([raw[0], raw[1]]);
        let handle = match ConnectionHandle::try_from(handle_and_flags & 0x0FFF) {
            Ok(h) => h,
            Err(_) => {
                log::warn!("dropping acl packet with out of range connection handle");
                return;
            }
        };
        let data_len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
        let frame = match raw.get(4..4 + data_len) {
            Some(frame) => frame,
            None => {
                log::warn!("dropping acl packet whose length field exceeds the buffer");
                return;
            }
        };

        let l2cap = match crate::l2cap::AclData::from_raw(frame) {
            Ok(l2cap) => l2cap,
            Err(e) => {
                log::warn!("dropping malformed l2cap frame: {}", e);
                return;
            }
        };

        let cid = match l2cap.channel_id() {
            ChannelIdentifier::Le(cid) => cid,
        };

        let senders = self.channel_senders.read().unwrap();
        match senders.get(&(handle, cid_to_val(cid))) {
            Some(sender) => {
                let _ = sender.send(l2cap.payload().to_vec());
            }
            None => {
                // Either the channel was never opened or the link has since disconnected; per the
                // post-disconnect ordering guarantee, PDUs for a dead connection are dropped
                // silently rather than buffered or reported as an error.
                log::trace!("dropping acl data for handle {} with no registered channel", handle.raw());
            }
        }
    }

    fn broadcast(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    /// Registers a new listener for every event the reader thread observes, including ones
    /// already matched to an outstanding command.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Issues one HCI command and blocks for its Command Complete or Command Status event.
    /// Commands are serialized: only one may be outstanding at a time, since the controller's
    /// Command Complete/Status events carry no correlation id beyond the opcode itself.
    pub fn send_command(&self, opcode: u16, parameters: &[u8]) -> Result<Vec<u8>, Error> {
        let _serialize = self.command_lock.lock().unwrap();

        let (tx, rx) = mpsc::channel();
        *self.pending.lock().unwrap() = Some(PendingCommand { opcode, reply: tx });

        if let Err(e) = self.transport.send_command(opcode, parameters) {
            self.pending.lock().unwrap().take();
            return Err(e);
        }

        let event = rx.recv_timeout(COMMAND_TIMEOUT).map_err(|_| {
            self.pending.lock().unwrap().take();
            Error::timeout()
        })?;

        match event {
            Event::CommandComplete { return_parameters, .. } => {
                if let Some(&status) = return_parameters.first() {
                    check_status(Status(status))?;
                }
                Ok(return_parameters)
            }
            Event::CommandStatus { status, .. } => {
                check_status(status)?;
                Ok(Vec::new())
            }
            other => Err(Error::new(ErrorKind::Protocol, format!("unexpected event in reply to a command: {:?}", other))),
        }
    }

    fn send(&self, command: HciCommand, parameters: &[u8]) -> Result<Vec<u8>, Error> {
        self.send_command(command.as_opcode_pair().as_opcode(), parameters)
    }

    /// Resets the controller and enables the event classes this stack relies on. Must be called
    /// once before any other method.
    pub fn initialize(&self) -> Result<(), Error> {
        log::info!("initializing hci controller");

        self.send(HciCommand::ControllerAndBaseband(ControllerAndBaseband::Reset), &[])?;

        // Enable Disconnection Complete, Encryption Change, Encryption Key Refresh Complete, and
        // LE Meta Event.
        let event_mask: u64 = (1 << 4) | (1 << 7) | (1 << 47) | (1 << 61);
        self.send(HciCommand::ControllerAndBaseband(ControllerAndBaseband::SetEventMask), &event_mask.to_le_bytes())?;

        // Enable every LE Meta sub-event this stack decodes.
        let le_event_mask: u64 = 0x1F;
        self.send(HciCommand::LeController(LeController::SetEventMask), &le_event_mask.to_le_bytes())?;

        self.send(HciCommand::InformationParameters(InformationParameters::ReadLocalSupportedFeatures), &[])?;
        self.send(HciCommand::InformationParameters(InformationParameters::ReadBD_ADDR), &[])?;

        Ok(())
    }

    /// Brings the controller's radio up or down. Powering on resets the controller and enables
    /// this stack's event classes, same as `initialize`; powering off best-effort stops scanning
    /// and advertising so the controller isn't left transmitting after the caller thinks it's off.
    pub fn set_powered(&self, enable: bool) -> Result<(), Error> {
        if enable {
            self.initialize()
        } else {
            let _ = self.stop_discovery();
            let _ = self.stop_advertising();
            Ok(())
        }
    }

    /// Enables or disables LE Secure Connections host support. Has no effect on links already
    /// established.
    pub fn set_secure_connections(&self, enable: bool) -> Result<(), Error> {
        self.send(HciCommand::ControllerAndBaseband(ControllerAndBaseband::WriteSecureConnectionsHostSupport), &[enable as u8])?;
        Ok(())
    }

    /// Sets the GAP device name exposed to the controller's own discovery responses (used for
    /// classic inquiry; LE advertising carries its own name in the advertising/scan-response
    /// payload via `start_advertising`).
    pub fn set_local_name(&self, name: &str) -> Result<(), Error> {
        let mut buf = [0u8; 248];
        let bytes = name.as_bytes();
        let n = bytes.len().min(247);
        buf[..n].copy_from_slice(&bytes[..n]);
        self.send(HciCommand::ControllerAndBaseband(ControllerAndBaseband::WriteLocalName), &buf)?;
        Ok(())
    }

    pub fn set_default_conn_param(&self, params: ConnectionParams) {
        *self.default_conn_params.lock().unwrap() = params;
    }

    /// Sets the controller's default LE PHY preference for future connections (Core Spec Vol 4,
    /// Part E §7.8.48).
    pub fn set_default_le_phy(&self, all_phys: u8, tx_phys: u8, rx_phys: u8) -> Result<(), Error> {
        self.send(HciCommand::LeController(LeController::SetDefaultPhy), &[all_phys, tx_phys, rx_phys])?;
        Ok(())
    }

    pub fn start_discovery(&self, params: DiscoveryParams) -> Result<(), Error> {
        let scan_type = params.active as u8;
        let mut scan_params = Vec::with_capacity(7);
        scan_params.push(scan_type);
        scan_params.extend_from_slice(&params.interval.to_le_bytes());
        scan_params.extend_from_slice(&params.window.to_le_bytes());
        scan_params.push(params.own_address_type);
        scan_params.push(0x00); // scanning filter policy: accept all advertisements
        self.send(HciCommand::LeController(LeController::SetScanParameters), &scan_params)?;

        self.send(
            HciCommand::LeController(LeController::SetScanEnable),
            &[0x01, params.filter_duplicates as u8],
        )?;

        log::info!("discovery started");
        Ok(())
    }

    pub fn stop_discovery(&self) -> Result<(), Error> {
        self.send(HciCommand::LeController(LeController::SetScanEnable), &[0x00, 0x00])?;
        log::info!("discovery stopped");
        Ok(())
    }

    pub fn start_advertising(&self, params: AdvertisingParams, advertising_data: &Advertisement, scan_response: &Advertisement) -> Result<(), Error> {
        let adv_type: u8 = if params.connectable { 0x00 } else { 0x03 };

        let mut adv_params = Vec::with_capacity(15);
        adv_params.extend_from_slice(&params.interval_min.to_le_bytes());
        adv_params.extend_from_slice(&params.interval_max.to_le_bytes());
        adv_params.push(adv_type);
        adv_params.push(params.own_address_type);
        adv_params.push(0x00); // direct address type, unused for undirected advertising
        adv_params.extend_from_slice(&[0u8; 6]); // direct address, unused
        adv_params.push(params.channel_map);
        adv_params.push(params.filter_policy);
        self.send(HciCommand::LeController(LeController::SetAdvertisingParameters), &adv_params)?;

        self.send_padded_advertising_data(LeController::SetAdvertisingData, advertising_data)?;
        self.send_padded_advertising_data(LeController::SetScanResponseData, scan_response)?;

        self.send(HciCommand::LeController(LeController::SetAdvertisingEnable), &[0x01])?;
        log::info!("advertising started");
        Ok(())
    }

    fn send_padded_advertising_data(&self, command: LeController, advertisement: &Advertisement) -> Result<(), Error> {
        let encoded = advertisement.encode()?;
        let mut buf = vec![0u8; 32];
        buf[0] = encoded.len() as u8;
        buf[1..1 + encoded.len()].copy_from_slice(&encoded);
        self.send(HciCommand::LeController(command), &buf)?;
        Ok(())
    }

    pub fn stop_advertising(&self) -> Result<(), Error> {
        self.send(HciCommand::LeController(LeController::SetAdvertisingEnable), &[0x00])?;
        log::info!("advertising stopped");
        Ok(())
    }

    /// Issues `LE Create Connection` and blocks until the link is up. The command itself only
    /// ever returns Command Status; the actual outcome arrives later as an `LeConnectionComplete`
    /// event, so this subscribes before sending to avoid a race against the reader thread.
    pub fn create_le_connection(&self, peer: Address, own_address_type: u8) -> Result<ConnectionHandle, Error> {
        let params = *self.default_conn_params.lock().unwrap();
        let events = self.subscribe();

        let mut command = Vec::with_capacity(25);
        command.extend_from_slice(&0x0010u16.to_le_bytes()); // scan interval
        command.extend_from_slice(&0x0010u16.to_le_bytes()); // scan window
        command.push(0x00); // initiator filter policy: use peer address
        command.push(peer.address_type.to_hci_raw());
        command.extend_from_slice(&peer.bytes);
        command.push(own_address_type);
        command.extend_from_slice(&params.interval_min.raw().to_le_bytes());
        command.extend_from_slice(&params.interval_max.raw().to_le_bytes());
        command.extend_from_slice(&params.latency.raw().to_le_bytes());
        command.extend_from_slice(&params.supervision_timeout.raw().to_le_bytes());
        command.extend_from_slice(&0x0000u16.to_le_bytes()); // min CE length
        command.extend_from_slice(&0x0000u16.to_le_bytes()); // max CE length

        self.send(HciCommand::LeController(LeController::CreateConnection), &command)?;

        let deadline = Instant::now() + CONNECTION_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout());
            }

            match events.recv_timeout(remaining) {
                Ok(Event::LeConnectionComplete { status, handle, peer_address, .. }) if peer_address == peer => {
                    check_status(status)?;
                    return Ok(handle);
                }
                Ok(_) => continue,
                Err(_) => return Err(Error::timeout()),
            }
        }
    }

    pub fn disconnect(&self, handle: ConnectionHandle, reason: u8) -> Result<(), Error> {
        let mut command = Vec::with_capacity(3);
        command.extend_from_slice(&handle.raw().to_le_bytes());
        command.push(reason);
        self.send(HciCommand::LinkControl(LinkControl::Disconnect), &command)?;
        Ok(())
    }

    /// Starts (or restarts, on a bonded reconnect) link layer encryption as the central. Only
    /// valid once the connection is up; the resulting `EncryptionChange` event arrives
    /// asynchronously and should be awaited via `subscribe`.
    pub fn start_encryption(&self, handle: ConnectionHandle, ltk: u128, ediv: u16, rand: u64) -> Result<(), Error> {
        let mut command = Vec::with_capacity(28);
        command.extend_from_slice(&handle.raw().to_le_bytes());
        command.extend_from_slice(&rand.to_le_bytes());
        command.extend_from_slice(&ediv.to_le_bytes());
        command.extend_from_slice(&ltk.to_le_bytes());
        self.send(HciCommand::LeController(LeController::StartEncryption), &command)?;
        Ok(())
    }

    /// Answers an `LeLongTermKeyRequest` event as the peripheral, supplying the LTK this adapter
    /// derived for that peer during pairing.
    pub fn long_term_key_request_reply(&self, handle: ConnectionHandle, ltk: u128) -> Result<(), Error> {
        let mut command = Vec::with_capacity(18);
        command.extend_from_slice(&handle.raw().to_le_bytes());
        command.extend_from_slice(&ltk.to_le_bytes());
        self.send(HciCommand::LeController(LeController::LongTermKeyRequestReply), &command)?;
        Ok(())
    }

    /// Refuses an `LeLongTermKeyRequest` event, because this adapter has no bonded key for that
    /// peer (or the request arrived for a handle it doesn't recognize).
    pub fn long_term_key_request_negative_reply(&self, handle: ConnectionHandle) -> Result<(), Error> {
        self.send(HciCommand::LeController(LeController::LongTermKeyRequestNegativeReply), &handle.raw().to_le_bytes())?;
        Ok(())
    }

    fn open_channel(&self, handle: ConnectionHandle, cid: LeUChannelIdentifier) -> Channel {
        let (tx, rx) = mpsc::channel();
        self.channel_senders.write().unwrap().insert((handle, cid_to_val(cid)), tx);
        Channel::new(handle, ChannelIdentifier::Le(cid), Arc::clone(&self.transport), rx)
    }

    /// Opens the fixed ATT channel for an established connection. The caller is responsible for
    /// not opening it twice for the same handle.
    pub fn open_att_channel(&self, handle: ConnectionHandle) -> Channel {
        self.open_channel(handle, LeUChannelIdentifier::AttributeProtocol)
    }

    /// Opens the fixed SMP channel for an established connection.
    pub fn open_smp_channel(&self, handle: ConnectionHandle) -> Channel {
        self.open_channel(handle, LeUChannelIdentifier::SecurityManagerProtocol)
    }

    pub fn peer_address(&self, handle: ConnectionHandle) -> Option<Address> {
        self.connections.read().unwrap().get(&handle).map(|c| c.peer_address)
    }
}

fn cid_to_val(cid: LeUChannelIdentifier) -> u16 {
    match cid {
        LeUChannelIdentifier::AttributeProtocol => 0x4,
        LeUChannelIdentifier::LowEnergyL2CapSignalingChannel => 0x5,
        LeUChannelIdentifier::SecurityManagerProtocol => 0x6,
        LeUChannelIdentifier::DynamicallyAllocated(_) => unreachable!("GATT never opens a dynamic channel"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressType;
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        commands: StdMutex<Vec<(u16, Vec<u8>)>>,
        replies: StdMutex<mpsc::Receiver<Vec<u8>>>,
    }

    impl ControllerTransport for FakeTransport {
        fn send_command(&self, opcode: u16, parameters: &[u8]) -> Result<(), Error> {
            self.commands.lock().unwrap().push((opcode, parameters.to_vec()));
            Ok(())
        }

        fn send_acl_data(&self, _handle: ConnectionHandle, _l2cap_frame: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        fn recv(&self) -> Result<Vec<u8>, Error> {
            self.replies.lock().unwrap().recv().map_err(|_| Error::disconnected())
        }
    }

    fn fake_hci() -> (Arc<Hci>, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(FakeTransport { commands: StdMutex::new(Vec::new()), replies: StdMutex::new(rx) });
        (Hci::new(transport), tx)
    }

    #[test]
    fn send_command_unblocks_on_command_complete() {
        let (hci, feed) = fake_hci();

        let opcode = HciCommand::ControllerAndBaseband(ControllerAndBaseband::Reset).as_opcode_pair().as_opcode();
        let hci_for_reply = Arc::clone(&hci);
        thread::spawn(move || {
            let _ = hci_for_reply;
            let mut raw = vec![0x04, 0x0E, 0x04, 0x01, 0, 0, 0x00];
            raw[4..6].copy_from_slice(&opcode.to_le_bytes());
            feed.send(raw).unwrap();
        });

        let result = hci.send(HciCommand::ControllerAndBaseband(ControllerAndBaseband::Reset), &[]);
        assert!(result.is_ok());
    }

    #[test]
    fn dispatch_acl_drops_unregistered_channel_silently() {
        let (hci, _feed) = fake_hci();
        let frame = crate::l2cap::AclData::new(vec![1, 2, 3], ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol)).into_raw();

        let mut raw = Vec::new();
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        raw.extend_from_slice(&frame);

        hci.dispatch_acl(&raw);
    }

    #[test]
    fn open_att_channel_routes_acl_data_to_its_inbox() {
        let (hci, _feed) = fake_hci();
        let handle = ConnectionHandle::try_from(1).unwrap();
        let channel = hci.open_att_channel(handle);

        let frame = crate::l2cap::AclData::new(vec![9, 9], ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol)).into_raw();
        let mut raw = Vec::new();
        raw.extend_from_slice(&handle.raw().to_le_bytes());
        raw.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        raw.extend_from_slice(&frame);

        hci.dispatch_acl(&raw);

        assert_eq!(channel.receive(Duration::from_millis(100)).unwrap(), vec![9, 9]);
    }

    #[test]
    fn disconnection_complete_removes_registered_channels() {
        let (hci, _feed) = fake_hci();
        let handle = ConnectionHandle::try_from(1).unwrap();
        let channel = hci.open_att_channel(handle);

        let mut raw = vec![0x05, 0x04, 0x00];
        raw.extend_from_slice(&handle.raw().to_le_bytes());
        raw.push(0x13);
        hci.dispatch_event(&raw);

        assert!(hci.channel_senders.read().unwrap().is_empty());

        let frame = crate::l2cap::AclData::new(vec![1], ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol)).into_raw();
        let mut acl = Vec::new();
        acl.extend_from_slice(&handle.raw().to_le_bytes());
        acl.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        acl.extend_from_slice(&frame);
        hci.dispatch_acl(&acl);

        assert!(channel.receive(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn shutdown_joins_reader_thread_once_transport_closes() {
        let (hci, feed) = fake_hci();
        let events = hci.subscribe();
        drop(feed); // stands in for the real transport's socket closing under `shutdown`.
        hci.shutdown();
        assert!(events.recv().is_err(), "subscriber channel should be torn down once shutdown completes");
    }

    #[test]
    fn address_type_round_trips_through_hci_raw() {
        assert_eq!(AddressType::Public.to_hci_raw(), 0x00);
        assert_eq!(AddressType::RandomStatic.to_hci_raw(), 0x01);
    }
}
