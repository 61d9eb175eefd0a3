//! Generic Attribute Profile (GATT)
//!
//! GATT is a thin layer over ATT: services, characteristics, and descriptors are just
//! conventionally-typed attributes (Core Spec Vol 3, Part G). `GattClient` runs the client-side
//! discovery procedure and caches its result; `GattServerBuilder`/`GattServer` build and serve an
//! attribute table with GATT's notify/indicate and CCCD semantics layered on top of
//! `att::server::Server`.

use crate::att::client::Client;
use crate::att::pdu::{AttError, AttPdu};
use crate::att::server::{SecurityState, Server as AttServer};
use crate::att::{Attribute, AttributePermissions, AttributeValue};
use crate::error::{Error, ErrorKind};
use crate::l2cap::Channel;
use crate::uuid::Uuid;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const PRIMARY_SERVICE: u16 = 0x2800;
const CHARACTERISTIC: u16 = 0x2803;
const CLIENT_CHARACTERISTIC_CONFIGURATION: u16 = 0x2902;

/// How long the server waits for a Handle Value Confirmation after sending an indication before
/// treating the link as unresponsive.
pub const INDICATION_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

fn uuid_bytes(uuid: &Uuid) -> Vec<u8> {
    match uuid.shortest_form() {
        Uuid::Uuid16(v) => v.to_le_bytes().to_vec(),
        other => other.as_u128().to_le_bytes().to_vec(),
    }
}

fn uuid_from_bytes(raw: &[u8]) -> Result<Uuid, Error> {
    match raw.len() {
        2 => Ok(Uuid::Uuid16(u16::from_le_bytes([raw[0], raw[1]]))),
        16 => {
            let mut arr = [0u8; 16];
            arr.copy_from_slice(raw);
            Ok(Uuid::Uuid128(u128::from_le_bytes(arr)))
        }
        other => Err(Error::new(ErrorKind::Protocol, format!("{} byte uuid isn't 2 or 16 bytes", other))),
    }
}

fn is_attribute_not_found(err: &Error) -> bool {
    err.kind() == ErrorKind::Protocol && err.message() == format!("att error {:#04x}", AttError::AttributeNotFound.to_raw())
}

/// A discovered primary service: the handle range `[handle, end_group_handle]` it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub handle: u16,
    pub end_group_handle: u16,
    pub uuid: Uuid,
}

/// The Characteristic Properties bitfield (Core Spec Vol 3, Part G, §3.3.1.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    pub fn to_raw(self) -> u8 {
        let mut raw = 0u8;
        if self.broadcast { raw |= 0x01; }
        if self.read { raw |= 0x02; }
        if self.write_without_response { raw |= 0x04; }
        if self.write { raw |= 0x08; }
        if self.notify { raw |= 0x10; }
        if self.indicate { raw |= 0x20; }
        if self.authenticated_signed_writes { raw |= 0x40; }
        if self.extended_properties { raw |= 0x80; }
        raw
    }

    pub fn from_raw(raw: u8) -> Self {
        CharacteristicProperties {
            broadcast: raw & 0x01 != 0,
            read: raw & 0x02 != 0,
            write_without_response: raw & 0x04 != 0,
            write: raw & 0x08 != 0,
            notify: raw & 0x10 != 0,
            indicate: raw & 0x20 != 0,
            authenticated_signed_writes: raw & 0x40 != 0,
            extended_properties: raw & 0x80 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub properties: CharacteristicProperties,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// A characteristic and the descriptors found in its remaining handle range.
#[derive(Debug, Clone)]
pub struct DiscoveredCharacteristic {
    pub characteristic: Characteristic,
    pub descriptors: Vec<Descriptor>,
}

impl DiscoveredCharacteristic {
    pub fn cccd(&self) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == Uuid::Uuid16(CLIENT_CHARACTERISTIC_CONFIGURATION))
    }
}

/// A service and its fully discovered characteristics.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub service: Service,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// Receives server-initiated Handle Value Notification/Indication PDUs once a
/// [`GattClient`]'s notification dispatcher is running.
pub trait NotificationListener: Send + Sync {
    fn on_value_changed(&self, value_handle: u16, value: &[u8], is_indication: bool);
}

/// A GATT client bound to one ATT bearer. Service discovery runs once and is cached; call
/// `refresh_services` to force it to run again.
pub struct GattClient {
    att: Client,
    services: Mutex<Option<Vec<DiscoveredService>>>,
}

impl GattClient {
    pub fn new(channel: Channel) -> Self {
        GattClient { att: Client::new(channel), services: Mutex::new(None) }
    }

    /// Negotiates the ATT MTU. Must be called, if at all, before any other request on this client
    /// per Core Spec Vol 3, Part F §3.4.2.
    pub fn negotiate_mtu(&mut self, client_rx_mtu: u16) -> Result<u16, Error> {
        self.att.exchange_mtu(client_rx_mtu)
    }

    /// Returns the cached service list, running full discovery on first call.
    pub fn services(&self) -> Result<Vec<DiscoveredService>, Error> {
        if let Some(cached) = self.services.lock().unwrap().clone() {
            return Ok(cached);
        }

        let discovered = self.discover_all()?;
        *self.services.lock().unwrap() = Some(discovered.clone());
        Ok(discovered)
    }

    /// Drops the cached service list; the next `services()` call re-runs discovery.
    pub fn refresh_services(&self) {
        *self.services.lock().unwrap() = None;
    }

    fn discover_all(&self) -> Result<Vec<DiscoveredService>, Error> {
        let mut out = Vec::new();

        for service in self.discover_services()? {
            let characteristics = self.discover_characteristics(&service)?;
            let mut discovered_characteristics = Vec::with_capacity(characteristics.len());

            for (i, characteristic) in characteristics.iter().enumerate() {
                let start = characteristic.value_handle + 1;
                let end = characteristics.get(i + 1).map(|c| c.declaration_handle - 1).unwrap_or(service.end_group_handle);

                let descriptors = if start > end { Vec::new() } else { self.discover_descriptors(start, end)? };
                discovered_characteristics.push(DiscoveredCharacteristic { characteristic: *characteristic, descriptors });
            }

            out.push(DiscoveredService { service, characteristics: discovered_characteristics });
        }

        Ok(out)
    }

    fn discover_services(&self) -> Result<Vec<Service>, Error> {
        let mut services = Vec::new();
        let mut start = 0x0001u16;

        loop {
            let entries = match self.att.read_by_group_type(start, 0xFFFF, Uuid::Uuid16(PRIMARY_SERVICE)) {
                Ok(entries) => entries,
                Err(e) if is_attribute_not_found(&e) => break,
                Err(e) => return Err(e),
            };

            for entry in &entries {
                services.push(Service { handle: entry.handle, end_group_handle: entry.group_end_handle, uuid: uuid_from_bytes(&entry.value)? });
            }

            let last_end = entries.last().unwrap().group_end_handle;
            if last_end == 0xFFFF {
                break;
            }
            start = last_end + 1;
        }

        Ok(services)
    }

    fn discover_characteristics(&self, service: &Service) -> Result<Vec<Characteristic>, Error> {
        let mut characteristics = Vec::new();
        let mut start = service.handle + 1;

        while start <= service.end_group_handle {
            let entries = match self.att.read_by_type(start, service.end_group_handle, Uuid::Uuid16(CHARACTERISTIC)) {
                Ok(entries) => entries,
                Err(e) if is_attribute_not_found(&e) => break,
                Err(e) => return Err(e),
            };

            for entry in &entries {
                if entry.value.len() < 3 {
                    return Err(Error::new(ErrorKind::Protocol, "characteristic declaration shorter than 3 bytes"));
                }
                let properties = CharacteristicProperties::from_raw(entry.value[0]);
                let value_handle = u16::from_le_bytes([entry.value[1], entry.value[2]]);
                let uuid = uuid_from_bytes(&entry.value[3..])?;
                characteristics.push(Characteristic { declaration_handle: entry.handle, value_handle, properties, uuid });
            }

            match entries.last().unwrap().handle.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(characteristics)
    }

    fn discover_descriptors(&self, range_start: u16, range_end: u16) -> Result<Vec<Descriptor>, Error> {
        let mut descriptors = Vec::new();
        let mut start = range_start;

        while start <= range_end {
            let pairs = match self.att.find_information(start, range_end) {
                Ok(pairs) => pairs,
                Err(e) if is_attribute_not_found(&e) => break,
                Err(e) => return Err(e),
            };

            if pairs.is_empty() {
                break;
            }

            let last_handle = pairs.last().unwrap().handle;
            descriptors.extend(pairs.into_iter().map(|p| Descriptor { handle: p.handle, uuid: p.uuid }));

            match last_handle.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(descriptors)
    }

    /// Reads a characteristic's value, following up with Read Blob requests if it's longer than
    /// one response.
    pub fn read_value<V: AttributeValue>(&self, characteristic: &Characteristic) -> Result<V, Error> {
        self.att.read_value(characteristic.value_handle)
    }

    /// Writes a characteristic's value. `with_ack` chooses Write Request (acknowledged, subject to
    /// the 30 second request timeout) over Write Command (fire-and-forget).
    pub fn write_value<V: AttributeValue>(&self, characteristic: &Characteristic, value: &V, with_ack: bool) -> Result<(), Error> {
        if with_ack {
            self.att.write(characteristic.value_handle, value)
        } else {
            self.att.write_command(characteristic.value_handle, value)
        }
    }

    /// Enables whichever of notify/indicate the characteristic supports by writing its CCCD;
    /// returns which were actually turned on. Fails with `NotSupported` if the characteristic has
    /// no CCCD among its discovered descriptors.
    pub fn enable_notification_or_indication(&self, characteristic: &DiscoveredCharacteristic) -> Result<(bool, bool), Error> {
        let cccd = characteristic
            .cccd()
            .ok_or_else(|| Error::new(ErrorKind::NotSupported, "characteristic has no client characteristic configuration descriptor"))?;

        let notify = characteristic.characteristic.properties.notify;
        let indicate = characteristic.characteristic.properties.indicate;
        let mut bits = 0u16;
        if notify { bits |= 0x0001; }
        if indicate { bits |= 0x0002; }

        self.att.write(cccd.handle, &bits)?;
        Ok((notify, indicate))
    }

    /// Disables notifications and indications by writing zero to the CCCD.
    pub fn disable_notification_or_indication(&self, characteristic: &DiscoveredCharacteristic) -> Result<(), Error> {
        let cccd = characteristic
            .cccd()
            .ok_or_else(|| Error::new(ErrorKind::NotSupported, "characteristic has no client characteristic configuration descriptor"))?;
        self.att.write(cccd.handle, &0u16)
    }

    /// Spawns a dedicated thread that blocks on server-initiated PDUs and dispatches them to
    /// `listener`, auto-confirming indications. Once this is running, issue no further requests
    /// on this same client: both would contend for the one channel inbox.
    pub fn spawn_notification_dispatcher(self: Arc<Self>, listener: Arc<dyn NotificationListener>) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            match self.att.receive_server_initiated(Duration::from_secs(3600)) {
                Ok(AttPdu::HandleValueNotification { handle, value }) => listener.on_value_changed(handle, &value, false),
                Ok(AttPdu::HandleValueIndication { handle, value }) => {
                    listener.on_value_changed(handle, &value, true);
                    if self.att.confirm_indication().is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        })
    }
}

/// Called when a client writes a characteristic's CCCD, or reads/writes any other attribute the
/// server table exposes; `on_read`/`on_write` may veto the operation by returning an `AttError`.
pub trait GattServerListener: Send + Sync {
    fn on_read(&self, _value_handle: u16) -> Result<(), AttError> {
        Ok(())
    }

    fn on_write(&self, _value_handle: u16, _value: &[u8]) -> Result<(), AttError> {
        Ok(())
    }

    fn client_char_config_changed(&self, _value_handle: u16, _notify: bool, _indicate: bool) {}
}

/// Signals the SMP/HCI layer to initiate link encryption after an `InsufficientEncryption`
/// response, if a stored LTK makes that worth attempting; the decision of whether one exists
/// belongs to whoever implements this, not to the GATT server.
pub trait EncryptionEscalation: Send + Sync {
    fn request_encryption(&self);
}

struct CccdEntry {
    value_handle: u16,
    supports_notify: bool,
    supports_indicate: bool,
}

/// Builds a GATT server's attribute table one service/characteristic at a time, in the order
/// they'll appear on the wire.
pub struct GattServerBuilder {
    server: AttServer,
    services: Vec<Service>,
    pending: Option<Service>,
    cccd_map: HashMap<u16, CccdEntry>,
}

impl GattServerBuilder {
    pub fn new(channel: Channel) -> Self {
        GattServerBuilder { server: AttServer::new(channel), services: Vec::new(), pending: None, cccd_map: HashMap::new() }
    }

    fn finalize_pending(&mut self) {
        if let Some(mut service) = self.pending.take() {
            service.end_group_handle = self.server.next_handle() - 1;
            self.services.push(service);
        }
    }

    /// Starts a new primary service. Must come before any of its characteristics.
    pub fn add_service(&mut self, uuid: Uuid) -> &mut Self {
        self.finalize_pending();
        let handle = self.server.push(Attribute::new(Uuid::Uuid16(PRIMARY_SERVICE), vec![AttributePermissions::Read], uuid));
        self.pending = Some(Service { handle, end_group_handle: handle, uuid });
        self
    }

    /// Adds a characteristic (declaration + value, plus a CCCD if it notifies or indicates) to
    /// the service currently being built.
    pub fn add_characteristic<V: AttributeValue + Send + Sync + 'static>(
        &mut self,
        uuid: Uuid,
        properties: CharacteristicProperties,
        value: V,
        value_permissions: Vec<AttributePermissions>,
    ) -> Characteristic {
        let declaration_handle = self.server.next_handle();
        let value_handle = declaration_handle + 1;

        let mut declaration = Vec::with_capacity(3 + 16);
        declaration.push(properties.to_raw());
        declaration.extend_from_slice(&value_handle.to_le_bytes());
        declaration.extend_from_slice(&uuid_bytes(&uuid));

        self.server.push(Attribute::new(Uuid::Uuid16(CHARACTERISTIC), vec![AttributePermissions::Read], declaration));
        self.server.push(Attribute::new(uuid, value_permissions, value));

        let characteristic = Characteristic { declaration_handle, value_handle, properties, uuid };

        if properties.notify || properties.indicate {
            let cccd_handle = self.server.push(Attribute::new(
                Uuid::Uuid16(CLIENT_CHARACTERISTIC_CONFIGURATION),
                vec![AttributePermissions::Read, AttributePermissions::Write],
                0u16,
            ));
            self.cccd_map.insert(
                cccd_handle,
                CccdEntry { value_handle, supports_notify: properties.notify, supports_indicate: properties.indicate },
            );
        }

        characteristic
    }

    /// Finishes the table and wires up the GATT-specific read/write/error hooks.
    pub fn build(mut self, listener: Arc<dyn GattServerListener>, encryption_escalation: Option<Arc<dyn EncryptionEscalation>>) -> GattServer {
        self.finalize_pending();

        let cccd_map = Arc::new(self.cccd_map);
        let write_listener = Arc::clone(&listener);
        let write_cccd_map = Arc::clone(&cccd_map);
        self.server.set_write_hook(Box::new(move |handle, value| {
            if let Some(entry) = write_cccd_map.get(&handle) {
                if value.len() != 2 {
                    return Err(AttError::InvalidAttributeValueLength);
                }
                let bits = u16::from_le_bytes([value[0], value[1]]);
                let notify = entry.supports_notify && bits & 0x0001 != 0;
                let indicate = entry.supports_indicate && bits & 0x0002 != 0;
                write_listener.client_char_config_changed(entry.value_handle, notify, indicate);
                Ok(())
            } else {
                write_listener.on_write(handle, value)
            }
        }));

        let read_listener = Arc::clone(&listener);
        self.server.set_read_hook(Box::new(move |handle| read_listener.on_read(handle)));

        if let Some(escalation) = encryption_escalation {
            self.server.set_error_hook(Box::new(move |error, _handle| {
                if error == AttError::InsufficientEncryption {
                    escalation.request_encryption();
                }
            }));
        }

        GattServer {
            server: self.server,
            services: self.services,
            indicate_queue: Mutex::new(VecDeque::new()),
            awaiting_confirmation: Mutex::new(None),
        }
    }
}

/// A running GATT server: an attribute table with CCCD/notify/indicate semantics served over one
/// ATT bearer.
pub struct GattServer {
    server: AttServer,
    services: Vec<Service>,
    indicate_queue: Mutex<VecDeque<(u16, Vec<u8>)>>,
    awaiting_confirmation: Mutex<Option<Instant>>,
}

impl GattServer {
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn set_security_state(&mut self, security: SecurityState) {
        self.server.set_security_state(security);
    }

    /// Fire-and-forget notification; never queued, never waited on.
    pub fn notify<V: AttributeValue>(&self, value_handle: u16, value: &V) -> Result<(), Error> {
        self.server.notify(value_handle, value)
    }

    /// Queues an indication. Indications are sent one at a time, waiting for the client's
    /// confirmation (or `INDICATION_CONFIRMATION_TIMEOUT`) before the next is sent.
    pub fn indicate<V: AttributeValue>(&self, value_handle: u16, value: &V) -> Result<(), Error> {
        self.indicate_queue.lock().unwrap().push_back((value_handle, value.to_bytes()));
        Ok(())
    }

    fn pump_indicate_queue(&self) -> Result<(), Error> {
        let mut awaiting = self.awaiting_confirmation.lock().unwrap();
        if awaiting.is_some() {
            return Ok(());
        }

        if let Some((handle, value)) = self.indicate_queue.lock().unwrap().pop_front() {
            self.server.indicate(handle, &value)?;
            *awaiting = Some(Instant::now());
        }

        Ok(())
    }

    /// Serves requests until the channel disconnects, a transport error occurs, or a queued
    /// indication goes unconfirmed for `INDICATION_CONFIRMATION_TIMEOUT`.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.pump_indicate_queue()?;

            let waiting_on_confirmation = self.awaiting_confirmation.lock().unwrap().is_some();
            let timeout = if waiting_on_confirmation { INDICATION_CONFIRMATION_TIMEOUT } else { Duration::from_secs(3600) };

            match self.server.receive_with_timeout(timeout) {
                Ok(raw) => {
                    if matches!(AttPdu::decode(&raw), Ok(AttPdu::HandleValueConfirmation)) {
                        *self.awaiting_confirmation.lock().unwrap() = None;
                    }
                    self.server.process(&raw)?;
                }
                Err(e) if e.kind() == ErrorKind::Timeout => {
                    let mut awaiting = self.awaiting_confirmation.lock().unwrap();
                    if let Some(sent_at) = *awaiting {
                        if sent_at.elapsed() >= INDICATION_CONFIRMATION_TIMEOUT {
                            return Err(Error::new(ErrorKind::Disconnected, "indication confirmation timed out"));
                        }
                    }
                    let _ = &mut awaiting;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::AttributeRestriction;

    #[test]
    fn characteristic_properties_round_trip_through_raw() {
        let props = CharacteristicProperties { read: true, notify: true, write: false, ..Default::default() };
        let raw = props.to_raw();
        assert_eq!(raw, 0x12);
        assert_eq!(CharacteristicProperties::from_raw(raw), props);
    }

    #[test]
    fn build_attaches_cccd_only_when_notify_or_indicate() {
        let mut builder = GattServerBuilder::new(crate::l2cap::test_support::test_channel());

        builder.add_service(Uuid::Uuid16(0x1234));
        let readable = builder.add_characteristic(
            Uuid::Uuid16(0x2a00),
            CharacteristicProperties { read: true, ..Default::default() },
            0u8,
            vec![AttributePermissions::Read],
        );
        let notifying = builder.add_characteristic(
            Uuid::Uuid16(0x2a01),
            CharacteristicProperties { read: true, notify: true, ..Default::default() },
            0u8,
            vec![AttributePermissions::Read],
        );

        assert_eq!(notifying.value_handle, readable.value_handle + 2);

        struct NullListener;
        impl GattServerListener for NullListener {}

        let server = builder.build(Arc::new(NullListener), None);
        assert_eq!(server.services().len(), 1);
        assert_eq!(server.services()[0].end_group_handle, notifying.value_handle + 1);
    }

    #[test]
    fn write_hook_routes_cccd_writes_to_client_char_config_changed() {
        struct RecordingListener {
            seen: Mutex<Option<(u16, bool, bool)>>,
        }
        impl GattServerListener for RecordingListener {
            fn client_char_config_changed(&self, value_handle: u16, notify: bool, indicate: bool) {
                *self.seen.lock().unwrap() = Some((value_handle, notify, indicate));
            }
        }

        let mut builder = GattServerBuilder::new(crate::l2cap::test_support::test_channel());
        builder.add_service(Uuid::Uuid16(0x1234));
        let characteristic = builder.add_characteristic(
            Uuid::Uuid16(0x2a00),
            CharacteristicProperties { read: true, notify: true, ..Default::default() },
            0u8,
            vec![AttributePermissions::Read],
        );

        let listener = Arc::new(RecordingListener { seen: Mutex::new(None) });
        let mut server = builder.build(listener.clone(), None);

        let cccd_handle = characteristic.value_handle + 1;
        let write = AttPdu::WriteRequest { handle: cccd_handle, value: vec![0x01, 0x00] }.encode();
        server.server.process(&write).unwrap();

        assert_eq!(*listener.seen.lock().unwrap(), Some((characteristic.value_handle, true, false)));
        let _ = AttributeRestriction::Read;
    }
}
