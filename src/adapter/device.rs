//! The per-peer state an adapter tracks: what's been seen over the air, and what's connected.

use crate::addr::Address;
use crate::gatt::DiscoveredService;
use crate::hci::common::ConnectionHandle;
use crate::hci::events::ConnectionRole;
use crate::sm::SecurityLevel;
use crate::uuid::Uuid;
use std::time::Instant;

/// Where a peer stands in the Security Manager pairing process (Core Spec Vol 3, Part H, §2.3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    None,
    Failed,
    RequestedByResponder,
    FeatureExchangeStarted,
    FeatureExchangeCompleted,
    PasskeyExpected,
    NumericCompareExpected,
    OobExpected,
    KeyDistribution,
    Completed,
}

/// The association model a completed (or in-progress) pairing used, or is using.
///
/// The `*Ini`/`*Res` split matters because the same method looks different from each side: the
/// initiator displays or enters the passkey/number the responder generated, never the other way
/// around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMode {
    None,
    Negotiating,
    JustWorks,
    PasskeyEntryIni,
    PasskeyEntryRes,
    NumericCompareIni,
    NumericCompareRes,
    OutOfBand,
    /// Encryption started directly from a stored `KeyBin`, skipping SMP pairing entirely.
    PrePaired,
}

/// A discovered or connected peer.
///
/// `generation` increments on every new connection to this address, so a caller holding a stale
/// `Device` snapshot from a previous connection can tell it apart from the current one rather than
/// silently acting on data from a connection that has already ended.
#[derive(Debug, Clone)]
pub struct Device {
    pub address: Address,
    pub name: Option<String>,
    pub rssi: Option<i8>,
    pub tx_power: Option<i8>,
    /// Service UUIDs advertised in the last advertising report seen for this peer, before any
    /// GATT connection. Distinct from `gatt_services`, which is only populated after an actual
    /// service discovery over a connection.
    pub advertised_services: Vec<Uuid>,
    pub connection_handle: Option<ConnectionHandle>,
    /// Which side of the connection we are; `None` until `LeConnectionComplete` arrives.
    pub role: Option<ConnectionRole>,
    pub pairing_state: PairingState,
    pub pairing_mode: PairingMode,
    pub security_level: SecurityLevel,
    /// The peer's GATT service table, cached after a successful service discovery. `None` until
    /// discovery has run at least once for the device's current connection.
    pub gatt_services: Option<Vec<DiscoveredService>>,
    pub generation: u64,
    /// When this record was first created, either by first discovery or a direct connect.
    pub created: Instant,
    /// When this record was last updated by any event (advertisement, connection, pairing).
    pub last_seen: Option<Instant>,
}

impl Device {
    pub fn new(address: Address) -> Self {
        Device {
            address,
            name: None,
            rssi: None,
            tx_power: None,
            advertised_services: Vec::new(),
            connection_handle: None,
            role: None,
            pairing_state: PairingState::None,
            pairing_mode: PairingMode::None,
            security_level: SecurityLevel::None,
            gatt_services: None,
            generation: 0,
            created: Instant::now(),
            last_seen: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_handle.is_some()
    }

    pub(crate) fn mark_connected(&mut self, handle: ConnectionHandle, role: ConnectionRole) {
        self.connection_handle = Some(handle);
        self.role = Some(role);
        self.generation = self.generation.wrapping_add(1);
        self.last_seen = Some(Instant::now());
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connection_handle = None;
        self.pairing_state = PairingState::None;
        self.pairing_mode = PairingMode::None;
        self.security_level = SecurityLevel::None;
        self.gatt_services = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressType;

    fn addr() -> Address {
        Address::new([1, 2, 3, 4, 5, 6], AddressType::Public)
    }

    #[test]
    fn generation_bumps_on_each_connect() {
        let mut device = Device::new(addr());
        assert_eq!(device.generation, 0);

        device.mark_connected(ConnectionHandle::try_from(1).unwrap(), ConnectionRole::Central);
        assert_eq!(device.generation, 1);

        device.mark_disconnected();
        device.mark_connected(ConnectionHandle::try_from(2).unwrap(), ConnectionRole::Central);
        assert_eq!(device.generation, 2);
    }

    #[test]
    fn disconnect_resets_pairing_state() {
        let mut device = Device::new(addr());
        device.pairing_state = PairingState::Completed;
        device.pairing_mode = PairingMode::JustWorks;
        device.mark_disconnected();
        assert_eq!(device.pairing_state, PairingState::None);
        assert_eq!(device.pairing_mode, PairingMode::None);
    }
}
