//! Callbacks an adapter drives as connections, pairing, and discovery progress.

use crate::adapter::device::{Device, PairingMode, PairingState};

/// Observes adapter-level state changes. Every method has a default no-op (or permissive, for
/// `device_found`) implementation so a listener only needs to override what it cares about.
///
/// All callbacks run on the adapter's event-dispatch thread, not the caller's thread: a slow or
/// blocking listener delays processing of every subsequent controller event.
pub trait StatusListener: Send + Sync {
    /// The adapter's own settings changed (power state, local name, discoverability).
    fn adapter_settings_changed(&self) {}

    /// Scanning started or stopped, whether by direct request or by `DiscoveryPolicy` pausing it
    /// around a connection.
    fn discovering_changed(&self, _discovering: bool) {}

    /// A new advertisement was seen, or an already-known device's advertisement was updated.
    /// Returning `false` filters the device out of the adapter's device table entirely.
    fn device_found(&self, _device: &Device) -> bool {
        true
    }

    /// A known device's cached state (name, RSSI) changed without a connection event.
    fn device_updated(&self, _device: &Device) {}

    fn device_connected(&self, _device: &Device) {}

    /// The device's `PairingState` changed, to `state` using association model `mode`.
    fn device_pairing_state(&self, _device: &Device, _state: PairingState, _mode: PairingMode) {}

    /// The device is connected, paired (if required), and its GATT service discovery (if
    /// performed) has completed: the point at which application code can safely start using it.
    fn device_ready(&self, _device: &Device) {}

    fn device_disconnected(&self, _device: &Device) {}
}
