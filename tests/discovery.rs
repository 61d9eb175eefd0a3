//! Exercises `DiscoveryPolicy::PauseConnectedUntilDisconnected`: a connecting peer pauses
//! scanning, and disconnecting resumes it, over a loopback `Hci` instead of a real controller.

mod support;

use direct_bt::adapter::{Adapter, AdapterConfig, DiscoveryPolicy, StatusListener};
use direct_bt::adapter::device::Device;
use direct_bt::hci::common::ConnectionHandle;
use direct_bt::hci::DiscoveryParams;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::FakeController;

#[derive(Default)]
struct DiscoveringLog {
    states: Mutex<Vec<bool>>,
}

impl StatusListener for DiscoveringLog {
    fn discovering_changed(&self, discovering: bool) {
        self.states.lock().unwrap().push(discovering);
    }
}

fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Scenario seed: discovery pauses as soon as a connection completes, and resumes within a
/// second of that peer disconnecting, without needing any further application action.
#[test]
fn discovery_pauses_on_connect_and_resumes_on_disconnect() {
    let transport = FakeController::new();
    let local_address = support::public_address(0xC0);
    let peer_address = support::public_address(0xD0);
    let key_store_dir = support::scratch_dir("discovery-pause-resume");

    let mut config = AdapterConfig::new(local_address, key_store_dir.clone());
    config.discovery_policy = DiscoveryPolicy::PauseConnectedUntilDisconnected;
    let adapter = Adapter::new(config, transport.clone()).unwrap();

    let log = Arc::new(DiscoveringLog::default());
    adapter.add_listener(log.clone());

    adapter.start_discovery(DiscoveryParams::default()).unwrap();
    wait_for(|| log.states.lock().unwrap().last() == Some(&true), "discovery to start");

    let handle = ConnectionHandle::try_from(1).unwrap();
    transport.inject(support::le_connection_complete(0x00, handle, true, peer_address));
    wait_for(|| adapter.device(&peer_address).and_then(|d: Device| d.connection_handle).is_some(), "connection to register");
    wait_for(|| log.states.lock().unwrap().last() == Some(&false), "discovery to pause for the connecting peer");

    transport.inject(support::disconnection_complete(0x00, handle, 0x13));
    wait_for(|| log.states.lock().unwrap().last() == Some(&true), "discovery to resume within a second of disconnect");

    adapter.shutdown();
    let _ = std::fs::remove_dir_all(&key_store_dir);
}

/// Scenario seed: `DiscoveryPolicy::AlwaysOn` never pauses scanning for a connecting peer.
#[test]
fn always_on_policy_ignores_connections() {
    let transport = FakeController::new();
    let local_address = support::public_address(0xC1);
    let peer_address = support::public_address(0xD1);
    let key_store_dir = support::scratch_dir("discovery-always-on");

    let mut config = AdapterConfig::new(local_address, key_store_dir.clone());
    config.discovery_policy = DiscoveryPolicy::AlwaysOn;
    let adapter = Adapter::new(config, transport.clone()).unwrap();

    let log = Arc::new(DiscoveringLog::default());
    adapter.add_listener(log.clone());

    adapter.start_discovery(DiscoveryParams::default()).unwrap();
    wait_for(|| log.states.lock().unwrap().last() == Some(&true), "discovery to start");

    let handle = ConnectionHandle::try_from(1).unwrap();
    transport.inject(support::le_connection_complete(0x00, handle, true, peer_address));
    wait_for(|| adapter.device(&peer_address).and_then(|d: Device| d.connection_handle).is_some(), "connection to register");

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(log.states.lock().unwrap().as_slice(), &[true], "always-on discovery must never pause for a connection");

    adapter.shutdown();
    let _ = std::fs::remove_dir_all(&key_store_dir);
}
