//! Exercises SMP pairing and the pre-paired reconnect path end to end, over a loopback pair of
//! `Hci`s instead of a real controller.

mod support;

use direct_bt::adapter::{Adapter, AdapterConfig, PairingMode, PairingState};
use direct_bt::hci::common::ConnectionHandle;
use direct_bt::hci::Hci;
use direct_bt::keystore::{KeyBin, LtkRecord};
use direct_bt::sm::pdu::{IoCapability, KeyDistribution};
use direct_bt::sm::{pair_as_initiator, pair_as_responder, LinkEncryptor, PairingParams, PasskeyIo, SecurityLevel};
use std::sync::Arc;
use std::time::Duration;
use support::FakeController;

struct NeverAsked;

impl PasskeyIo for NeverAsked {
    fn obtain_passkey(&self) -> Result<u32, direct_bt::error::Error> {
        panic!("just works pairing must never ask for a passkey");
    }

    fn confirm_numeric(&self, _value: u32) -> Result<bool, direct_bt::error::Error> {
        panic!("just works pairing must never ask for numeric comparison");
    }
}

struct RecordingEncryptor {
    started: std::sync::Mutex<Option<(u128, u16, u64)>>,
}

impl RecordingEncryptor {
    fn new() -> Self {
        RecordingEncryptor { started: std::sync::Mutex::new(None) }
    }
}

impl LinkEncryptor for RecordingEncryptor {
    fn start_encryption(&self, key: u128, ediv: u16, rand: u64) -> Result<(), direct_bt::error::Error> {
        *self.started.lock().unwrap() = Some((key, ediv, rand));
        Ok(())
    }
}

/// Scenario seed: two peers with no input/output capability pair with Just Works, and land on
/// the same session key on both sides.
#[test]
fn just_works_pairing_derives_matching_session_keys() {
    let handle = ConnectionHandle::try_from(1).unwrap();
    let central_transport = FakeController::new();
    let peripheral_transport = FakeController::new();
    FakeController::link(&central_transport, &peripheral_transport);

    let central_hci = Hci::new(central_transport);
    let peripheral_hci = Hci::new(peripheral_transport);

    let central_channel = central_hci.open_smp_channel(handle);
    let peripheral_channel = peripheral_hci.open_smp_channel(handle);

    let central_address = support::public_address(0x01);
    let peripheral_address = support::public_address(0x02);

    let central_params = PairingParams {
        io_capability: IoCapability::NoInputNoOutput,
        mitm_required: false,
        bonding: true,
        local_address: central_address,
        peer_address: peripheral_address,
        local_key_distribution: KeyDistribution { enc_key: true, id_key: true, sign_key: true, link_key: false },
    };
    let peripheral_params = PairingParams { local_address: peripheral_address, peer_address: central_address, ..central_params.clone() };

    let central_encryptor = RecordingEncryptor::new();
    let peripheral_encryptor = RecordingEncryptor::new();
    let passkey_io = NeverAsked;

    let responder = std::thread::spawn(move || pair_as_responder(&peripheral_channel, &peripheral_params, &passkey_io, &peripheral_encryptor));

    let initiator_passkey_io = NeverAsked;
    let initiator_keys = pair_as_initiator(&central_channel, &central_params, &initiator_passkey_io, &central_encryptor).unwrap();
    let responder_keys = responder.join().unwrap().unwrap();

    assert_eq!(initiator_keys.ltk, responder_keys.ltk);
    assert!(initiator_keys.ltk.is_some());
    assert_eq!(initiator_keys.method, Some(direct_bt::sm::PairingMethod::JustWorks));
    assert_eq!(responder_keys.method, Some(direct_bt::sm::PairingMethod::JustWorks));
}

/// Scenario seed: a peer with a bonded `KeyBin` on disk skips SMP entirely and jumps straight to
/// encryption, landing in `PairingMode::PrePaired`.
#[test]
fn pre_paired_reconnect_skips_smp() {
    let key_store_dir = support::scratch_dir("pre-paired-reconnect");
    let local_address = support::public_address(0xA0);
    let peer_address = support::public_address(0xB0);

    let mut bin = KeyBin::new(local_address, peer_address, SecurityLevel::EncOnly, IoCapability::NoInputNoOutput);
    bin.ltk_init = Some(LtkRecord { ltk: 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10, ediv: 0, rand: 0, key_size: 16, authenticated: false, secure_connections: true });
    bin.save(&key_store_dir).unwrap();

    let transport = FakeController::new();
    let config = AdapterConfig::new(local_address, key_store_dir.clone());
    let adapter = Adapter::new(config, transport.clone()).unwrap();

    let handle = ConnectionHandle::try_from(1).unwrap();
    transport.inject(support::le_connection_complete(0x00, handle, true, peer_address));

    // Wait for the adapter's event loop to register the connection before pairing against it.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while adapter.device(&peer_address).and_then(|d| d.connection_handle).is_none() {
        assert!(std::time::Instant::now() < deadline, "adapter never observed the fake connection");
        std::thread::sleep(Duration::from_millis(5));
    }

    struct Unreachable;
    impl PasskeyIo for Unreachable {
        fn obtain_passkey(&self) -> Result<u32, direct_bt::error::Error> {
            panic!("pre-paired reconnect must never run SMP");
        }
        fn confirm_numeric(&self, _value: u32) -> Result<bool, direct_bt::error::Error> {
            panic!("pre-paired reconnect must never run SMP");
        }
    }

    adapter.pair(peer_address, Arc::new(Unreachable)).unwrap();

    let device = adapter.device(&peer_address).unwrap();
    assert_eq!(device.pairing_state, PairingState::Completed);
    assert_eq!(device.pairing_mode, PairingMode::PrePaired);
    assert_eq!(device.security_level, SecurityLevel::EncOnly);

    adapter.shutdown();
    let _ = std::fs::remove_dir_all(&key_store_dir);
}
