//! Shared fakes for the integration tests under `tests/`: a `ControllerTransport` that never
//! touches a real radio, so pairing, GATT, and discovery can be exercised end to end against
//! each other instead of against a physical controller.

#![allow(dead_code)]

use direct_bt::addr::Address;
use direct_bt::error::Error;
use direct_bt::hci::common::ConnectionHandle;
use direct_bt::hci::transport::ControllerTransport;
use std::sync::{mpsc, Arc, Mutex};

/// A `ControllerTransport` with nowhere to send by default: every command gets a generic
/// successful Command Complete, and `link`ing two instances together forwards ACL data between
/// them as though they were opposite ends of one connection. Stands in for a controller pair
/// without a radio, the same role `l2cap::test_support::NullTransport` plays for single-sided
/// protocol tests, but wired through so both sides of a link see each other's traffic.
pub struct FakeController {
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    peer: Mutex<Option<Arc<FakeController>>>,
    pub sent_commands: Mutex<Vec<(u16, Vec<u8>)>>,
}

impl FakeController {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        Arc::new(FakeController {
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
            peer: Mutex::new(None),
            sent_commands: Mutex::new(Vec::new()),
        })
    }

    /// Links two controllers so ACL data either sends arrives as inbound ACL data on the other,
    /// standing in for two ends of the same over-the-air connection.
    pub fn link(a: &Arc<FakeController>, b: &Arc<FakeController>) {
        *a.peer.lock().unwrap() = Some(Arc::clone(b));
        *b.peer.lock().unwrap() = Some(Arc::clone(a));
    }

    /// Feeds a raw HCI packet (indicator byte included) to this controller's `Hci` as though the
    /// controller had sent it unprompted: an event, or ACL data for an already-"connected" handle.
    pub fn inject(&self, packet: Vec<u8>) {
        self.inbound_tx.send(packet).expect("hci reader thread should still be alive");
    }
}

impl ControllerTransport for FakeController {
    fn send_command(&self, opcode: u16, parameters: &[u8]) -> Result<(), Error> {
        self.sent_commands.lock().unwrap().push((opcode, parameters.to_vec()));
        self.inject(command_complete(opcode, 0x00));
        Ok(())
    }

    fn send_acl_data(&self, handle: ConnectionHandle, l2cap_frame: &[u8]) -> Result<(), Error> {
        if let Some(peer) = self.peer.lock().unwrap().clone() {
            let mut raw = vec![0x02];
            raw.extend_from_slice(&handle.raw().to_le_bytes());
            raw.extend_from_slice(&(l2cap_frame.len() as u16).to_le_bytes());
            raw.extend_from_slice(l2cap_frame);
            peer.inject(raw);
        }
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>, Error> {
        self.inbound_rx.lock().unwrap().recv().map_err(|_| Error::disconnected())
    }
}

/// A Command Complete event (packet indicator included) with a one-byte status-only return
/// parameter -- enough for every command this stack's blocking callers check.
pub fn command_complete(opcode: u16, status: u8) -> Vec<u8> {
    let mut raw = vec![0x04, 0x0E, 0x04, 0x01, 0, 0, status];
    raw[4..6].copy_from_slice(&opcode.to_le_bytes());
    raw
}

/// An `LE Connection Complete` event, `role_central` being whether the local side of this event
/// is the link layer master.
pub fn le_connection_complete(status: u8, handle: ConnectionHandle, role_central: bool, peer: Address) -> Vec<u8> {
    let mut body = vec![status];
    body.extend_from_slice(&handle.raw().to_le_bytes());
    body.push(if role_central { 0x00 } else { 0x01 });
    body.push(0x00); // peer address type: public, matching every `Address` this suite builds
    body.extend_from_slice(&peer.bytes);
    body.extend_from_slice(&0x0018u16.to_le_bytes()); // interval
    body.extend_from_slice(&0x0000u16.to_le_bytes()); // latency
    body.extend_from_slice(&0x01F4u16.to_le_bytes()); // supervision timeout
    body.push(0x00); // master clock accuracy, unused

    let mut raw = vec![0x04, 0x3E, (body.len() + 1) as u8, 0x01];
    raw.extend_from_slice(&body);
    raw
}

pub fn disconnection_complete(status: u8, handle: ConnectionHandle, reason: u8) -> Vec<u8> {
    vec![0x04, 0x05, 0x04, status, handle.raw().to_le_bytes()[0], handle.raw().to_le_bytes()[1], reason]
}

pub fn public_address(last_byte: u8) -> Address {
    Address::new([0x11, 0x22, 0x33, 0x44, 0x55, last_byte], direct_bt::addr::AddressType::Public)
}

/// A directory under the OS temp dir unique to this test process, for `AdapterConfig::key_store_dir`.
pub fn scratch_dir(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("direct-bt-test-{}-{}-{:?}", std::process::id(), label, std::thread::current().id()))
}
