//! Exercises a GATT client and server talking over a loopback pair of `Hci`s: MTU negotiation,
//! read/write, a malformed request, and indication confirmation gating.

mod support;

use direct_bt::att::pdu::{AttError, AttPdu};
use direct_bt::att::AttributePermissions;
use direct_bt::gatt::{CharacteristicProperties, GattClient, GattServerBuilder, GattServerListener};
use direct_bt::hci::common::ConnectionHandle;
use direct_bt::hci::Hci;
use direct_bt::uuid::Uuid;
use std::sync::Arc;
use std::time::Duration;
use support::FakeController;

struct NullListener;
impl GattServerListener for NullListener {}

/// Links a central and a peripheral `Hci` over one fake connection handle and returns both
/// sides' ATT channels, ready for a `GattClient`/`GattServer` pair.
fn linked_att_channels() -> (Arc<Hci>, Arc<Hci>, direct_bt::l2cap::Channel, direct_bt::l2cap::Channel) {
    let handle = ConnectionHandle::try_from(1).unwrap();
    let client_transport = FakeController::new();
    let server_transport = FakeController::new();
    FakeController::link(&client_transport, &server_transport);

    let client_hci = Hci::new(client_transport);
    let server_hci = Hci::new(server_transport);

    let client_channel = client_hci.open_att_channel(handle);
    let server_channel = server_hci.open_att_channel(handle);

    (client_hci, server_hci, client_channel, server_channel)
}

/// Scenario seed: a client negotiates the MTU, then writes and reads back a characteristic value
/// smaller than one PDU (a single Read Request/Response, no Read Blob needed).
#[test]
fn write_then_read_round_trips_through_negotiated_mtu() {
    let (client_hci, server_hci, client_channel, server_channel) = linked_att_channels();

    let mut builder = GattServerBuilder::new(server_channel);
    builder.add_service(Uuid::Uuid16(0x180F)); // Battery Service
    let level = builder.add_characteristic(
        Uuid::Uuid16(0x2A19), // Battery Level
        CharacteristicProperties { read: true, write: true, ..Default::default() },
        vec![0x00u8],
        vec![AttributePermissions::Read, AttributePermissions::Write],
    );
    let mut server = builder.build(Arc::new(NullListener), None);

    let server_thread = std::thread::spawn(move || {
        let _ = server.run();
    });

    let mut client = GattClient::new(client_channel);
    let mtu = client.negotiate_mtu(100).unwrap();
    assert!(mtu >= 23);

    client.write_value(&level, &vec![0x4Bu8], true).unwrap();
    let read_back: Vec<u8> = client.read_value(&level).unwrap();
    assert_eq!(read_back, vec![0x4B]);

    client_hci.shutdown();
    server_hci.shutdown();
    drop(client_hci);
    drop(server_hci);
    let _ = server_thread.join();
}

/// Scenario seed: a malformed opcode the server doesn't recognize gets an Error Response instead
/// of silently being dropped or killing the connection.
#[test]
fn unrecognized_opcode_gets_an_error_response() {
    let (client_hci, server_hci, client_channel, server_channel) = linked_att_channels();

    let mut builder = GattServerBuilder::new(server_channel);
    builder.add_service(Uuid::Uuid16(0x1800));
    let mut server = builder.build(Arc::new(NullListener), None);

    let server_thread = std::thread::spawn(move || {
        let _ = server.run();
    });

    client_channel.send(vec![0xFF]).unwrap();
    let raw = client_channel.receive(Duration::from_secs(1)).unwrap();
    match AttPdu::decode(&raw).unwrap() {
        AttPdu::ErrorResponse { request_opcode, error, .. } => {
            assert_eq!(request_opcode, 0xFF);
            assert_eq!(error, AttError::RequestNotSupported);
        }
        other => panic!("expected an error response, got {:?}", other),
    }

    client_hci.shutdown();
    server_hci.shutdown();
    drop(client_hci);
    drop(server_hci);
    let _ = server_thread.join();
}

/// Scenario seed: a second indication is withheld until the first is confirmed, so a slow or
/// silent client never sees indications reordered or double-delivered.
#[test]
fn second_indication_waits_for_first_confirmation() {
    let (client_hci, server_hci, client_channel, server_channel) = linked_att_channels();

    let mut builder = GattServerBuilder::new(server_channel);
    builder.add_service(Uuid::Uuid16(0x1809)); // Health Thermometer
    let measurement = builder.add_characteristic(
        Uuid::Uuid16(0x2A1C),
        CharacteristicProperties { indicate: true, ..Default::default() },
        vec![0u8],
        vec![AttributePermissions::Read],
    );
    let mut server = builder.build(Arc::new(NullListener), None);
    server.indicate(measurement.value_handle, &vec![0x01u8]).unwrap();
    server.indicate(measurement.value_handle, &vec![0x02u8]).unwrap();

    let server_thread = std::thread::spawn(move || {
        let _ = server.run();
    });

    let first = client_channel.receive(Duration::from_secs(1)).unwrap();
    match AttPdu::decode(&first).unwrap() {
        AttPdu::HandleValueIndication { handle, value } => {
            assert_eq!(handle, measurement.value_handle);
            assert_eq!(value, vec![0x01]);
        }
        other => panic!("expected the first indication, got {:?}", other),
    }

    assert!(client_channel.receive(Duration::from_millis(200)).is_err(), "second indication must not arrive before confirmation");

    client_channel.send(AttPdu::HandleValueConfirmation.encode()).unwrap();

    let second = client_channel.receive(Duration::from_secs(1)).unwrap();
    match AttPdu::decode(&second).unwrap() {
        AttPdu::HandleValueIndication { handle, value } => {
            assert_eq!(handle, measurement.value_handle);
            assert_eq!(value, vec![0x02]);
        }
        other => panic!("expected the second indication, got {:?}", other),
    }

    client_hci.shutdown();
    server_hci.shutdown();
    drop(client_hci);
    drop(server_hci);
    let _ = server_thread.join();
}
