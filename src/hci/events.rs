//! HCI event decoding
//!
//! Parses the controller's event packets into a closed `Event` enum covering exactly what this
//! stack's command-matching and connection-lifecycle model needs to wait on or react to (Core
//! Spec Vol 4, Part E §7.7). Anything else decodes to `Event::Unknown` rather than failing, since
//! a controller is free to send events (vendor-specific or otherwise) this stack doesn't act on.

use crate::addr::Address;
use crate::error::{Error, ErrorKind};
use crate::hci::common::{ConnectionHandle, ConnectionInterval, ConnectionLatency, SupervisionTimeout};

const EVT_DISCONNECTION_COMPLETE: u8 = 0x05;
const EVT_ENCRYPTION_CHANGE: u8 = 0x08;
const EVT_COMMAND_COMPLETE: u8 = 0x0E;
const EVT_COMMAND_STATUS: u8 = 0x0F;
const EVT_ENCRYPTION_KEY_REFRESH_COMPLETE: u8 = 0x30;
const EVT_LE_META: u8 = 0x3E;

const SUBEVT_CONNECTION_COMPLETE: u8 = 0x01;
const SUBEVT_ADVERTISING_REPORT: u8 = 0x02;
const SUBEVT_CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
const SUBEVT_LONG_TERM_KEY_REQUEST: u8 = 0x05;

/// An HCI status byte. `0x00` is success; anything else is a Core Spec Vol 2, Part D error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u8);

impl Status {
    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Central,
    Peripheral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingEventType {
    ConnectableUndirected,
    ConnectableDirected,
    ScannableUndirected,
    NonConnectableUndirected,
    ScanResponse,
}

impl AdvertisingEventType {
    fn from_raw(raw: u8) -> Result<Self, Error> {
        match raw {
            0x00 => Ok(AdvertisingEventType::ConnectableUndirected),
            0x01 => Ok(AdvertisingEventType::ConnectableDirected),
            0x02 => Ok(AdvertisingEventType::ScannableUndirected),
            0x03 => Ok(AdvertisingEventType::NonConnectableUndirected),
            0x04 => Ok(AdvertisingEventType::ScanResponse),
            other => Err(Error::new(ErrorKind::Protocol, format!("unknown advertising event type {:#04x}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvertisingReportEntry {
    pub event_type: AdvertisingEventType,
    pub address: Address,
    pub data: Vec<u8>,
    pub rssi: Option<i8>,
}

/// A parsed HCI event.
#[derive(Debug, Clone)]
pub enum Event {
    CommandComplete { opcode: u16, num_hci_command_packets: u8, return_parameters: Vec<u8> },
    CommandStatus { status: Status, opcode: u16, num_hci_command_packets: u8 },
    DisconnectionComplete { status: Status, handle: ConnectionHandle, reason: u8 },
    EncryptionChange { status: Status, handle: ConnectionHandle, enabled: bool },
    EncryptionKeyRefreshComplete { status: Status, handle: ConnectionHandle },
    LeConnectionComplete {
        status: Status,
        handle: ConnectionHandle,
        role: ConnectionRole,
        peer_address: Address,
        interval: ConnectionInterval,
        latency: ConnectionLatency,
        supervision_timeout: SupervisionTimeout,
    },
    LeConnectionUpdateComplete {
        status: Status,
        handle: ConnectionHandle,
        interval: ConnectionInterval,
        latency: ConnectionLatency,
        supervision_timeout: SupervisionTimeout,
    },
    LeAdvertisingReport(Vec<AdvertisingReportEntry>),
    LeLongTermKeyRequest { handle: ConnectionHandle, rand: u64, ediv: u16 },
    Unknown { code: u8, data: Vec<u8> },
}

impl Event {
    /// Parses one event, starting at the event code byte (the packet indicator byte the
    /// transport prefixes every packet with has already been consumed by the caller).
    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 2 {
            return Err(Error::new(ErrorKind::Protocol, "hci event shorter than its 2 byte header"));
        }

        let code = raw[0];
        let len = raw[1] as usize;
        let params = raw
            .get(2..2 + len)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "hci event length field exceeds the buffer"))?;

        match code {
            EVT_COMMAND_COMPLETE => {
                if params.len() < 3 {
                    return Err(short());
                }
                Ok(Event::CommandComplete {
                    num_hci_command_packets: params[0],
                    opcode: u16::from_le_bytes([params[1], params[2]]),
                    return_parameters: params[3..].to_vec(),
                })
            }
            EVT_COMMAND_STATUS => {
                if params.len() < 4 {
                    return Err(short());
                }
                Ok(Event::CommandStatus {
                    status: Status(params[0]),
                    num_hci_command_packets: params[1],
                    opcode: u16::from_le_bytes([params[2], params[3]]),
                })
            }
            EVT_DISCONNECTION_COMPLETE => {
                if params.len() < 4 {
                    return Err(short());
                }
                Ok(Event::DisconnectionComplete { status: Status(params[0]), handle: handle_at(params, 1)?, reason: params[3] })
            }
            EVT_ENCRYPTION_CHANGE => {
                if params.len() < 4 {
                    return Err(short());
                }
                Ok(Event::EncryptionChange { status: Status(params[0]), handle: handle_at(params, 1)?, enabled: params[3] != 0 })
            }
            EVT_ENCRYPTION_KEY_REFRESH_COMPLETE => {
                if params.len() < 3 {
                    return Err(short());
                }
                Ok(Event::EncryptionKeyRefreshComplete { status: Status(params[0]), handle: handle_at(params, 1)? })
            }
            EVT_LE_META => decode_le_meta(params),
            other => Ok(Event::Unknown { code: other, data: params.to_vec() }),
        }
    }

    /// The HCI command opcode this event completes, if any -- used to match a blocked
    /// `send_command` caller to its response.
    pub fn completes_opcode(&self) -> Option<u16> {
        match self {
            Event::CommandComplete { opcode, .. } => Some(*opcode),
            Event::CommandStatus { opcode, .. } => Some(*opcode),
            _ => None,
        }
    }
}

fn short() -> Error {
    Error::new(ErrorKind::Protocol, "hci event parameters shorter than the event requires")
}

fn handle_at(params: &[u8], offset: usize) -> Result<ConnectionHandle, Error> {
    let raw = u16::from_le_bytes([params[offset], params[offset + 1]]) & 0x0FFF;
    ConnectionHandle::try_from(raw).map_err(|e| Error::new(ErrorKind::Protocol, e))
}

fn interval_at(body: &[u8], offset: usize, what: &'static str) -> Result<ConnectionInterval, Error> {
    ConnectionInterval::try_from(u16::from_le_bytes([body[offset], body[offset + 1]]))
        .map_err(|_| Error::new(ErrorKind::Protocol, format!("{} interval out of range", what)))
}

fn latency_at(body: &[u8], offset: usize, what: &'static str) -> Result<ConnectionLatency, Error> {
    ConnectionLatency::try_from(u16::from_le_bytes([body[offset], body[offset + 1]]))
        .map_err(|_| Error::new(ErrorKind::Protocol, format!("{} latency out of range", what)))
}

fn timeout_at(body: &[u8], offset: usize, what: &'static str) -> Result<SupervisionTimeout, Error> {
    SupervisionTimeout::try_from(u16::from_le_bytes([body[offset], body[offset + 1]]))
        .map_err(|_| Error::new(ErrorKind::Protocol, format!("{} supervision timeout out of range", what)))
}

fn decode_le_meta(params: &[u8]) -> Result<Event, Error> {
    if params.is_empty() {
        return Err(short());
    }

    let subevent = params[0];
    let body = &params[1..];

    match subevent {
        SUBEVT_CONNECTION_COMPLETE => {
            if body.len() < 18 {
                return Err(short());
            }
            let status = Status(body[0]);
            let handle = handle_at(body, 1)?;
            let role = if body[3] == 0 { ConnectionRole::Central } else { ConnectionRole::Peripheral };
            let mut peer_bytes = [0u8; 6];
            peer_bytes.copy_from_slice(&body[5..11]);
            let peer_address = Address::from_raw(peer_bytes, body[4] != 0);

            Ok(Event::LeConnectionComplete {
                status,
                handle,
                role,
                peer_address,
                interval: interval_at(body, 11, "connection complete")?,
                latency: latency_at(body, 13, "connection complete")?,
                supervision_timeout: timeout_at(body, 15, "connection complete")?,
            })
        }
        SUBEVT_CONNECTION_UPDATE_COMPLETE => {
            if body.len() < 9 {
                return Err(short());
            }
            Ok(Event::LeConnectionUpdateComplete {
                status: Status(body[0]),
                handle: handle_at(body, 1)?,
                interval: interval_at(body, 3, "connection update")?,
                latency: latency_at(body, 5, "connection update")?,
                supervision_timeout: timeout_at(body, 7, "connection update")?,
            })
        }
        SUBEVT_LONG_TERM_KEY_REQUEST => {
            if body.len() < 12 {
                return Err(short());
            }
            let handle = handle_at(body, 0)?;
            let rand = u64::from_le_bytes(body[2..10].try_into().unwrap());
            let ediv = u16::from_le_bytes([body[10], body[11]]);
            Ok(Event::LeLongTermKeyRequest { handle, rand, ediv })
        }
        SUBEVT_ADVERTISING_REPORT => decode_advertising_report(body),
        _ => Ok(Event::Unknown { code: EVT_LE_META, data: params.to_vec() }),
    }
}

fn decode_advertising_report(body: &[u8]) -> Result<Event, Error> {
    if body.is_empty() {
        return Err(short());
    }

    let num_reports = body[0] as usize;
    let mut cursor = 1usize;
    let mut reports = Vec::with_capacity(num_reports);

    for _ in 0..num_reports {
        let fixed = body.get(cursor..cursor + 9).ok_or_else(short)?;
        let event_type = AdvertisingEventType::from_raw(fixed[0])?;
        let mut address_bytes = [0u8; 6];
        address_bytes.copy_from_slice(&fixed[2..8]);
        let address = Address::from_raw(address_bytes, fixed[1] != 0);
        let data_len = fixed[8] as usize;
        cursor += 9;

        let data = body.get(cursor..cursor + data_len).ok_or_else(short)?.to_vec();
        cursor += data_len;

        let rssi_raw = *body.get(cursor).ok_or_else(short)? as i8;
        cursor += 1;
        let rssi = if rssi_raw == 127 { None } else { Some(rssi_raw) };

        reports.push(AdvertisingReportEntry { event_type, address, data, rssi });
    }

    Ok(Event::LeAdvertisingReport(reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressType;

    #[test]
    fn decodes_command_complete() {
        let raw = [0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];
        let event = Event::decode(&raw).unwrap();
        match event {
            Event::CommandComplete { opcode, num_hci_command_packets, return_parameters } => {
                assert_eq!(opcode, 0x0C03);
                assert_eq!(num_hci_command_packets, 1);
                assert_eq!(return_parameters, vec![0x00]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_le_connection_complete() {
        let mut params = vec![
            0x00, // status
            0x01, 0x00, // handle
            0x00, // role = central
            0x00, // peer address type = public
            0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0, // peer address
            0x08, 0x00, // interval
            0x00, 0x00, // latency
            0xC8, 0x00, // supervision timeout
            0x00, // master clock accuracy, unused
        ];
        let mut raw = vec![0x3E, (params.len() + 1) as u8, SUBEVT_CONNECTION_COMPLETE];
        raw.append(&mut params);

        let event = Event::decode(&raw).unwrap();
        match event {
            Event::LeConnectionComplete { status, handle, role, peer_address, .. } => {
                assert!(status.is_success());
                assert_eq!(handle.raw(), 1);
                assert_eq!(role, ConnectionRole::Central);
                assert_eq!(peer_address.address_type, AddressType::Public);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_advertising_report_with_no_rssi() {
        let mut raw = vec![0x3E, 0, SUBEVT_ADVERTISING_REPORT, 0x01];
        raw.push(0x00); // event type
        raw.push(0x00); // address type
        raw.extend_from_slice(&[0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0]);
        raw.push(2); // data length
        raw.extend_from_slice(&[0xAA, 0xBB]);
        raw.push(127); // rssi not available
        raw[1] = (raw.len() - 2) as u8;

        let event = Event::decode(&raw).unwrap();
        match event {
            Event::LeAdvertisingReport(reports) => {
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].data, vec![0xAA, 0xBB]);
                assert_eq!(reports[0].rssi, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_code_does_not_fail() {
        let raw = [0xFE, 0x01, 0x00];
        assert!(matches!(Event::decode(&raw).unwrap(), Event::Unknown { code: 0xFE, .. }));
    }
}
