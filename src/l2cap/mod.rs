//! Logical Link Control and Adaptation Protocol (L2CAP)
//!
//! This crate only implements the fixed channels an LE-U logical link needs to carry ATT and
//! SMP: there is no credit-based dynamic channel allocation, since GATT never needs one.

use crate::error::{Error, ErrorKind};
use crate::hci::common::ConnectionHandle;
use crate::hci::transport::ControllerTransport;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Channel Identifier. See Bluetooth Core Spec v5.0, Vol 3, Part A, §2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelIdentifier {
    Le(LeUChannelIdentifier),
}

impl ChannelIdentifier {
    fn to_val(&self) -> u16 {
        match self {
            ChannelIdentifier::Le(ci) => ci.to_val(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DynChannelId {
    channel_id: u16,
}

impl DynChannelId {
    pub const LE_BOUNDS: std::ops::RangeInclusive<u16> = 0x0040..=0x007F;

    fn new(channel_id: u16) -> Self {
        DynChannelId { channel_id }
    }

    pub fn new_le(channel_id: u16) -> Result<LeUChannelIdentifier, u16> {
        if Self::LE_BOUNDS.contains(&channel_id) {
            Ok(LeUChannelIdentifier::DynamicallyAllocated(DynChannelId::new(channel_id)))
        } else {
            Err(channel_id)
        }
    }
}

/// LE-U fixed and dynamic channel identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LeUChannelIdentifier {
    AttributeProtocol,
    LowEnergyL2CapSignalingChannel,
    SecurityManagerProtocol,
    DynamicallyAllocated(DynChannelId),
}

impl LeUChannelIdentifier {
    fn to_val(&self) -> u16 {
        match self {
            LeUChannelIdentifier::AttributeProtocol => 0x4,
            LeUChannelIdentifier::LowEnergyL2CapSignalingChannel => 0x5,
            LeUChannelIdentifier::SecurityManagerProtocol => 0x6,
            LeUChannelIdentifier::DynamicallyAllocated(dyn_id) => dyn_id.channel_id,
        }
    }

    fn from_raw(val: u16) -> Option<Self> {
        match val {
            0x4 => Some(LeUChannelIdentifier::AttributeProtocol),
            0x5 => Some(LeUChannelIdentifier::LowEnergyL2CapSignalingChannel),
            0x6 => Some(LeUChannelIdentifier::SecurityManagerProtocol),
            _ if DynChannelId::LE_BOUNDS.contains(&val) => {
                Some(LeUChannelIdentifier::DynamicallyAllocated(DynChannelId::new(val)))
            }
            _ => None,
        }
    }
}

/// The minimum ATT MTU over an LE logical link.
pub const MIN_ATT_MTU_LE: u16 = 23;

/// The minimum ATT MTU over a BR/EDR logical link.
pub const MIN_ATT_MTU_BR_EDR: u16 = 48;

/// A single L2CAP basic-mode frame: a 2-byte LE length, a 2-byte LE channel id, then payload.
#[derive(Debug, Clone)]
pub struct AclData {
    channel_id: ChannelIdentifier,
    payload: Vec<u8>,
}

impl AclData {
    pub fn new(payload: Vec<u8>, channel_id: ChannelIdentifier) -> Self {
        AclData { channel_id, payload }
    }

    pub fn channel_id(&self) -> ChannelIdentifier {
        self.channel_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_raw(self) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + self.payload.len());
        let len = self.payload.len() as u16;

        v.extend_from_slice(&len.to_le_bytes());
        v.extend_from_slice(&self.channel_id.to_val().to_le_bytes());
        v.extend_from_slice(&self.payload);
        v
    }

    pub fn from_raw(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 4 {
            return Err(Error::new(ErrorKind::Protocol, "l2cap frame shorter than its 4 byte header"));
        }

        let len = u16::from_le_bytes([data[0], data[1]]) as usize;
        let raw_cid = u16::from_le_bytes([data[2], data[3]]);
        let payload = &data[4..];

        if payload.len() != len {
            return Err(Error::new(ErrorKind::Protocol, "l2cap length field doesn't match payload size"));
        }

        let cid = LeUChannelIdentifier::from_raw(raw_cid)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "unrecognized l2cap channel id"))?;

        Ok(AclData { channel_id: ChannelIdentifier::Le(cid), payload: payload.to_vec() })
    }
}

/// A fixed-channel L2CAP connection-oriented transport over a single ACL link.
///
/// `send`/`receive` block the calling thread; there is no event loop here. The owning `Hci`'s
/// single reader thread demultiplexes inbound ACL data by connection handle and channel id into
/// the right `Channel`'s inbox.
pub struct Channel {
    connection_handle: ConnectionHandle,
    channel_id: ChannelIdentifier,
    transport: Arc<dyn ControllerTransport>,
    inbox: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
}

impl Channel {
    pub(crate) fn new(
        connection_handle: ConnectionHandle,
        channel_id: ChannelIdentifier,
        transport: Arc<dyn ControllerTransport>,
        inbox: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Channel { connection_handle, channel_id, transport, inbox: Arc::new(Mutex::new(inbox)) }
    }

    pub fn channel_id(&self) -> ChannelIdentifier {
        self.channel_id
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<(), Error> {
        let frame = AclData::new(payload, self.channel_id).into_raw();
        self.transport.send_acl_data(self.connection_handle, &frame)
    }

    /// Block until the next payload addressed to this channel arrives, or the timeout elapses.
    pub fn receive(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
        self.inbox
            .lock()
            .unwrap()
            .recv_timeout(timeout)
            .map_err(|_| Error::timeout())
    }

    /// Block indefinitely for the next payload. Used by server roles that have nothing else to
    /// do but wait for the next client request.
    pub fn receive_blocking(&self) -> Result<Vec<u8>, Error> {
        self.inbox.lock().unwrap().recv().map_err(|_| Error::disconnected())
    }
}

/// A `Channel` with nowhere to send and nothing incoming, for unit tests of protocol layers
/// built on top of `Channel` that don't exercise the transport itself.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    struct NullTransport;

    impl ControllerTransport for NullTransport {
        fn send_command(&self, _opcode: u16, _parameters: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        fn send_acl_data(&self, _handle: ConnectionHandle, _l2cap_frame: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        fn recv(&self) -> Result<Vec<u8>, Error> {
            Err(Error::disconnected())
        }
    }

    pub(crate) fn test_channel() -> Channel {
        let (_tx, rx) = mpsc::channel();
        Channel::new(
            ConnectionHandle::try_from(0).unwrap(),
            ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol),
            Arc::new(NullTransport),
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_raw_bytes() {
        let acl = AclData::new(vec![1, 2, 3], ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol));
        let raw = acl.clone().into_raw();
        let back = AclData::from_raw(&raw).unwrap();

        assert_eq!(back.payload(), &[1, 2, 3]);
        assert_eq!(back.channel_id(), acl.channel_id());
    }

    #[test]
    fn rejects_mismatched_length_field() {
        let mut raw = AclData::new(vec![1, 2, 3], ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol))
            .into_raw();
        raw[0] = 0xFF;

        assert_eq!(AclData::from_raw(&raw).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn dynamic_channel_id_out_of_bounds_is_rejected() {
        assert!(DynChannelId::new_le(0x0030).is_err());
        assert!(DynChannelId::new_le(0x0050).is_ok());
    }
}
