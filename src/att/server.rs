//! The ATT server role: owns an attribute table and answers client requests against it.
//!
//! Attribute storage is type-erased behind `ServerAttribute` so a single table can hold
//! attributes of different Rust value types; lookup is a linear scan by handle, which is fine
//! at the table sizes a single peripheral's GATT database reaches.

use super::pdu::{AttError, AttPdu, ExecuteWriteFlag, HandleUuidPair, HandlesInformation, ReadByGroupTypeEntry, ReadByTypeEntry};
use super::{Attribute, AttributePermissions, AttributeRestriction, AttributeValue, EncryptionKeySize};
use crate::error::Error;
use crate::l2cap::{Channel, MIN_ATT_MTU_LE};
use crate::uuid::Uuid;

/// The largest ATT_MTU this server will negotiate up to.
pub const SERVER_RX_MTU: u16 = 517;

/// What the link supplying this server's channel currently guarantees. Set by the adapter layer
/// once SMP pairing completes or a bonded link re-encrypts.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityState {
    pub encrypted: bool,
    pub authenticated: bool,
    pub authorized: bool,
    pub key_size: Option<EncryptionKeySize>,
}

trait ServerAttribute: Send + Sync {
    fn attribute_type(&self) -> Uuid;
    fn handle(&self) -> u16;
    fn permissions(&self) -> Vec<AttributePermissions>;
    fn read(&self) -> Vec<u8>;
    fn write(&mut self, data: &[u8]) -> Result<(), AttError>;
}

struct TypedAttribute<V> {
    inner: Attribute<V>,
}

impl<V: AttributeValue + Send + Sync> ServerAttribute for TypedAttribute<V> {
    fn attribute_type(&self) -> Uuid {
        self.inner.attribute_type()
    }

    fn handle(&self) -> u16 {
        self.inner.handle().expect("attribute added to a server table always has a handle")
    }

    fn permissions(&self) -> Vec<AttributePermissions> {
        self.inner.permissions().to_vec()
    }

    fn read(&self) -> Vec<u8> {
        self.inner.value().to_bytes()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), AttError> {
        let value = V::from_bytes(data)?;
        *self.inner.value_mut() = value;
        Ok(())
    }
}

/// Called before a write is committed to the table; can veto it or react to it (a CCCD write
/// updating a characteristic's notify/indicate state, for instance).
pub type WriteHook = Box<dyn Fn(u16, &[u8]) -> Result<(), AttError> + Send + Sync>;

/// Called before a read is returned to the client; can veto it.
pub type ReadHook = Box<dyn Fn(u16) -> Result<(), AttError> + Send + Sync>;

/// Called whenever an error response is about to be sent, so a caller layered on top of `Server`
/// can react (escalating to encryption on `InsufficientEncryption`, for instance) without `Server`
/// itself knowing anything about GATT or SMP.
pub type ErrorHook = Box<dyn Fn(AttError, u16) + Send + Sync>;

/// A blocking ATT server bound to one L2CAP fixed channel.
pub struct Server {
    channel: Channel,
    attributes: Vec<Box<dyn ServerAttribute>>,
    next_handle: u16,
    mtu: u16,
    security: SecurityState,
    prepare_queue: Vec<(u16, u16, Vec<u8>)>,
    write_hook: Option<WriteHook>,
    read_hook: Option<ReadHook>,
    error_hook: Option<ErrorHook>,
}

impl Server {
    pub fn new(channel: Channel) -> Self {
        Server {
            channel,
            attributes: Vec::new(),
            next_handle: 1,
            mtu: MIN_ATT_MTU_LE,
            security: SecurityState::default(),
            prepare_queue: Vec::new(),
            write_hook: None,
            read_hook: None,
            error_hook: None,
        }
    }

    pub fn set_security_state(&mut self, security: SecurityState) {
        self.security = security;
    }

    pub fn set_write_hook(&mut self, hook: WriteHook) {
        self.write_hook = Some(hook);
    }

    pub fn set_read_hook(&mut self, hook: ReadHook) {
        self.read_hook = Some(hook);
    }

    pub fn set_error_hook(&mut self, hook: ErrorHook) {
        self.error_hook = Some(hook);
    }

    /// The handle the next `push` will assign. Lets a caller building a multi-attribute construct
    /// (a GATT characteristic declaration plus its value) predict the value's handle before the
    /// declaration pointing to it is pushed.
    pub fn next_handle(&self) -> u16 {
        self.next_handle
    }

    /// Adds an attribute to the table, assigning it the next free handle.
    pub fn push<V: AttributeValue + Send + Sync + 'static>(&mut self, mut attribute: Attribute<V>) -> u16 {
        let handle = self.next_handle;
        attribute.set_handle(handle);
        self.next_handle += 1;
        self.attributes.push(Box::new(TypedAttribute { inner: attribute }));
        handle
    }

    fn find(&self, handle: u16) -> Option<usize> {
        self.attributes.iter().position(|a| a.handle() == handle)
    }

    fn check_permission(&self, attr: &dyn ServerAttribute, restriction: AttributeRestriction) -> Result<(), AttError> {
        let mut granted = false;

        for permission in attr.permissions() {
            match permission {
                AttributePermissions::Read if restriction == AttributeRestriction::Read => granted = true,
                AttributePermissions::Write if restriction == AttributeRestriction::Write => granted = true,
                AttributePermissions::Encryption(r, key_size) if r == restriction => {
                    if !self.security.encrypted {
                        return Err(AttError::InsufficientEncryption);
                    }
                    if self.security.key_size.map_or(true, |k| k < key_size) {
                        return Err(AttError::InsufficientEncryptionKeySize);
                    }
                    granted = true;
                }
                AttributePermissions::Authentication(r) if r == restriction => {
                    if !self.security.authenticated {
                        return Err(AttError::InsufficientAuthentication);
                    }
                    granted = true;
                }
                AttributePermissions::Authorization(r) if r == restriction => {
                    if !self.security.authorized {
                        return Err(AttError::InsufficientAuthorization);
                    }
                    granted = true;
                }
                _ => {}
            }
        }

        if granted {
            Ok(())
        } else {
            Err(match restriction {
                AttributeRestriction::Read => AttError::ReadNotPermitted,
                AttributeRestriction::Write => AttError::WriteNotPermitted,
            })
        }
    }

    fn read_handle(&self, handle: u16) -> Result<Vec<u8>, AttError> {
        let idx = self.find(handle).ok_or(AttError::AttributeNotFound)?;
        self.check_permission(self.attributes[idx].as_ref(), AttributeRestriction::Read)?;
        if let Some(hook) = &self.read_hook {
            hook(handle)?;
        }
        Ok(self.attributes[idx].read())
    }

    fn write_handle(&mut self, handle: u16, value: &[u8]) -> Result<(), AttError> {
        let idx = self.find(handle).ok_or(AttError::AttributeNotFound)?;
        self.check_permission(self.attributes[idx].as_ref(), AttributeRestriction::Write)?;
        if let Some(hook) = &self.write_hook {
            hook(handle, value)?;
        }
        self.attributes[idx].write(value)
    }

    /// Blocks for the next inbound PDU up to `timeout`, without processing it. Lets a caller
    /// layered on top interleave its own timed waits (an outstanding indication's confirmation
    /// timeout, for instance) with normal request servicing.
    pub fn receive_with_timeout(&self, timeout: std::time::Duration) -> Result<Vec<u8>, Error> {
        self.channel.receive(timeout)
    }

    /// Serve requests until the channel disconnects or a transport error occurs.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            let raw = self.channel.receive_blocking()?;
            self.process(&raw)?;
        }
    }

    /// Handle exactly one inbound PDU. Exposed separately from `run` for testing.
    pub fn process(&mut self, raw: &[u8]) -> Result<(), Error> {
        let request_opcode = raw.first().copied().unwrap_or(0);

        let pdu = match AttPdu::decode(raw) {
            Ok(pdu) => pdu,
            Err(e) => return self.send_error(request_opcode, 0, e),
        };

        match pdu {
            AttPdu::ExchangeMtuRequest { client_rx_mtu } => {
                self.mtu = client_rx_mtu.min(SERVER_RX_MTU).max(MIN_ATT_MTU_LE);
                self.channel.send(AttPdu::ExchangeMtuResponse { server_rx_mtu: SERVER_RX_MTU }.encode())
            }
            AttPdu::ReadRequest { handle } => match self.read_handle(handle) {
                Ok(value) => self.channel.send(AttPdu::ReadResponse { value }.encode()),
                Err(e) => self.send_error(request_opcode, handle, e),
            },
            AttPdu::ReadBlobRequest { handle, offset } => match self.read_handle(handle) {
                Ok(value) => {
                    let offset = offset as usize;
                    if offset > value.len() {
                        self.send_error(request_opcode, handle, AttError::InvalidOffset)
                    } else {
                        self.channel.send(AttPdu::ReadBlobResponse { value: value[offset..].to_vec() }.encode())
                    }
                }
                Err(e) => self.send_error(request_opcode, handle, e),
            },
            AttPdu::ReadByTypeRequest { starting_handle, ending_handle, attribute_type } => {
                self.handle_read_by_type(request_opcode, starting_handle, ending_handle, attribute_type)
            }
            AttPdu::ReadByGroupTypeRequest { starting_handle, ending_handle, group_type } => {
                self.handle_read_by_group_type(request_opcode, starting_handle, ending_handle, group_type)
            }
            AttPdu::FindInformationRequest { starting_handle, ending_handle } => {
                self.handle_find_information(request_opcode, starting_handle, ending_handle)
            }
            AttPdu::FindByTypeValueRequest { starting_handle, ending_handle, attribute_type, attribute_value } => {
                self.handle_find_by_type_value(starting_handle, ending_handle, attribute_type, &attribute_value)
            }
            AttPdu::WriteRequest { handle, value } => match self.write_handle(handle, &value) {
                Ok(()) => self.channel.send(AttPdu::WriteResponse.encode()),
                Err(e) => self.send_error(request_opcode, handle, e),
            },
            AttPdu::WriteCommand { handle, value } => {
                let _ = self.write_handle(handle, &value);
                Ok(())
            }
            AttPdu::PrepareWriteRequest { handle, offset, value } => {
                if let Some(idx) = self.find(handle) {
                    if let Err(e) = self.check_permission(self.attributes[idx].as_ref(), AttributeRestriction::Write) {
                        return self.send_error(request_opcode, handle, e);
                    }
                } else {
                    return self.send_error(request_opcode, handle, AttError::AttributeNotFound);
                }

                self.prepare_queue.push((handle, offset, value.clone()));
                self.channel.send(AttPdu::PrepareWriteResponse { handle, offset, value }.encode())
            }
            AttPdu::ExecuteWriteRequest { flags } => self.handle_execute_write(flags),
            AttPdu::ReadMultipleRequest { handles } => {
                let mut values = Vec::new();
                for handle in &handles {
                    match self.read_handle(*handle) {
                        Ok(value) => values.extend(value),
                        Err(e) => return self.send_error(request_opcode, *handle, e),
                    }
                }
                self.channel.send(AttPdu::ReadMultipleResponse { values }.encode())
            }
            AttPdu::HandleValueConfirmation => Ok(()),
            other => self.send_error(request_opcode, 0, unsupported(&other)),
        }
    }

    fn handle_read_by_type(
        &self,
        request_opcode: u8,
        starting_handle: u16,
        ending_handle: u16,
        attribute_type: Uuid,
    ) -> Result<(), Error> {
        let mut entries: Vec<ReadByTypeEntry> = Vec::new();
        let mut permission_error = None;

        for attr in &self.attributes {
            let handle = attr.handle();
            if handle < starting_handle || handle > ending_handle || attr.attribute_type() != attribute_type {
                continue;
            }

            match self.check_permission(attr.as_ref(), AttributeRestriction::Read) {
                Ok(()) => {
                    let value = attr.read();
                    if let Some(first) = entries.first() {
                        if first.value.len() != value.len() {
                            break;
                        }
                    }
                    entries.push(ReadByTypeEntry { handle, value });
                }
                Err(e) => {
                    if entries.is_empty() {
                        permission_error = Some(e);
                    }
                    break;
                }
            }
        }

        if entries.is_empty() {
            let error = permission_error.unwrap_or(AttError::AttributeNotFound);
            return self.send_error(request_opcode, starting_handle, error);
        }

        self.channel.send(AttPdu::ReadByTypeResponse { entries }.encode())
    }

    fn handle_read_by_group_type(
        &self,
        request_opcode: u8,
        starting_handle: u16,
        ending_handle: u16,
        group_type: Uuid,
    ) -> Result<(), Error> {
        let mut entries: Vec<ReadByGroupTypeEntry> = Vec::new();

        for (i, attr) in self.attributes.iter().enumerate() {
            let handle = attr.handle();
            if handle < starting_handle || handle > ending_handle || attr.attribute_type() != group_type {
                continue;
            }

            let group_end_handle = self.attributes[i + 1..]
                .iter()
                .find(|next| next.attribute_type() == group_type)
                .map(|next| next.handle() - 1)
                .unwrap_or_else(|| self.attributes.last().map(|a| a.handle()).unwrap_or(handle));

            let value = attr.read();
            if let Some(first) = entries.first() {
                if first.value.len() != value.len() {
                    break;
                }
            }
            entries.push(ReadByGroupTypeEntry { handle, group_end_handle, value });
        }

        if entries.is_empty() {
            return self.send_error(request_opcode, starting_handle, AttError::AttributeNotFound);
        }

        self.channel.send(AttPdu::ReadByGroupTypeResponse { entries }.encode())
    }

    fn handle_find_information(&self, request_opcode: u8, starting_handle: u16, ending_handle: u16) -> Result<(), Error> {
        let mut pairs: Vec<HandleUuidPair> = Vec::new();

        for attr in &self.attributes {
            let handle = attr.handle();
            if handle < starting_handle || handle > ending_handle {
                continue;
            }

            let uuid = attr.attribute_type();
            if let Some(first) = pairs.first() {
                if first.uuid.is_16_bit() != uuid.is_16_bit() {
                    break;
                }
            }
            pairs.push(HandleUuidPair { handle, uuid });
        }

        if pairs.is_empty() {
            return self.send_error(request_opcode, starting_handle, AttError::AttributeNotFound);
        }

        self.channel.send(AttPdu::FindInformationResponse { pairs }.encode())
    }

    fn handle_find_by_type_value(
        &self,
        starting_handle: u16,
        ending_handle: u16,
        attribute_type: u16,
        attribute_value: &[u8],
    ) -> Result<(), Error> {
        let handles: Vec<HandlesInformation> = self
            .attributes
            .iter()
            .filter(|a| {
                let h = a.handle();
                h >= starting_handle
                    && h <= ending_handle
                    && a.attribute_type() == Uuid::Uuid16(attribute_type)
                    && a.read() == attribute_value
            })
            .map(|a| HandlesInformation { found_handle: a.handle(), group_end_handle: a.handle() })
            .collect();

        if handles.is_empty() {
            return self.send_error(0x06, starting_handle, AttError::AttributeNotFound);
        }

        self.channel.send(AttPdu::FindByTypeValueResponse { handles }.encode())
    }

    fn handle_execute_write(&mut self, flags: ExecuteWriteFlag) -> Result<(), Error> {
        let queued = std::mem::take(&mut self.prepare_queue);

        if flags == ExecuteWriteFlag::Execute {
            for (handle, offset, value) in queued {
                if let Some(idx) = self.find(handle) {
                    let mut current = self.attributes[idx].read();
                    let offset = offset as usize;
                    if current.len() < offset {
                        current.resize(offset, 0);
                    }
                    current.splice(offset..current.len().min(offset + value.len()).max(offset), value);
                    if self.attributes[idx].write(&current).is_err() {
                        return self.send_error(0x18, handle, AttError::UnlikelyError);
                    }
                }
            }
        }

        self.channel.send(AttPdu::ExecuteWriteResponse.encode())
    }

    fn send_error(&self, request_opcode: u8, handle: u16, error: AttError) -> Result<(), Error> {
        if let Some(hook) = &self.error_hook {
            hook(error, handle);
        }
        self.channel.send(AttPdu::ErrorResponse { request_opcode, handle, error }.encode())
    }

    pub fn notify<V: AttributeValue>(&self, handle: u16, value: &V) -> Result<(), Error> {
        self.channel.send(AttPdu::HandleValueNotification { handle, value: value.to_bytes() }.encode())
    }

    pub fn indicate<V: AttributeValue>(&self, handle: u16, value: &V) -> Result<(), Error> {
        self.channel.send(AttPdu::HandleValueIndication { handle, value: value.to_bytes() }.encode())
    }
}

fn unsupported(pdu: &AttPdu) -> AttError {
    let _ = pdu;
    AttError::RequestNotSupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::AttributePermissions;

    #[test]
    fn check_permission_requires_encryption() {
        let channel = crate::l2cap::test_support::test_channel();
        let mut server = Server::new(channel);
        let handle = server.push(Attribute::<u8>::new(
            Uuid::Uuid16(0x2a00),
            vec![AttributePermissions::Encryption(AttributeRestriction::Read, EncryptionKeySize::Bits128)],
            7,
        ));

        let err = server.read_handle(handle).unwrap_err();
        assert_eq!(err, AttError::InsufficientEncryption);

        server.set_security_state(SecurityState { encrypted: true, key_size: Some(EncryptionKeySize::Bits128), ..Default::default() });
        assert_eq!(server.read_handle(handle).unwrap(), vec![7]);
    }
}
