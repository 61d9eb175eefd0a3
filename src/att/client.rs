//! The ATT client role: the side that sends requests and command PDUs.
//!
//! Every request blocks the calling thread until the matching response (or an error response)
//! arrives on the channel, per the request/response pairing in Core Spec Vol 3, Part F §3.4. The
//! 30 second request timeout is the stack-wide ATT default.

use super::pdu::{AttPdu, HandleUuidPair, HandlesInformation, OpCode, ReadByGroupTypeEntry, ReadByTypeEntry};
use super::AttributeValue;
use crate::error::{Error, ErrorKind};
use crate::l2cap::{Channel, MIN_ATT_MTU_LE};
use crate::uuid::Uuid;
use std::time::Duration;

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An ATT client bound to one L2CAP fixed channel.
///
/// Tracks the negotiated MTU so callers building requests don't have to; `exchange_mtu` updates
/// it once the server responds.
pub struct Client {
    channel: Channel,
    mtu: u16,
}

impl Client {
    /// The bluetooth connection must already be established; `channel` should already be bound
    /// to the Attribute Protocol fixed channel.
    pub fn new(channel: Channel) -> Self {
        Client { channel, mtu: MIN_ATT_MTU_LE }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    fn request(&self, pdu: AttPdu) -> Result<AttPdu, Error> {
        self.channel.send(pdu.encode())?;
        let raw = self.channel.receive(REQUEST_TIMEOUT)?;
        let response = AttPdu::decode(&raw).map_err(Error::from)?;

        if let AttPdu::ErrorResponse { error, .. } = response {
            return Err(error.into());
        }

        Ok(response)
    }

    /// Negotiate the ATT MTU. Per spec a client only sends this once per connection.
    pub fn exchange_mtu(&mut self, client_rx_mtu: u16) -> Result<u16, Error> {
        let response = self.request(AttPdu::ExchangeMtuRequest { client_rx_mtu })?;

        match response {
            AttPdu::ExchangeMtuResponse { server_rx_mtu } => {
                self.mtu = client_rx_mtu.min(server_rx_mtu).max(MIN_ATT_MTU_LE);
                Ok(self.mtu)
            }
            _ => Err(unexpected_response(OpCode::ExchangeMtuResponse, &response)),
        }
    }

    pub fn find_information(&self, starting_handle: u16, ending_handle: u16) -> Result<Vec<HandleUuidPair>, Error> {
        let response = self.request(AttPdu::FindInformationRequest { starting_handle, ending_handle })?;

        match response {
            AttPdu::FindInformationResponse { pairs } => Ok(pairs),
            _ => Err(unexpected_response(OpCode::FindInformationResponse, &response)),
        }
    }

    pub fn find_by_type_value(
        &self,
        starting_handle: u16,
        ending_handle: u16,
        attribute_type: u16,
        attribute_value: Vec<u8>,
    ) -> Result<Vec<HandlesInformation>, Error> {
        let response = self.request(AttPdu::FindByTypeValueRequest {
            starting_handle,
            ending_handle,
            attribute_type,
            attribute_value,
        })?;

        match response {
            AttPdu::FindByTypeValueResponse { handles } => Ok(handles),
            _ => Err(unexpected_response(OpCode::FindByTypeValueResponse, &response)),
        }
    }

    pub fn read_by_type(
        &self,
        starting_handle: u16,
        ending_handle: u16,
        attribute_type: Uuid,
    ) -> Result<Vec<ReadByTypeEntry>, Error> {
        let response = self.request(AttPdu::ReadByTypeRequest { starting_handle, ending_handle, attribute_type })?;

        match response {
            AttPdu::ReadByTypeResponse { entries } => Ok(entries),
            _ => Err(unexpected_response(OpCode::ReadByTypeResponse, &response)),
        }
    }

    pub fn read<V: AttributeValue>(&self, handle: u16) -> Result<V, Error> {
        let response = self.request(AttPdu::ReadRequest { handle })?;

        match response {
            AttPdu::ReadResponse { value } => V::from_bytes(&value).map_err(Error::from),
            _ => Err(unexpected_response(OpCode::ReadResponse, &response)),
        }
    }

    /// Reads an attribute value the GATT way: a plain Read first, continuing with Read Blob
    /// requests only if the response came back exactly `mtu - 1` bytes long (a sign it was
    /// truncated). Some servers only implement Read and reject Read Blob outright, so unlike
    /// `read_long` this never sends a Read Blob unless the first response looked truncated.
    pub fn read_value<V: AttributeValue>(&self, handle: u16) -> Result<V, Error> {
        let response = self.request(AttPdu::ReadRequest { handle })?;
        let mut value = match response {
            AttPdu::ReadResponse { value } => value,
            _ => return Err(unexpected_response(OpCode::ReadResponse, &response)),
        };

        while value.len() == self.mtu as usize - 1 {
            let response = self.request(AttPdu::ReadBlobRequest { handle, offset: value.len() as u16 })?;
            let chunk = match response {
                AttPdu::ReadBlobResponse { value } => value,
                _ => return Err(unexpected_response(OpCode::ReadBlobResponse, &response)),
            };

            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();
            value.extend(chunk);
            if chunk_len < self.mtu as usize - 1 {
                break;
            }
        }

        V::from_bytes(&value).map_err(Error::from)
    }

    /// Reads an attribute value too long for one response, following up with Read Blob requests
    /// until the server returns a response shorter than `mtu - 1`.
    pub fn read_long<V: AttributeValue>(&self, handle: u16) -> Result<V, Error> {
        let mut value = Vec::new();

        loop {
            let response = self.request(AttPdu::ReadBlobRequest { handle, offset: value.len() as u16 })?;

            let chunk = match response {
                AttPdu::ReadBlobResponse { value } => value,
                _ => return Err(unexpected_response(OpCode::ReadBlobResponse, &response)),
            };

            let chunk_len = chunk.len();
            value.extend(chunk);

            if chunk_len < self.mtu as usize - 1 {
                break;
            }
        }

        V::from_bytes(&value).map_err(Error::from)
    }

    pub fn read_by_group_type(
        &self,
        starting_handle: u16,
        ending_handle: u16,
        group_type: Uuid,
    ) -> Result<Vec<ReadByGroupTypeEntry>, Error> {
        let response =
            self.request(AttPdu::ReadByGroupTypeRequest { starting_handle, ending_handle, group_type })?;

        match response {
            AttPdu::ReadByGroupTypeResponse { entries } => Ok(entries),
            _ => Err(unexpected_response(OpCode::ReadByGroupTypeResponse, &response)),
        }
    }

    pub fn write<V: AttributeValue>(&self, handle: u16, value: &V) -> Result<(), Error> {
        let response = self.request(AttPdu::WriteRequest { handle, value: value.to_bytes() })?;

        match response {
            AttPdu::WriteResponse => Ok(()),
            _ => Err(unexpected_response(OpCode::WriteResponse, &response)),
        }
    }

    /// Fire-and-forget write; the server sends no response, so this only fails on a transport
    /// error.
    pub fn write_command<V: AttributeValue>(&self, handle: u16, value: &V) -> Result<(), Error> {
        self.channel.send(AttPdu::WriteCommand { handle, value: value.to_bytes() }.encode())
    }

    /// Confirms receipt of a Handle Value Indication. Must be sent within the server's
    /// confirmation timeout or the server treats the link as unresponsive.
    pub fn confirm_indication(&self) -> Result<(), Error> {
        self.channel.send(AttPdu::HandleValueConfirmation.encode())
    }

    /// Blocks for the next notification or indication addressed to this channel. Callers that
    /// also issue requests on the same channel should dispatch from a dedicated reader thread
    /// instead of calling this directly; see `gatt::Client`.
    pub fn receive_server_initiated(&self, timeout: Duration) -> Result<AttPdu, Error> {
        let raw = self.channel.receive(timeout)?;
        AttPdu::decode(&raw).map_err(Error::from)
    }
}

fn unexpected_response(expected: OpCode, got: &AttPdu) -> Error {
    Error::new(
        ErrorKind::Protocol,
        format!("expected {:?} response, got {:?}", expected, got.opcode()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_response_error_names_both_opcodes() {
        let got = AttPdu::ReadResponse { value: vec![] };
        let err = unexpected_response(OpCode::WriteResponse, &got);
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.message().contains("WriteResponse"));
        assert!(err.message().contains("ReadResponse"));
    }
}
