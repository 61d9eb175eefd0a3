//! ATT protocol data units.
//!
//! Each PDU gets its own tagged enum variant rather than a generic `Pdu<P>` wrapper; the wire
//! layout -- field order, lengths, endianness, handle-range framing -- follows the Core Spec's
//! Attribute Protocol PDU definitions.

use crate::error::{Error, ErrorKind};
use crate::uuid::Uuid;

/// ATT opcodes, Core Spec Vol 3, Part F §3.4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    ErrorResponse = 0x01,
    ExchangeMtuRequest = 0x02,
    ExchangeMtuResponse = 0x03,
    FindInformationRequest = 0x04,
    FindInformationResponse = 0x05,
    FindByTypeValueRequest = 0x06,
    FindByTypeValueResponse = 0x07,
    ReadByTypeRequest = 0x08,
    ReadByTypeResponse = 0x09,
    ReadRequest = 0x0A,
    ReadResponse = 0x0B,
    ReadBlobRequest = 0x0C,
    ReadBlobResponse = 0x0D,
    ReadMultipleRequest = 0x0E,
    ReadMultipleResponse = 0x0F,
    ReadByGroupTypeRequest = 0x10,
    ReadByGroupTypeResponse = 0x11,
    WriteRequest = 0x12,
    WriteResponse = 0x13,
    PrepareWriteRequest = 0x16,
    PrepareWriteResponse = 0x17,
    ExecuteWriteRequest = 0x18,
    ExecuteWriteResponse = 0x19,
    HandleValueNotification = 0x1B,
    HandleValueIndication = 0x1D,
    HandleValueConfirmation = 0x1E,
    WriteCommand = 0x52,
    SignedWriteCommand = 0xD2,
}

impl OpCode {
    pub fn from_raw(raw: u8) -> Result<Self, AttError> {
        use OpCode::*;
        Ok(match raw {
            0x01 => ErrorResponse,
            0x02 => ExchangeMtuRequest,
            0x03 => ExchangeMtuResponse,
            0x04 => FindInformationRequest,
            0x05 => FindInformationResponse,
            0x06 => FindByTypeValueRequest,
            0x07 => FindByTypeValueResponse,
            0x08 => ReadByTypeRequest,
            0x09 => ReadByTypeResponse,
            0x0A => ReadRequest,
            0x0B => ReadResponse,
            0x0C => ReadBlobRequest,
            0x0D => ReadBlobResponse,
            0x0E => ReadMultipleRequest,
            0x0F => ReadMultipleResponse,
            0x10 => ReadByGroupTypeRequest,
            0x11 => ReadByGroupTypeResponse,
            0x12 => WriteRequest,
            0x13 => WriteResponse,
            0x16 => PrepareWriteRequest,
            0x17 => PrepareWriteResponse,
            0x18 => ExecuteWriteRequest,
            0x19 => ExecuteWriteResponse,
            0x1B => HandleValueNotification,
            0x1D => HandleValueIndication,
            0x1E => HandleValueConfirmation,
            0x52 => WriteCommand,
            0xD2 => SignedWriteCommand,
            _ => return Err(AttError::RequestNotSupported),
        })
    }

    pub fn as_raw(&self) -> u8 {
        *self as u8
    }
}

/// ATT error codes, Core Spec Vol 3, Part F §3.4.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    Other(u8),
}

impl AttError {
    pub fn to_raw(&self) -> u8 {
        match self {
            AttError::InvalidHandle => 0x01,
            AttError::ReadNotPermitted => 0x02,
            AttError::WriteNotPermitted => 0x03,
            AttError::InvalidPdu => 0x04,
            AttError::InsufficientAuthentication => 0x05,
            AttError::RequestNotSupported => 0x06,
            AttError::InvalidOffset => 0x07,
            AttError::InsufficientAuthorization => 0x08,
            AttError::PrepareQueueFull => 0x09,
            AttError::AttributeNotFound => 0x0A,
            AttError::AttributeNotLong => 0x0B,
            AttError::InsufficientEncryptionKeySize => 0x0C,
            AttError::InvalidAttributeValueLength => 0x0D,
            AttError::UnlikelyError => 0x0E,
            AttError::InsufficientEncryption => 0x0F,
            AttError::UnsupportedGroupType => 0x10,
            AttError::InsufficientResources => 0x11,
            AttError::Other(raw) => *raw,
        }
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => AttError::InvalidHandle,
            0x02 => AttError::ReadNotPermitted,
            0x03 => AttError::WriteNotPermitted,
            0x04 => AttError::InvalidPdu,
            0x05 => AttError::InsufficientAuthentication,
            0x06 => AttError::RequestNotSupported,
            0x07 => AttError::InvalidOffset,
            0x08 => AttError::InsufficientAuthorization,
            0x09 => AttError::PrepareQueueFull,
            0x0A => AttError::AttributeNotFound,
            0x0B => AttError::AttributeNotLong,
            0x0C => AttError::InsufficientEncryptionKeySize,
            0x0D => AttError::InvalidAttributeValueLength,
            0x0E => AttError::UnlikelyError,
            0x0F => AttError::InsufficientEncryption,
            0x10 => AttError::UnsupportedGroupType,
            0x11 => AttError::InsufficientResources,
            other => AttError::Other(other),
        }
    }
}

impl From<AttError> for Error {
    fn from(e: AttError) -> Error {
        Error::new(ErrorKind::Protocol, format!("att error {:#04x}", e.to_raw()))
    }
}

/// One "attribute data" entry of a Find By Type Value response: the handle range a matching
/// attribute group occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlesInformation {
    pub found_handle: u16,
    pub group_end_handle: u16,
}

/// One entry of a Find Information response (handle, uuid) or Read By Type response
/// (handle, value) -- the wire layout only differs in what the per-entry data represents.
#[derive(Debug, Clone)]
pub struct HandleUuidPair {
    pub handle: u16,
    pub uuid: Uuid,
}

#[derive(Debug, Clone)]
pub struct ReadByTypeEntry {
    pub handle: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReadByGroupTypeEntry {
    pub handle: u16,
    pub group_end_handle: u16,
    pub value: Vec<u8>,
}

/// A tagged sum type covering every ATT PDU this stack sends or receives.
#[derive(Debug, Clone)]
pub enum AttPdu {
    ErrorResponse { request_opcode: u8, handle: u16, error: AttError },
    ExchangeMtuRequest { client_rx_mtu: u16 },
    ExchangeMtuResponse { server_rx_mtu: u16 },
    FindInformationRequest { starting_handle: u16, ending_handle: u16 },
    FindInformationResponse { pairs: Vec<HandleUuidPair> },
    FindByTypeValueRequest { starting_handle: u16, ending_handle: u16, attribute_type: u16, attribute_value: Vec<u8> },
    FindByTypeValueResponse { handles: Vec<HandlesInformation> },
    ReadByTypeRequest { starting_handle: u16, ending_handle: u16, attribute_type: Uuid },
    ReadByTypeResponse { entries: Vec<ReadByTypeEntry> },
    ReadRequest { handle: u16 },
    ReadResponse { value: Vec<u8> },
    ReadBlobRequest { handle: u16, offset: u16 },
    ReadBlobResponse { value: Vec<u8> },
    ReadMultipleRequest { handles: Vec<u16> },
    ReadMultipleResponse { values: Vec<u8> },
    ReadByGroupTypeRequest { starting_handle: u16, ending_handle: u16, group_type: Uuid },
    ReadByGroupTypeResponse { entries: Vec<ReadByGroupTypeEntry> },
    WriteRequest { handle: u16, value: Vec<u8> },
    WriteResponse,
    WriteCommand { handle: u16, value: Vec<u8> },
    SignedWriteCommand { handle: u16, value: Vec<u8>, signature: [u8; 12] },
    PrepareWriteRequest { handle: u16, offset: u16, value: Vec<u8> },
    PrepareWriteResponse { handle: u16, offset: u16, value: Vec<u8> },
    ExecuteWriteRequest { flags: ExecuteWriteFlag },
    ExecuteWriteResponse,
    HandleValueNotification { handle: u16, value: Vec<u8> },
    HandleValueIndication { handle: u16, value: Vec<u8> },
    HandleValueConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteWriteFlag {
    Cancel,
    Execute,
}

fn uuid_bytes(u: &Uuid) -> Vec<u8> {
    match u.shortest_form() {
        Uuid::Uuid16(v) => v.to_le_bytes().to_vec(),
        other => other.as_u128().to_le_bytes().to_vec(),
    }
}

fn uuid_from_slice(raw: &[u8]) -> Result<Uuid, AttError> {
    match raw.len() {
        2 => Ok(Uuid::Uuid16(u16::from_le_bytes(raw.try_into().unwrap()))),
        16 => Ok(Uuid::Uuid128(u128::from_le_bytes(raw.try_into().unwrap()))),
        _ => Err(AttError::InvalidPdu),
    }
}

impl AttPdu {
    pub fn opcode(&self) -> OpCode {
        use AttPdu::*;
        match self {
            ErrorResponse { .. } => OpCode::ErrorResponse,
            ExchangeMtuRequest { .. } => OpCode::ExchangeMtuRequest,
            ExchangeMtuResponse { .. } => OpCode::ExchangeMtuResponse,
            FindInformationRequest { .. } => OpCode::FindInformationRequest,
            FindInformationResponse { .. } => OpCode::FindInformationResponse,
            FindByTypeValueRequest { .. } => OpCode::FindByTypeValueRequest,
            FindByTypeValueResponse { .. } => OpCode::FindByTypeValueResponse,
            ReadByTypeRequest { .. } => OpCode::ReadByTypeRequest,
            ReadByTypeResponse { .. } => OpCode::ReadByTypeResponse,
            ReadRequest { .. } => OpCode::ReadRequest,
            ReadResponse { .. } => OpCode::ReadResponse,
            ReadBlobRequest { .. } => OpCode::ReadBlobRequest,
            ReadBlobResponse { .. } => OpCode::ReadBlobResponse,
            ReadMultipleRequest { .. } => OpCode::ReadMultipleRequest,
            ReadMultipleResponse { .. } => OpCode::ReadMultipleResponse,
            ReadByGroupTypeRequest { .. } => OpCode::ReadByGroupTypeRequest,
            ReadByGroupTypeResponse { .. } => OpCode::ReadByGroupTypeResponse,
            WriteRequest { .. } => OpCode::WriteRequest,
            WriteResponse => OpCode::WriteResponse,
            WriteCommand { .. } => OpCode::WriteCommand,
            SignedWriteCommand { .. } => OpCode::SignedWriteCommand,
            PrepareWriteRequest { .. } => OpCode::PrepareWriteRequest,
            PrepareWriteResponse { .. } => OpCode::PrepareWriteResponse,
            ExecuteWriteRequest { .. } => OpCode::ExecuteWriteRequest,
            ExecuteWriteResponse => OpCode::ExecuteWriteResponse,
            HandleValueNotification { .. } => OpCode::HandleValueNotification,
            HandleValueIndication { .. } => OpCode::HandleValueIndication,
            HandleValueConfirmation => OpCode::HandleValueConfirmation,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        use AttPdu::*;

        let mut out = vec![self.opcode().as_raw()];

        match self {
            ErrorResponse { request_opcode, handle, error } => {
                out.push(*request_opcode);
                out.extend_from_slice(&handle.to_le_bytes());
                out.push(error.to_raw());
            }
            ExchangeMtuRequest { client_rx_mtu } => out.extend_from_slice(&client_rx_mtu.to_le_bytes()),
            ExchangeMtuResponse { server_rx_mtu } => out.extend_from_slice(&server_rx_mtu.to_le_bytes()),
            FindInformationRequest { starting_handle, ending_handle } => {
                out.extend_from_slice(&starting_handle.to_le_bytes());
                out.extend_from_slice(&ending_handle.to_le_bytes());
            }
            FindInformationResponse { pairs } => {
                let all_16_bit = pairs.iter().all(|p| p.uuid.is_16_bit());
                out.push(if all_16_bit { 0x01 } else { 0x02 });
                for pair in pairs {
                    out.extend_from_slice(&pair.handle.to_le_bytes());
                    out.extend_from_slice(&uuid_bytes(&pair.uuid));
                }
            }
            FindByTypeValueRequest { starting_handle, ending_handle, attribute_type, attribute_value } => {
                out.extend_from_slice(&starting_handle.to_le_bytes());
                out.extend_from_slice(&ending_handle.to_le_bytes());
                out.extend_from_slice(&attribute_type.to_le_bytes());
                out.extend_from_slice(attribute_value);
            }
            FindByTypeValueResponse { handles } => {
                for h in handles {
                    out.extend_from_slice(&h.found_handle.to_le_bytes());
                    out.extend_from_slice(&h.group_end_handle.to_le_bytes());
                }
            }
            ReadByTypeRequest { starting_handle, ending_handle, attribute_type } => {
                out.extend_from_slice(&starting_handle.to_le_bytes());
                out.extend_from_slice(&ending_handle.to_le_bytes());
                out.extend_from_slice(&uuid_bytes(attribute_type));
            }
            ReadByTypeResponse { entries } => {
                if let Some(first) = entries.first() {
                    out.push((2 + first.value.len()) as u8);
                }
                for e in entries {
                    out.extend_from_slice(&e.handle.to_le_bytes());
                    out.extend_from_slice(&e.value);
                }
            }
            ReadRequest { handle } => out.extend_from_slice(&handle.to_le_bytes()),
            ReadResponse { value } => out.extend_from_slice(value),
            ReadBlobRequest { handle, offset } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
            }
            ReadBlobResponse { value } => out.extend_from_slice(value),
            ReadMultipleRequest { handles } => {
                for h in handles {
                    out.extend_from_slice(&h.to_le_bytes());
                }
            }
            ReadMultipleResponse { values } => out.extend_from_slice(values),
            ReadByGroupTypeRequest { starting_handle, ending_handle, group_type } => {
                out.extend_from_slice(&starting_handle.to_le_bytes());
                out.extend_from_slice(&ending_handle.to_le_bytes());
                out.extend_from_slice(&uuid_bytes(group_type));
            }
            ReadByGroupTypeResponse { entries } => {
                if let Some(first) = entries.first() {
                    out.push((4 + first.value.len()) as u8);
                }
                for e in entries {
                    out.extend_from_slice(&e.handle.to_le_bytes());
                    out.extend_from_slice(&e.group_end_handle.to_le_bytes());
                    out.extend_from_slice(&e.value);
                }
            }
            WriteRequest { handle, value } | WriteCommand { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
            WriteResponse => {}
            SignedWriteCommand { handle, value, signature } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
                out.extend_from_slice(signature);
            }
            PrepareWriteRequest { handle, offset, value } | PrepareWriteResponse { handle, offset, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(value);
            }
            ExecuteWriteRequest { flags } => {
                out.push(match flags {
                    ExecuteWriteFlag::Cancel => 0x00,
                    ExecuteWriteFlag::Execute => 0x01,
                });
            }
            ExecuteWriteResponse => {}
            HandleValueNotification { handle, value } | HandleValueIndication { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
            HandleValueConfirmation => {}
        }

        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, AttError> {
        if raw.is_empty() {
            return Err(AttError::InvalidPdu);
        }

        let opcode = OpCode::from_raw(raw[0])?;
        let body = &raw[1..];

        Ok(match opcode {
            OpCode::ErrorResponse => {
                if body.len() != 4 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::ErrorResponse {
                    request_opcode: body[0],
                    handle: u16::from_le_bytes([body[1], body[2]]),
                    error: AttError::from_raw(body[3]),
                }
            }
            OpCode::ExchangeMtuRequest => AttPdu::ExchangeMtuRequest {
                client_rx_mtu: u16_at(body, 0)?,
            },
            OpCode::ExchangeMtuResponse => AttPdu::ExchangeMtuResponse {
                server_rx_mtu: u16_at(body, 0)?,
            },
            OpCode::FindInformationRequest => AttPdu::FindInformationRequest {
                starting_handle: u16_at(body, 0)?,
                ending_handle: u16_at(body, 2)?,
            },
            OpCode::FindInformationResponse => {
                if body.is_empty() {
                    return Err(AttError::InvalidPdu);
                }
                let uuid_len = if body[0] == 0x01 { 2 } else if body[0] == 0x02 { 16 } else {
                    return Err(AttError::InvalidPdu);
                };
                let mut pairs = Vec::new();
                let mut rest = &body[1..];
                while rest.len() >= 2 + uuid_len {
                    let handle = u16::from_le_bytes([rest[0], rest[1]]);
                    let uuid = uuid_from_slice(&rest[2..2 + uuid_len])?;
                    pairs.push(HandleUuidPair { handle, uuid });
                    rest = &rest[2 + uuid_len..];
                }
                AttPdu::FindInformationResponse { pairs }
            }
            OpCode::FindByTypeValueRequest => {
                if body.len() < 6 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::FindByTypeValueRequest {
                    starting_handle: u16_at(body, 0)?,
                    ending_handle: u16_at(body, 2)?,
                    attribute_type: u16_at(body, 4)?,
                    attribute_value: body[6..].to_vec(),
                }
            }
            OpCode::FindByTypeValueResponse => {
                let mut handles = Vec::new();
                let mut rest = body;
                while rest.len() >= 4 {
                    handles.push(HandlesInformation {
                        found_handle: u16::from_le_bytes([rest[0], rest[1]]),
                        group_end_handle: u16::from_le_bytes([rest[2], rest[3]]),
                    });
                    rest = &rest[4..];
                }
                AttPdu::FindByTypeValueResponse { handles }
            }
            OpCode::ReadByTypeRequest => {
                if body.len() != 6 && body.len() != 20 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::ReadByTypeRequest {
                    starting_handle: u16_at(body, 0)?,
                    ending_handle: u16_at(body, 2)?,
                    attribute_type: uuid_from_slice(&body[4..])?,
                }
            }
            OpCode::ReadByTypeResponse => {
                if body.is_empty() {
                    return Err(AttError::InvalidPdu);
                }
                let stride = body[0] as usize;
                if stride < 3 {
                    return Err(AttError::InvalidPdu);
                }
                let mut entries = Vec::new();
                let mut rest = &body[1..];
                while rest.len() >= stride {
                    let handle = u16::from_le_bytes([rest[0], rest[1]]);
                    entries.push(ReadByTypeEntry { handle, value: rest[2..stride].to_vec() });
                    rest = &rest[stride..];
                }
                AttPdu::ReadByTypeResponse { entries }
            }
            OpCode::ReadRequest => AttPdu::ReadRequest { handle: u16_at(body, 0)? },
            OpCode::ReadResponse => AttPdu::ReadResponse { value: body.to_vec() },
            OpCode::ReadBlobRequest => AttPdu::ReadBlobRequest {
                handle: u16_at(body, 0)?,
                offset: u16_at(body, 2)?,
            },
            OpCode::ReadBlobResponse => AttPdu::ReadBlobResponse { value: body.to_vec() },
            OpCode::ReadMultipleRequest => {
                if body.len() % 2 != 0 || body.is_empty() {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::ReadMultipleRequest {
                    handles: body.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect(),
                }
            }
            OpCode::ReadMultipleResponse => AttPdu::ReadMultipleResponse { values: body.to_vec() },
            OpCode::ReadByGroupTypeRequest => {
                if body.len() != 6 && body.len() != 20 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::ReadByGroupTypeRequest {
                    starting_handle: u16_at(body, 0)?,
                    ending_handle: u16_at(body, 2)?,
                    group_type: uuid_from_slice(&body[4..])?,
                }
            }
            OpCode::ReadByGroupTypeResponse => {
                if body.is_empty() {
                    return Err(AttError::InvalidPdu);
                }
                let stride = body[0] as usize;
                if stride < 5 {
                    return Err(AttError::InvalidPdu);
                }
                let mut entries = Vec::new();
                let mut rest = &body[1..];
                while rest.len() >= stride {
                    entries.push(ReadByGroupTypeEntry {
                        handle: u16::from_le_bytes([rest[0], rest[1]]),
                        group_end_handle: u16::from_le_bytes([rest[2], rest[3]]),
                        value: rest[4..stride].to_vec(),
                    });
                    rest = &rest[stride..];
                }
                AttPdu::ReadByGroupTypeResponse { entries }
            }
            OpCode::WriteRequest => {
                if body.len() < 2 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::WriteRequest { handle: u16_at(body, 0)?, value: body[2..].to_vec() }
            }
            OpCode::WriteResponse => AttPdu::WriteResponse,
            OpCode::WriteCommand => {
                if body.len() < 2 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::WriteCommand { handle: u16_at(body, 0)?, value: body[2..].to_vec() }
            }
            OpCode::SignedWriteCommand => {
                if body.len() < 14 {
                    return Err(AttError::InvalidPdu);
                }
                let value_len = body.len() - 2 - 12;
                let mut signature = [0u8; 12];
                signature.copy_from_slice(&body[2 + value_len..]);
                AttPdu::SignedWriteCommand {
                    handle: u16_at(body, 0)?,
                    value: body[2..2 + value_len].to_vec(),
                    signature,
                }
            }
            OpCode::PrepareWriteRequest => {
                if body.len() < 4 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::PrepareWriteRequest {
                    handle: u16_at(body, 0)?,
                    offset: u16_at(body, 2)?,
                    value: body[4..].to_vec(),
                }
            }
            OpCode::PrepareWriteResponse => {
                if body.len() < 4 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::PrepareWriteResponse {
                    handle: u16_at(body, 0)?,
                    offset: u16_at(body, 2)?,
                    value: body[4..].to_vec(),
                }
            }
            OpCode::ExecuteWriteRequest => {
                if body.len() != 1 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::ExecuteWriteRequest {
                    flags: match body[0] {
                        0x00 => ExecuteWriteFlag::Cancel,
                        0x01 => ExecuteWriteFlag::Execute,
                        _ => return Err(AttError::InvalidPdu),
                    },
                }
            }
            OpCode::ExecuteWriteResponse => AttPdu::ExecuteWriteResponse,
            OpCode::HandleValueNotification => {
                if body.len() < 2 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::HandleValueNotification { handle: u16_at(body, 0)?, value: body[2..].to_vec() }
            }
            OpCode::HandleValueIndication => {
                if body.len() < 2 {
                    return Err(AttError::InvalidPdu);
                }
                AttPdu::HandleValueIndication { handle: u16_at(body, 0)?, value: body[2..].to_vec() }
            }
            OpCode::HandleValueConfirmation => AttPdu::HandleValueConfirmation,
        })
    }
}

fn u16_at(body: &[u8], offset: usize) -> Result<u16, AttError> {
    body.get(offset..offset + 2)
        .map(|s| u16::from_le_bytes([s[0], s[1]]))
        .ok_or(AttError::InvalidPdu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_mtu_round_trips() {
        let pdu = AttPdu::ExchangeMtuRequest { client_rx_mtu: 256 };
        let raw = pdu.encode();
        let back = AttPdu::decode(&raw).unwrap();

        match back {
            AttPdu::ExchangeMtuRequest { client_rx_mtu } => assert_eq!(client_rx_mtu, 256),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_opcode_is_request_not_supported() {
        let err = OpCode::from_raw(0xFF).unwrap_err();
        assert_eq!(err, AttError::RequestNotSupported);
    }

    #[test]
    fn error_response_round_trips() {
        let pdu = AttPdu::ErrorResponse {
            request_opcode: OpCode::ReadRequest.as_raw(),
            handle: 0x0012,
            error: AttError::InvalidHandle,
        };
        let raw = pdu.encode();
        assert_eq!(raw, vec![0x01, 0x0A, 0x12, 0x00, 0x01]);
    }

    #[test]
    fn read_by_type_response_round_trips() {
        let pdu = AttPdu::ReadByTypeResponse {
            entries: vec![
                ReadByTypeEntry { handle: 1, value: vec![0xAA, 0xBB] },
                ReadByTypeEntry { handle: 2, value: vec![0xCC, 0xDD] },
            ],
        };
        let raw = pdu.encode();
        let back = AttPdu::decode(&raw).unwrap();

        match back {
            AttPdu::ReadByTypeResponse { entries } => assert_eq!(entries.len(), 2),
            _ => panic!("wrong variant"),
        }
    }
}
