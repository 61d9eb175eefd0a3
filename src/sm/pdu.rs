//! Security Manager Protocol data units (Core Spec Vol 3, Part H §3).
//!
//! As with `att::pdu`, each PDU is its own enum variant rather than a generic wrapper type.

use crate::addr::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    PairingRequest = 0x01,
    PairingResponse = 0x02,
    PairingConfirm = 0x03,
    PairingRandom = 0x04,
    PairingFailed = 0x05,
    EncryptionInformation = 0x06,
    MasterIdentification = 0x07,
    IdentityInformation = 0x08,
    IdentityAddressInformation = 0x09,
    SigningInformation = 0x0A,
    SecurityRequest = 0x0B,
    PairingPublicKey = 0x0C,
    PairingDHKeyCheck = 0x0D,
    PairingKeypressNotification = 0x0E,
}

impl OpCode {
    fn from_raw(raw: u8) -> Result<Self, SmpError> {
        use OpCode::*;
        Ok(match raw {
            0x01 => PairingRequest,
            0x02 => PairingResponse,
            0x03 => PairingConfirm,
            0x04 => PairingRandom,
            0x05 => PairingFailed,
            0x06 => EncryptionInformation,
            0x07 => MasterIdentification,
            0x08 => IdentityInformation,
            0x09 => IdentityAddressInformation,
            0x0A => SigningInformation,
            0x0B => SecurityRequest,
            0x0C => PairingPublicKey,
            0x0D => PairingDHKeyCheck,
            0x0E => PairingKeypressNotification,
            _ => return Err(SmpError::CommandNotSupported),
        })
    }
}

/// Pairing Failed reason codes, Core Spec Vol 3, Part H §3.5.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpError {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyDerivationNotAllowed,
    Other(u8),
}

impl SmpError {
    pub fn to_raw(self) -> u8 {
        match self {
            SmpError::PasskeyEntryFailed => 0x01,
            SmpError::OobNotAvailable => 0x02,
            SmpError::AuthenticationRequirements => 0x03,
            SmpError::ConfirmValueFailed => 0x04,
            SmpError::PairingNotSupported => 0x05,
            SmpError::EncryptionKeySize => 0x06,
            SmpError::CommandNotSupported => 0x07,
            SmpError::UnspecifiedReason => 0x08,
            SmpError::RepeatedAttempts => 0x09,
            SmpError::InvalidParameters => 0x0A,
            SmpError::DhKeyCheckFailed => 0x0B,
            SmpError::NumericComparisonFailed => 0x0C,
            SmpError::BrEdrPairingInProgress => 0x0D,
            SmpError::CrossTransportKeyDerivationNotAllowed => 0x0E,
            SmpError::Other(raw) => raw,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => SmpError::PasskeyEntryFailed,
            0x02 => SmpError::OobNotAvailable,
            0x03 => SmpError::AuthenticationRequirements,
            0x04 => SmpError::ConfirmValueFailed,
            0x05 => SmpError::PairingNotSupported,
            0x06 => SmpError::EncryptionKeySize,
            0x07 => SmpError::CommandNotSupported,
            0x08 => SmpError::UnspecifiedReason,
            0x09 => SmpError::RepeatedAttempts,
            0x0A => SmpError::InvalidParameters,
            0x0B => SmpError::DhKeyCheckFailed,
            0x0C => SmpError::NumericComparisonFailed,
            0x0D => SmpError::BrEdrPairingInProgress,
            0x0E => SmpError::CrossTransportKeyDerivationNotAllowed,
            other => SmpError::Other(other),
        }
    }
}

impl From<SmpError> for crate::error::Error {
    fn from(e: SmpError) -> Self {
        crate::error::Error::new(crate::error::ErrorKind::Security, format!("pairing failed: {:?}", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoCapability {
    DisplayOnly = 0x00,
    DisplayYesNo = 0x01,
    KeyboardOnly = 0x02,
    NoInputNoOutput = 0x03,
    KeyboardDisplay = 0x04,
}

impl IoCapability {
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    pub fn from_raw(raw: u8) -> Result<Self, SmpError> {
        Ok(match raw {
            0x00 => IoCapability::DisplayOnly,
            0x01 => IoCapability::DisplayYesNo,
            0x02 => IoCapability::KeyboardOnly,
            0x03 => IoCapability::NoInputNoOutput,
            0x04 => IoCapability::KeyboardDisplay,
            _ => return Err(SmpError::InvalidParameters),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OobDataFlag {
    NotPresent = 0x00,
    Present = 0x01,
}

/// `AuthReq` bitmask, Core Spec Vol 3, Part H §3.5.1 Table 3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRequirements {
    pub bonding: bool,
    pub mitm: bool,
    pub secure_connections: bool,
    pub keypress: bool,
    pub ct2: bool,
}

impl AuthRequirements {
    pub fn to_raw(self) -> u8 {
        (self.bonding as u8)
            | ((self.mitm as u8) << 2)
            | ((self.secure_connections as u8) << 3)
            | ((self.keypress as u8) << 4)
            | ((self.ct2 as u8) << 5)
    }

    fn from_raw(raw: u8) -> Self {
        AuthRequirements {
            bonding: raw & 0x01 != 0,
            mitm: raw & 0x04 != 0,
            secure_connections: raw & 0x08 != 0,
            keypress: raw & 0x10 != 0,
            ct2: raw & 0x20 != 0,
        }
    }
}

/// Which keys a side will distribute after pairing completes, Table 3.5/3.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDistribution {
    pub enc_key: bool,
    pub id_key: bool,
    pub sign_key: bool,
    pub link_key: bool,
}

impl KeyDistribution {
    pub fn to_raw(self) -> u8 {
        (self.enc_key as u8) | ((self.id_key as u8) << 1) | ((self.sign_key as u8) << 2) | ((self.link_key as u8) << 3)
    }

    pub fn from_raw(raw: u8) -> Self {
        KeyDistribution {
            enc_key: raw & 0x01 != 0,
            id_key: raw & 0x02 != 0,
            sign_key: raw & 0x04 != 0,
            link_key: raw & 0x08 != 0,
        }
    }

    /// The intersection of what each side offered, which is what actually gets distributed.
    pub fn intersect(self, other: Self) -> Self {
        KeyDistribution {
            enc_key: self.enc_key && other.enc_key,
            id_key: self.id_key && other.id_key,
            sign_key: self.sign_key && other.sign_key,
            link_key: self.link_key && other.link_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingInfo {
    pub io_capability: IoCapability,
    pub oob_data_flag: OobDataFlag,
    pub auth_requirements: AuthRequirements,
    pub max_encryption_key_size: u8,
    pub initiator_key_distribution: KeyDistribution,
    pub responder_key_distribution: KeyDistribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeypressNotificationType {
    PasskeyEntryStarted = 0x00,
    PasskeyDigitEntered = 0x01,
    PasskeyDigitErased = 0x02,
    PasskeyCleared = 0x03,
    PasskeyEntryCompleted = 0x04,
}

impl KeypressNotificationType {
    fn from_raw(raw: u8) -> Result<Self, SmpError> {
        Ok(match raw {
            0x00 => KeypressNotificationType::PasskeyEntryStarted,
            0x01 => KeypressNotificationType::PasskeyDigitEntered,
            0x02 => KeypressNotificationType::PasskeyDigitErased,
            0x03 => KeypressNotificationType::PasskeyCleared,
            0x04 => KeypressNotificationType::PasskeyEntryCompleted,
            _ => return Err(SmpError::InvalidParameters),
        })
    }
}

#[derive(Debug, Clone)]
pub enum SmpPdu {
    PairingRequest(PairingInfo),
    PairingResponse(PairingInfo),
    PairingConfirm([u8; 16]),
    PairingRandom([u8; 16]),
    PairingFailed(SmpError),
    EncryptionInformation { ltk: u128 },
    MasterIdentification { ediv: u16, rand: u64 },
    IdentityInformation { irk: u128 },
    IdentityAddressInformation { address: Address },
    SigningInformation { csrk: u128 },
    SecurityRequest(AuthRequirements),
    PairingPublicKey { x: [u8; 32], y: [u8; 32] },
    PairingDHKeyCheck([u8; 16]),
    PairingKeypressNotification(KeypressNotificationType),
}

fn encode_pairing_info(code: u8, info: &PairingInfo, out: &mut Vec<u8>) {
    out.push(code);
    out.push(info.io_capability as u8);
    out.push(info.oob_data_flag as u8);
    out.push(info.auth_requirements.to_raw());
    out.push(info.max_encryption_key_size);
    out.push(info.initiator_key_distribution.to_raw());
    out.push(info.responder_key_distribution.to_raw());
}

fn decode_pairing_info(body: &[u8]) -> Result<PairingInfo, SmpError> {
    if body.len() != 6 {
        return Err(SmpError::InvalidParameters);
    }

    Ok(PairingInfo {
        io_capability: IoCapability::from_raw(body[0])?,
        oob_data_flag: if body[1] == 0 { OobDataFlag::NotPresent } else { OobDataFlag::Present },
        auth_requirements: AuthRequirements::from_raw(body[2]),
        max_encryption_key_size: body[3],
        initiator_key_distribution: KeyDistribution::from_raw(body[4]),
        responder_key_distribution: KeyDistribution::from_raw(body[5]),
    })
}

impl SmpPdu {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        match self {
            SmpPdu::PairingRequest(info) => encode_pairing_info(OpCode::PairingRequest as u8, info, &mut out),
            SmpPdu::PairingResponse(info) => encode_pairing_info(OpCode::PairingResponse as u8, info, &mut out),
            SmpPdu::PairingConfirm(v) => {
                out.push(OpCode::PairingConfirm as u8);
                out.extend_from_slice(v);
            }
            SmpPdu::PairingRandom(v) => {
                out.push(OpCode::PairingRandom as u8);
                out.extend_from_slice(v);
            }
            SmpPdu::PairingFailed(e) => {
                out.push(OpCode::PairingFailed as u8);
                out.push(e.to_raw());
            }
            SmpPdu::EncryptionInformation { ltk } => {
                out.push(OpCode::EncryptionInformation as u8);
                out.extend_from_slice(&ltk.to_le_bytes());
            }
            SmpPdu::MasterIdentification { ediv, rand } => {
                out.push(OpCode::MasterIdentification as u8);
                out.extend_from_slice(&ediv.to_le_bytes());
                out.extend_from_slice(&rand.to_le_bytes());
            }
            SmpPdu::IdentityInformation { irk } => {
                out.push(OpCode::IdentityInformation as u8);
                out.extend_from_slice(&irk.to_le_bytes());
            }
            SmpPdu::IdentityAddressInformation { address } => {
                out.push(OpCode::IdentityAddressInformation as u8);
                out.push(address.address_type.to_hci_raw());
                out.extend_from_slice(&address.bytes);
            }
            SmpPdu::SigningInformation { csrk } => {
                out.push(OpCode::SigningInformation as u8);
                out.extend_from_slice(&csrk.to_le_bytes());
            }
            SmpPdu::SecurityRequest(auth) => {
                out.push(OpCode::SecurityRequest as u8);
                out.push(auth.to_raw());
            }
            SmpPdu::PairingPublicKey { x, y } => {
                out.push(OpCode::PairingPublicKey as u8);
                out.extend_from_slice(x);
                out.extend_from_slice(y);
            }
            SmpPdu::PairingDHKeyCheck(v) => {
                out.push(OpCode::PairingDHKeyCheck as u8);
                out.extend_from_slice(v);
            }
            SmpPdu::PairingKeypressNotification(t) => {
                out.push(OpCode::PairingKeypressNotification as u8);
                out.push(*t as u8);
            }
        }

        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, SmpError> {
        if raw.is_empty() {
            return Err(SmpError::InvalidParameters);
        }

        let opcode = OpCode::from_raw(raw[0])?;
        let body = &raw[1..];

        Ok(match opcode {
            OpCode::PairingRequest => SmpPdu::PairingRequest(decode_pairing_info(body)?),
            OpCode::PairingResponse => SmpPdu::PairingResponse(decode_pairing_info(body)?),
            OpCode::PairingConfirm => SmpPdu::PairingConfirm(fixed_16(body)?),
            OpCode::PairingRandom => SmpPdu::PairingRandom(fixed_16(body)?),
            OpCode::PairingFailed => {
                if body.len() != 1 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::PairingFailed(SmpError::from_raw(body[0]))
            }
            OpCode::EncryptionInformation => {
                if body.len() != 16 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::EncryptionInformation { ltk: u128::from_le_bytes(body.try_into().unwrap()) }
            }
            OpCode::MasterIdentification => {
                if body.len() != 10 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::MasterIdentification {
                    ediv: u16::from_le_bytes([body[0], body[1]]),
                    rand: u64::from_le_bytes(body[2..10].try_into().unwrap()),
                }
            }
            OpCode::IdentityInformation => {
                if body.len() != 16 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::IdentityInformation { irk: u128::from_le_bytes(body.try_into().unwrap()) }
            }
            OpCode::IdentityAddressInformation => {
                if body.len() != 7 {
                    return Err(SmpError::InvalidParameters);
                }
                let mut addr_bytes = [0u8; 6];
                addr_bytes.copy_from_slice(&body[1..7]);
                SmpPdu::IdentityAddressInformation { address: Address::from_raw(addr_bytes, body[0] != 0) }
            }
            OpCode::SigningInformation => {
                if body.len() != 16 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::SigningInformation { csrk: u128::from_le_bytes(body.try_into().unwrap()) }
            }
            OpCode::SecurityRequest => {
                if body.len() != 1 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::SecurityRequest(AuthRequirements::from_raw(body[0]))
            }
            OpCode::PairingPublicKey => {
                if body.len() != 64 {
                    return Err(SmpError::InvalidParameters);
                }
                let mut x = [0u8; 32];
                let mut y = [0u8; 32];
                x.copy_from_slice(&body[..32]);
                y.copy_from_slice(&body[32..]);
                SmpPdu::PairingPublicKey { x, y }
            }
            OpCode::PairingDHKeyCheck => SmpPdu::PairingDHKeyCheck(fixed_16(body)?),
            OpCode::PairingKeypressNotification => {
                if body.len() != 1 {
                    return Err(SmpError::InvalidParameters);
                }
                SmpPdu::PairingKeypressNotification(KeypressNotificationType::from_raw(body[0])?)
            }
        })
    }
}

fn fixed_16(body: &[u8]) -> Result<[u8; 16], SmpError> {
    body.try_into().map_err(|_| SmpError::InvalidParameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> PairingInfo {
        PairingInfo {
            io_capability: IoCapability::DisplayYesNo,
            oob_data_flag: OobDataFlag::NotPresent,
            auth_requirements: AuthRequirements { bonding: true, mitm: true, secure_connections: true, keypress: false, ct2: false },
            max_encryption_key_size: 16,
            initiator_key_distribution: KeyDistribution { enc_key: true, id_key: true, sign_key: false, link_key: false },
            responder_key_distribution: KeyDistribution { enc_key: true, id_key: true, sign_key: false, link_key: false },
        }
    }

    #[test]
    fn pairing_request_round_trips() {
        let pdu = SmpPdu::PairingRequest(sample_info());
        let raw = pdu.encode();
        assert_eq!(raw.len(), 7);

        match SmpPdu::decode(&raw).unwrap() {
            SmpPdu::PairingRequest(info) => assert_eq!(info, sample_info()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn key_distribution_intersect_is_the_agreed_set() {
        let a = KeyDistribution { enc_key: true, id_key: true, sign_key: false, link_key: false };
        let b = KeyDistribution { enc_key: true, id_key: false, sign_key: false, link_key: false };
        assert_eq!(a.intersect(b), KeyDistribution { enc_key: true, id_key: false, sign_key: false, link_key: false });
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert_eq!(SmpPdu::decode(&[0xFF]).unwrap_err(), SmpError::CommandNotSupported);
    }
}
