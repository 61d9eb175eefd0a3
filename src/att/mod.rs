//! The Attribute Protocol (ATT)
//!
//! ATT exposes a flat table of attributes -- each with a type (UUID), a handle, access
//! permissions, and a value -- that a client can discover and manipulate. GATT is built entirely
//! on top of this table.

pub mod pdu;
pub mod client;
pub mod server;

use crate::uuid::Uuid;

/// Which half of read/write a permission restriction applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttributeRestriction {
    Read,
    Write,
}

/// The size of the encryption key required to access a restricted attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionKeySize {
    Bits128,
    Bits192,
    Bits256,
}

impl EncryptionKeySize {
    fn order_val(&self) -> u8 {
        match self {
            EncryptionKeySize::Bits128 => 0,
            EncryptionKeySize::Bits192 => 1,
            EncryptionKeySize::Bits256 => 2,
        }
    }
}

impl PartialOrd for EncryptionKeySize {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EncryptionKeySize {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_val().cmp(&other.order_val())
    }
}

/// Access requirements for an attribute. A server rejecting a request because of one of these is
/// what triggers the GATT handler's "pair then retry" path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributePermissions {
    Read,
    Write,
    Encryption(AttributeRestriction, EncryptionKeySize),
    Authentication(AttributeRestriction),
    Authorization(AttributeRestriction),
}

/// An entry in a server's attribute table.
#[derive(Clone, Debug)]
pub struct Attribute<V> {
    ty: Uuid,
    handle: Option<u16>,
    permissions: Vec<AttributePermissions>,
    value: V,
}

impl<V> Attribute<V> {
    pub fn new(attribute_type: Uuid, permissions: Vec<AttributePermissions>, value: V) -> Self {
        Attribute { ty: attribute_type, handle: None, permissions, value }
    }

    pub fn attribute_type(&self) -> Uuid {
        self.ty
    }

    pub fn handle(&self) -> Option<u16> {
        self.handle
    }

    pub(crate) fn set_handle(&mut self, handle: u16) {
        self.handle = Some(handle);
    }

    pub fn permissions(&self) -> &[AttributePermissions] {
        &self.permissions
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

/// Converts an attribute value to and from its ATT-wire byte representation.
pub trait AttributeValue {
    fn from_bytes(raw: &[u8]) -> Result<Self, pdu::AttError>
    where
        Self: Sized;

    fn to_bytes(&self) -> Vec<u8>;
}

macro_rules! impl_attribute_value_for_number {
    ($num:ty) => {
        impl AttributeValue for $num {
            fn from_bytes(raw: &[u8]) -> Result<Self, pdu::AttError> {
                let bytes: [u8; std::mem::size_of::<$num>()] =
                    raw.try_into().map_err(|_| pdu::AttError::InvalidAttributeValueLength)?;
                Ok(Self::from_le_bytes(bytes))
            }

            fn to_bytes(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
        }
    };
}

impl_attribute_value_for_number!(u8);
impl_attribute_value_for_number!(i8);
impl_attribute_value_for_number!(u16);
impl_attribute_value_for_number!(i16);
impl_attribute_value_for_number!(u32);
impl_attribute_value_for_number!(i32);
impl_attribute_value_for_number!(u64);
impl_attribute_value_for_number!(i64);
impl_attribute_value_for_number!(u128);
impl_attribute_value_for_number!(i128);

impl AttributeValue for Vec<u8> {
    fn from_bytes(raw: &[u8]) -> Result<Self, pdu::AttError> {
        Ok(raw.to_vec())
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }
}

impl AttributeValue for String {
    fn from_bytes(raw: &[u8]) -> Result<Self, pdu::AttError> {
        String::from_utf8(raw.to_vec()).map_err(|_| pdu::AttError::InvalidAttributeValueLength)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl AttributeValue for Uuid {
    fn from_bytes(raw: &[u8]) -> Result<Self, pdu::AttError> {
        match raw.len() {
            2 => Ok(Uuid::Uuid16(u16::from_le_bytes(raw.try_into().unwrap()))),
            16 => Ok(Uuid::Uuid128(u128::from_le_bytes(raw.try_into().unwrap()))),
            _ => Err(pdu::AttError::InvalidAttributeValueLength),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self.shortest_form() {
            Uuid::Uuid16(v) => v.to_le_bytes().to_vec(),
            other => other.as_u128().to_le_bytes().to_vec(),
        }
    }
}
