//! EUI-48 Bluetooth device addresses
//!
//! An `Address` pairs the 6 octet hardware address with the address type that was used to
//! obtain it. Two addresses are only equal if both the bytes and the type match -- a random
//! address and a public address that happen to share the same bytes are different devices as
//! far as this stack is concerned.

use crate::error::{Error, ErrorKind};
use core::fmt;

/// The raw 6 byte address, always stored most-significant-byte-last (as it appears on the wire).
pub type BluetoothDeviceAddress = [u8; 6];

/// The type of a Bluetooth device address.
///
/// Random addresses carry a privacy sub-type: static addresses never change for the life of the
/// device (or until power cycle), resolvable addresses are derived from an IRK and change
/// periodically, and non-resolvable addresses are just noise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressType {
    Public,
    RandomStatic,
    RandomResolvablePrivate,
    RandomNonResolvablePrivate,
}

impl AddressType {
    /// Classify a random address from its two most significant bits, per the Core Spec (Vol 6,
    /// Part B, section 1.3.2).
    pub fn classify_random(msb: &BluetoothDeviceAddress) -> AddressType {
        match msb[5] >> 6 {
            0b11 => AddressType::RandomStatic,
            0b01 => AddressType::RandomResolvablePrivate,
            0b00 => AddressType::RandomNonResolvablePrivate,
            _ => AddressType::RandomStatic,
        }
    }

    pub fn is_random(&self) -> bool {
        !matches!(self, AddressType::Public)
    }

    /// Whether this address type is a resolvable private address. A `KeyBin` must never be
    /// persisted under this address type -- only a resolved identity address.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, AddressType::RandomResolvablePrivate)
    }

    pub(crate) fn to_raw(&self) -> u8 {
        match self {
            AddressType::Public => 0x00,
            AddressType::RandomStatic => 0x01,
            AddressType::RandomResolvablePrivate => 0x01,
            AddressType::RandomNonResolvablePrivate => 0x01,
        }
    }

    /// Address type as used in the HCI LE Set Advertising Parameters / Create Connection
    /// commands, which only distinguish Public (0x0) from Random (0x1).
    pub(crate) fn to_hci_raw(&self) -> u8 {
        self.to_raw()
    }
}

/// A Bluetooth device address with its associated type.
#[derive(Clone, Copy, Eq)]
pub struct Address {
    pub bytes: BluetoothDeviceAddress,
    pub address_type: AddressType,
}

impl Address {
    pub fn new(bytes: BluetoothDeviceAddress, address_type: AddressType) -> Self {
        Address { bytes, address_type }
    }

    /// Build an `Address`, inferring the random sub-type from the top two bits when
    /// `is_random` is set.
    pub fn from_raw(bytes: BluetoothDeviceAddress, is_random: bool) -> Self {
        let address_type = if is_random {
            AddressType::classify_random(&bytes)
        } else {
            AddressType::Public
        };

        Address { bytes, address_type }
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == [0u8; 6]
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.address_type == other.address_type
    }
}

impl core::hash::Hash for Address {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
        core::mem::discriminant(&self.address_type).hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The wire order is little-endian; addresses are conventionally printed
        // most-significant-octet first.
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5], self.bytes[4], self.bytes[3], self.bytes[2], self.bytes[1], self.bytes[0]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:?})", self, self.address_type)
    }
}

impl core::str::FromStr for Address {
    type Err = Error;

    /// Parses a colon-delimited, most-significant-octet-first address string such as
    /// `C0:26:DA:01:DA:B1`. The produced address is always `AddressType::Public`; callers that
    /// need a random address should use [`Address::new`] directly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 17 {
            return Err(Error::new(ErrorKind::Param, "address string must be 17 characters"));
        }

        let mut bytes = [0u8; 6];

        for (i, part) in s.split(':').enumerate() {
            if i >= 6 || part.len() != 2 {
                return Err(Error::new(ErrorKind::Param, "address string malformed"));
            }

            bytes[5 - i] = u8::from_str_radix(part, 16)
                .map_err(|_| Error::new(ErrorKind::Param, "address octet is not hexadecimal"))?;
        }

        Ok(Address::new(bytes, AddressType::Public))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn round_trip() {
        let addr = Address::from_str("C0:26:DA:01:DA:B1").unwrap();
        assert_eq!(addr.to_string(), "C0:26:DA:01:DA:B1");
    }

    #[test]
    fn bad_length_is_param_error() {
        let err = Address::from_str("C0:26:DA:01:DA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Param);
    }

    #[test]
    fn missing_colons_is_param_error() {
        let err = Address::from_str("C026DA01DAB1ZZZZZ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Param);
    }

    #[test]
    fn random_address_classification() {
        let static_addr = [0x01, 0x02, 0x03, 0x04, 0x05, 0xC1];
        assert_eq!(AddressType::classify_random(&static_addr), AddressType::RandomStatic);

        let resolvable = [0x01, 0x02, 0x03, 0x04, 0x05, 0x41];
        assert_eq!(AddressType::classify_random(&resolvable), AddressType::RandomResolvablePrivate);

        let non_resolvable = [0x01, 0x02, 0x03, 0x04, 0x05, 0x01];
        assert_eq!(AddressType::classify_random(&non_resolvable), AddressType::RandomNonResolvablePrivate);
    }
}
