//! Bluetooth UUIDs
//!
//! A Bluetooth UUID comes in three wire widths -- 16, 32, and 128 bit -- but they all denote a
//! UUID in the canonical 128-bit `Bluetooth_Base_UUID` space
//! (`00000000-0000-1000-8000-00805F9B34FB`). Two `Uuid`s are equal iff their 128-bit expansions
//! match, regardless of which width either side was constructed from.

use core::convert::TryFrom;
use core::fmt;

/// `00000000-0000-1000-8000-00805F9B34FB`
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

#[derive(Clone, Copy, Eq)]
pub enum Uuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(u128),
}

impl Uuid {
    /// Expand to the canonical 128-bit form.
    pub fn as_u128(&self) -> u128 {
        match self {
            Uuid::Uuid16(v) => ((*v as u128) << 96) | BLUETOOTH_BASE_UUID,
            Uuid::Uuid32(v) => ((*v as u128) << 96) | BLUETOOTH_BASE_UUID,
            Uuid::Uuid128(v) => *v,
        }
    }

    /// The smallest wire representation this UUID can be encoded as without losing information.
    pub fn shortest_form(&self) -> Uuid {
        let full = self.as_u128();

        if (full & !0xFFFF_0000_0000_0000_0000_0000_0000_0000) == (BLUETOOTH_BASE_UUID & !0xFFFF_0000_0000_0000_0000_0000_0000_0000)
            && (full >> 96) <= u16::MAX as u128
        {
            Uuid::Uuid16((full >> 96) as u16)
        } else if full & !0xFFFF_FFFF_0000_0000_0000_0000_0000_0000 == BLUETOOTH_BASE_UUID & !0xFFFF_FFFF_0000_0000_0000_0000_0000_0000 {
            Uuid::Uuid32((full >> 96) as u32)
        } else {
            Uuid::Uuid128(full)
        }
    }

    pub fn is_16_bit(&self) -> bool {
        matches!(self.shortest_form(), Uuid::Uuid16(_))
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_u128() == other.as_u128()
    }
}

impl core::hash::Hash for Uuid {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.as_u128().hash(state);
    }
}

impl From<u16> for Uuid {
    fn from(v: u16) -> Self {
        Uuid::Uuid16(v)
    }
}

impl From<u32> for Uuid {
    fn from(v: u32) -> Self {
        Uuid::Uuid32(v)
    }
}

impl From<u128> for Uuid {
    fn from(v: u128) -> Self {
        Uuid::Uuid128(v)
    }
}

impl From<Uuid> for u128 {
    fn from(u: Uuid) -> Self {
        u.as_u128()
    }
}

/// Failure converting a 128-bit UUID down to a narrower wire type because it isn't derived from
/// the Bluetooth base UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotShortUuid;

impl TryFrom<Uuid> for u16 {
    type Error = NotShortUuid;

    fn try_from(uuid: Uuid) -> Result<Self, Self::Error> {
        match uuid.shortest_form() {
            Uuid::Uuid16(v) => Ok(v),
            _ => Err(NotShortUuid),
        }
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = self.as_u128();
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_expands_and_contracts() {
        let short = Uuid::Uuid16(0x1800);
        assert_eq!(short.as_u128(), 0x0000_1800_0000_1000_8000_0080_5F9B_34FB);
        assert_eq!(u16::try_from(short).unwrap(), 0x1800);
    }

    #[test]
    fn full_uuid_equals_its_short_form() {
        let full = Uuid::Uuid128(0x0000_1800_0000_1000_8000_0080_5F9B_34FB);
        let short = Uuid::Uuid16(0x1800);
        assert_eq!(full, short);
    }

    #[test]
    fn vendor_uuid_has_no_short_form() {
        let uuid = Uuid::Uuid128(0xd0ca6bf3_3d52_4760_98e5_fc5883e93712);
        assert!(u16::try_from(uuid).is_err());
    }
}
