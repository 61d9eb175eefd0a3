//! Persistent bonded-key storage
//!
//! A `KeyBin` holds everything needed to skip pairing on reconnect with one bonded peer: the
//! long term keys for both connection roles, the identity resolving key, the signing key, and
//! (for cross-transport bonding) a BR/EDR link key. Core Spec Vol 3, Part H, §2.4 defines the
//! key types this stores; the file layout itself is this stack's own.

use crate::addr::{Address, AddressType};
use crate::error::{Error, ErrorKind};
use crate::sm::pdu::IoCapability;
use crate::sm::SecurityLevel;
use std::fs;
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"BTKB";
const VERSION: u16 = 1;

const LTK_INIT_BIT: u8 = 0x01;
const LTK_RESP_BIT: u8 = 0x02;
const IRK_BIT: u8 = 0x04;
const CSRK_BIT: u8 = 0x08;
const LINK_KEY_BIT: u8 = 0x10;

const LTK_BLOB_LEN: usize = 16 + 2 + 8 + 1 + 1;
const IRK_BLOB_LEN: usize = 16;
const CSRK_BLOB_LEN: usize = 16 + 4;
const LINK_KEY_BLOB_LEN: usize = 16;

/// One distributable long term key and the data needed to use it: `ediv`/`rand` identify it for
/// LE Legacy pairing (both zero for LE Secure Connections, which derives the LTK directly), and
/// the properties byte records how strongly it was bonded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtkRecord {
    pub ltk: u128,
    pub ediv: u16,
    pub rand: u64,
    pub key_size: u8,
    pub authenticated: bool,
    pub secure_connections: bool,
}

impl LtkRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ltk.to_le_bytes());
        out.extend_from_slice(&self.ediv.to_le_bytes());
        out.extend_from_slice(&self.rand.to_le_bytes());
        out.push(self.key_size);
        let mut properties = 0u8;
        if self.authenticated {
            properties |= 0x01;
        }
        if self.secure_connections {
            properties |= 0x02;
        }
        out.push(properties);
    }

    fn decode(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() != LTK_BLOB_LEN {
            return Err(Error::new(ErrorKind::Protocol, "ltk record has the wrong length"));
        }

        let mut ltk_bytes = [0u8; 16];
        ltk_bytes.copy_from_slice(&raw[0..16]);
        let ediv = u16::from_le_bytes([raw[16], raw[17]]);
        let mut rand_bytes = [0u8; 8];
        rand_bytes.copy_from_slice(&raw[18..26]);
        let key_size = raw[26];
        let properties = raw[27];

        Ok(LtkRecord {
            ltk: u128::from_le_bytes(ltk_bytes),
            ediv,
            rand: u64::from_le_bytes(rand_bytes),
            key_size,
            authenticated: properties & 0x01 != 0,
            secure_connections: properties & 0x02 != 0,
        })
    }
}

/// All key material bonded with one remote identity, keyed by (local adapter, remote identity).
///
/// `ltk_init` is the peer's LTK, used to start encryption when this device connects as the
/// central; `ltk_resp` is the LTK this device distributed, used when the peer connects to it and
/// it acts as peripheral. Either, both, or neither may be present depending on what phase 3 key
/// distribution actually exchanged.
#[derive(Debug, Clone)]
pub struct KeyBin {
    pub local_address: Address,
    pub remote_identity_address: Address,
    pub security_level: SecurityLevel,
    pub io_capability: IoCapability,
    pub ltk_init: Option<LtkRecord>,
    pub ltk_resp: Option<LtkRecord>,
    pub irk: Option<u128>,
    pub csrk: Option<(u128, u32)>,
    pub link_key: Option<u128>,
}

impl KeyBin {
    pub fn new(local_address: Address, remote_identity_address: Address, security_level: SecurityLevel, io_capability: IoCapability) -> Self {
        KeyBin {
            local_address,
            remote_identity_address,
            security_level,
            io_capability,
            ltk_init: None,
            ltk_resp: None,
            irk: None,
            csrk: None,
            link_key: None,
        }
    }

    fn key_mask(&self) -> u8 {
        let mut mask = 0u8;
        if self.ltk_init.is_some() {
            mask |= LTK_INIT_BIT;
        }
        if self.ltk_resp.is_some() {
            mask |= LTK_RESP_BIT;
        }
        if self.irk.is_some() {
            mask |= IRK_BIT;
        }
        if self.csrk.is_some() {
            mask |= CSRK_BIT;
        }
        if self.link_key.is_some() {
            mask |= LINK_KEY_BIT;
        }
        mask
    }

    /// Serializes this key bin to its on-disk byte layout, including the trailing checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.local_address.bytes);
        out.extend_from_slice(&self.remote_identity_address.bytes);
        out.push(address_type_to_raw(self.remote_identity_address.address_type));
        out.push(self.security_level.to_raw());
        out.push(self.io_capability.to_raw());
        out.push(self.key_mask());

        if let Some(ltk) = &self.ltk_init {
            ltk.encode(&mut out);
        }
        if let Some(ltk) = &self.ltk_resp {
            ltk.encode(&mut out);
        }
        if let Some(irk) = self.irk {
            out.extend_from_slice(&irk.to_le_bytes());
        }
        if let Some((csrk, sign_counter)) = self.csrk {
            out.extend_from_slice(&csrk.to_le_bytes());
            out.extend_from_slice(&sign_counter.to_le_bytes());
        }
        if let Some(link_key) = self.link_key {
            out.extend_from_slice(&link_key.to_le_bytes());
        }

        let checksum = running_sum(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Parses a key bin from its on-disk byte layout, verifying the magic, version, checksum,
    /// and the invariant that the stored remote address is never a resolvable private address.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 4 + 2 + 6 + 6 + 1 + 1 + 1 + 1 + 2 {
            return Err(Error::new(ErrorKind::Protocol, "key bin shorter than its fixed header"));
        }

        let (body, trailer) = raw.split_at(raw.len() - 2);
        let stored_checksum = u16::from_le_bytes([trailer[0], trailer[1]]);
        if running_sum(body) != stored_checksum {
            return Err(Error::new(ErrorKind::Protocol, "key bin checksum mismatch"));
        }

        if body[0..4] != MAGIC {
            return Err(Error::new(ErrorKind::Protocol, "key bin magic mismatch"));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version != VERSION {
            return Err(Error::new(ErrorKind::Protocol, format!("unsupported key bin version {}", version)));
        }

        let mut local_bytes = [0u8; 6];
        local_bytes.copy_from_slice(&body[6..12]);
        let mut remote_bytes = [0u8; 6];
        remote_bytes.copy_from_slice(&body[12..18]);
        let remote_type_raw = body[18];
        let remote_address_type = address_type_from_raw(remote_type_raw)?;

        if remote_address_type.is_resolvable() {
            return Err(Error::new(ErrorKind::Security, "key bin stores a resolvable private address, not a resolved identity"));
        }

        let security_level = SecurityLevel::from_raw(body[19]).ok_or_else(|| Error::new(ErrorKind::Protocol, "invalid security level byte"))?;
        let io_capability = IoCapability::from_raw(body[20]).map_err(|_| Error::new(ErrorKind::Protocol, "invalid io capability byte"))?;
        let key_mask = body[21];

        let mut cursor = 22usize;
        let mut take = |len: usize| -> Result<&[u8], Error> {
            let slice = body.get(cursor..cursor + len).ok_or_else(|| Error::new(ErrorKind::Protocol, "key bin truncated"))?;
            cursor += len;
            Ok(slice)
        };

        let ltk_init = if key_mask & LTK_INIT_BIT != 0 { Some(LtkRecord::decode(take(LTK_BLOB_LEN)?)?) } else { None };
        let ltk_resp = if key_mask & LTK_RESP_BIT != 0 { Some(LtkRecord::decode(take(LTK_BLOB_LEN)?)?) } else { None };

        let irk = if key_mask & IRK_BIT != 0 {
            let raw = take(IRK_BLOB_LEN)?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(raw);
            Some(u128::from_le_bytes(bytes))
        } else {
            None
        };

        let csrk = if key_mask & CSRK_BIT != 0 {
            let raw = take(CSRK_BLOB_LEN)?;
            let mut key_bytes = [0u8; 16];
            key_bytes.copy_from_slice(&raw[0..16]);
            let mut counter_bytes = [0u8; 4];
            counter_bytes.copy_from_slice(&raw[16..20]);
            Some((u128::from_le_bytes(key_bytes), u32::from_le_bytes(counter_bytes)))
        } else {
            None
        };

        let link_key = if key_mask & LINK_KEY_BIT != 0 {
            let raw = take(LINK_KEY_BLOB_LEN)?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(raw);
            Some(u128::from_le_bytes(bytes))
        } else {
            None
        };

        if cursor != body.len() {
            return Err(Error::new(ErrorKind::Protocol, "key bin has trailing bytes past its declared keys"));
        }

        Ok(KeyBin {
            local_address: Address::new(local_bytes, AddressType::Public),
            remote_identity_address: Address::new(remote_bytes, remote_address_type),
            security_level,
            io_capability,
            ltk_init,
            ltk_resp,
            irk,
            csrk,
            link_key,
        })
    }

    /// FAT32-LFN-safe filename for this key bin: colon-free hex addresses, no reserved
    /// characters.
    pub fn filename(&self) -> String {
        format!(
            "bd_{}_{}_{}.key",
            hex_no_colons(&self.local_address.bytes),
            hex_no_colons(&self.remote_identity_address.bytes),
            address_type_to_raw(self.remote_identity_address.address_type),
        )
    }

    /// Writes the key bin atomically: a partial write (crash, full disk) leaves the previous
    /// file, if any, untouched rather than a half-written one in its place.
    pub fn save(&self, dir: &Path) -> Result<(), Error> {
        fs::create_dir_all(dir).map_err(|e| Error::new(ErrorKind::Transport, format!("creating key store directory: {}", e)))?;
        let path = dir.join(self.filename());
        let tmp_path = dir.join(format!("{}.tmp", self.filename()));

        fs::write(&tmp_path, self.to_bytes()).map_err(|e| Error::new(ErrorKind::Transport, format!("writing {}: {}", tmp_path.display(), e)))?;
        fs::rename(&tmp_path, &path).map_err(|e| Error::new(ErrorKind::Transport, format!("renaming {} to {}: {}", tmp_path.display(), path.display(), e)))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = fs::read(path).map_err(|e| Error::new(ErrorKind::Transport, format!("reading {}: {}", path.display(), e)))?;
        Self::from_bytes(&raw)
    }

    /// Scans `dir` for a key bin matching `local_address`/`remote_identity_address`, returning
    /// it only if its stored security level meets `minimum`.
    pub fn find(dir: &Path, local_address: &Address, remote_identity_address: &Address, minimum: SecurityLevel) -> Result<Option<Self>, Error> {
        let probe = KeyBin::new(*local_address, *remote_identity_address, minimum, IoCapability::NoInputNoOutput);
        let path: PathBuf = dir.join(probe.filename());

        if !path.exists() {
            return Ok(None);
        }

        let bin = Self::load(&path)?;
        if bin.security_level < minimum {
            return Ok(None);
        }

        Ok(Some(bin))
    }
}

fn running_sum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}

/// This byte distinguishes all four address types; `AddressType::to_raw`'s own encoding folds the
/// three random sub-types together for HCI's benefit and can't be used here, since telling a
/// resolvable private address apart from a static one is exactly what the read-side invariant
/// check needs.
fn address_type_to_raw(t: AddressType) -> u8 {
    match t {
        AddressType::Public => 0x00,
        AddressType::RandomStatic => 0x01,
        AddressType::RandomResolvablePrivate => 0x02,
        AddressType::RandomNonResolvablePrivate => 0x03,
    }
}

fn address_type_from_raw(raw: u8) -> Result<AddressType, Error> {
    match raw {
        0x00 => Ok(AddressType::Public),
        0x01 => Ok(AddressType::RandomStatic),
        0x02 => Ok(AddressType::RandomResolvablePrivate),
        0x03 => Ok(AddressType::RandomNonResolvablePrivate),
        other => Err(Error::new(ErrorKind::Protocol, format!("unknown address type byte {:#04x}", other))),
    }
}

fn hex_no_colons(bytes: &[u8; 6]) -> String {
    bytes.iter().rev().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bin() -> KeyBin {
        let local = Address::new([0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0], AddressType::Public);
        let remote = Address::new([0x21, 0x43, 0x65, 0x87, 0x09, 0xAB], AddressType::RandomStatic);
        let mut bin = KeyBin::new(local, remote, SecurityLevel::EncAuth, IoCapability::DisplayYesNo);
        bin.ltk_resp = Some(LtkRecord { ltk: 0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00, ediv: 0xBEEF, rand: 0xDEAD_C0DE_1234_5678, key_size: 16, authenticated: true, secure_connections: true });
        bin.irk = Some(0xF0F0_F0F0_F0F0_F0F0_F0F0_F0F0_F0F0_F0F0);
        bin.csrk = Some((0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10, 7));
        bin
    }

    #[test]
    fn round_trips_through_bytes() {
        let bin = sample_bin();
        let raw = bin.to_bytes();
        let back = KeyBin::from_bytes(&raw).unwrap();

        assert_eq!(back.local_address, bin.local_address);
        assert_eq!(back.remote_identity_address, bin.remote_identity_address);
        assert_eq!(back.security_level, bin.security_level);
        assert_eq!(back.io_capability, bin.io_capability);
        assert_eq!(back.ltk_init, bin.ltk_init);
        assert_eq!(back.ltk_resp, bin.ltk_resp);
        assert_eq!(back.irk, bin.irk);
        assert_eq!(back.csrk, bin.csrk);
        assert_eq!(back.link_key, bin.link_key);
    }

    #[test]
    fn rejects_resolvable_remote_address() {
        let local = Address::new([0; 6], AddressType::Public);
        let remote = Address::new([1, 2, 3, 4, 5, 0x41], AddressType::RandomResolvablePrivate);
        let bin = KeyBin::new(local, remote, SecurityLevel::EncOnly, IoCapability::NoInputNoOutput);
        let raw = bin.to_bytes();

        let err = KeyBin::from_bytes(&raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let bin = sample_bin();
        let mut raw = bin.to_bytes();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        let err = KeyBin::from_bytes(&raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn filename_is_fat32_lfn_safe() {
        let bin = sample_bin();
        let name = bin.filename();
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
    }
}
