//! Generic Access Profile: advertising and scan response data.
//!
//! Advertising payloads are a sequence of AD structures (Core Spec Vol 3, Part C §11): a length
//! byte, a type byte, then `length - 1` bytes of data. `AdStructure` models one such entry;
//! `Advertisement` assembles a full 31-byte payload out of them.

use crate::uuid::Uuid;

/// The maximum size of a legacy advertising or scan response payload.
pub const MAX_ADVERTISING_DATA_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdType {
    Flags = 0x01,
    IncompleteServiceUuids16 = 0x02,
    CompleteServiceUuids16 = 0x03,
    IncompleteServiceUuids128 = 0x06,
    CompleteServiceUuids128 = 0x07,
    ShortenedLocalName = 0x08,
    CompleteLocalName = 0x09,
    TxPowerLevel = 0x0A,
    ManufacturerSpecificData = 0xFF,
}

#[derive(Debug, Clone, Copy)]
pub struct Flags {
    pub le_limited_discoverable: bool,
    pub le_general_discoverable: bool,
    pub br_edr_not_supported: bool,
}

impl Flags {
    fn to_byte(self) -> u8 {
        (self.le_limited_discoverable as u8)
            | ((self.le_general_discoverable as u8) << 1)
            | ((self.br_edr_not_supported as u8) << 2)
    }
}

/// One AD structure. Only the entries this stack needs to build or parse are modeled; an unknown
/// type round-trips as `Raw` so discovery never has to reject an otherwise-valid advertisement.
#[derive(Debug, Clone)]
pub enum AdStructure {
    Flags(Flags),
    CompleteLocalName(String),
    ShortenedLocalName(String),
    ServiceUuids16 { complete: bool, uuids: Vec<u16> },
    ManufacturerSpecificData { company_id: u16, data: Vec<u8> },
    TxPowerLevel(i8),
    Raw { ad_type: u8, data: Vec<u8> },
}

impl AdStructure {
    fn ad_type(&self) -> u8 {
        match self {
            AdStructure::Flags(_) => AdType::Flags as u8,
            AdStructure::CompleteLocalName(_) => AdType::CompleteLocalName as u8,
            AdStructure::ShortenedLocalName(_) => AdType::ShortenedLocalName as u8,
            AdStructure::ServiceUuids16 { complete: true, .. } => AdType::CompleteServiceUuids16 as u8,
            AdStructure::ServiceUuids16 { complete: false, .. } => AdType::IncompleteServiceUuids16 as u8,
            AdStructure::ManufacturerSpecificData { .. } => AdType::ManufacturerSpecificData as u8,
            AdStructure::TxPowerLevel(_) => AdType::TxPowerLevel as u8,
            AdStructure::Raw { ad_type, .. } => *ad_type,
        }
    }

    fn data(&self) -> Vec<u8> {
        match self {
            AdStructure::Flags(flags) => vec![flags.to_byte()],
            AdStructure::CompleteLocalName(name) | AdStructure::ShortenedLocalName(name) => name.as_bytes().to_vec(),
            AdStructure::ServiceUuids16 { uuids, .. } => uuids.iter().flat_map(|u| u.to_le_bytes()).collect(),
            AdStructure::ManufacturerSpecificData { company_id, data } => {
                let mut v = company_id.to_le_bytes().to_vec();
                v.extend_from_slice(data);
                v
            }
            AdStructure::TxPowerLevel(dbm) => vec![*dbm as u8],
            AdStructure::Raw { data, .. } => data.clone(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let data = self.data();
        out.push((data.len() + 1) as u8);
        out.push(self.ad_type());
        out.extend_from_slice(&data);
    }

    fn decode_one(raw: &[u8]) -> Option<(AdStructure, &[u8])> {
        let len = *raw.first()? as usize;
        if len == 0 || raw.len() < 1 + len {
            return None;
        }

        let ad_type = raw[1];
        let data = &raw[2..1 + len];
        let rest = &raw[1 + len..];

        let structure = match ad_type {
            t if t == AdType::Flags as u8 && !data.is_empty() => AdStructure::Flags(Flags {
                le_limited_discoverable: data[0] & 0x01 != 0,
                le_general_discoverable: data[0] & 0x02 != 0,
                br_edr_not_supported: data[0] & 0x04 != 0,
            }),
            t if t == AdType::CompleteLocalName as u8 => {
                AdStructure::CompleteLocalName(String::from_utf8_lossy(data).into_owned())
            }
            t if t == AdType::ShortenedLocalName as u8 => {
                AdStructure::ShortenedLocalName(String::from_utf8_lossy(data).into_owned())
            }
            t if (t == AdType::CompleteServiceUuids16 as u8 || t == AdType::IncompleteServiceUuids16 as u8)
                && data.len() % 2 == 0 =>
            {
                AdStructure::ServiceUuids16 {
                    complete: t == AdType::CompleteServiceUuids16 as u8,
                    uuids: data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect(),
                }
            }
            t if t == AdType::ManufacturerSpecificData as u8 && data.len() >= 2 => AdStructure::ManufacturerSpecificData {
                company_id: u16::from_le_bytes([data[0], data[1]]),
                data: data[2..].to_vec(),
            },
            t if t == AdType::TxPowerLevel as u8 && !data.is_empty() => AdStructure::TxPowerLevel(data[0] as i8),
            _ => AdStructure::Raw { ad_type, data: data.to_vec() },
        };

        Some((structure, rest))
    }
}

/// A complete advertising or scan response payload, built from a sequence of AD structures.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    structures: Vec<AdStructure>,
}

impl Advertisement {
    pub fn new() -> Self {
        Advertisement::default()
    }

    pub fn add(mut self, structure: AdStructure) -> Self {
        self.structures.push(structure);
        self
    }

    pub fn structures(&self) -> &[AdStructure] {
        &self.structures
    }

    /// Encodes to the 31-byte-capped payload the controller's `LE Set Advertising Data` command
    /// expects. Truncation past the cap is a caller error, not silently handled here.
    pub fn encode(&self) -> Result<Vec<u8>, crate::error::Error> {
        let mut out = Vec::new();
        for structure in &self.structures {
            structure.encode(&mut out);
        }

        if out.len() > MAX_ADVERTISING_DATA_LEN {
            return Err(crate::error::Error::new(
                crate::error::ErrorKind::Param,
                format!("advertisement payload is {} bytes, exceeds the {} byte legacy limit", out.len(), MAX_ADVERTISING_DATA_LEN),
            ));
        }

        Ok(out)
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut structures = Vec::new();
        let mut rest = raw;

        while !rest.is_empty() {
            match AdStructure::decode_one(rest) {
                Some((structure, remaining)) => {
                    structures.push(structure);
                    rest = remaining;
                }
                None => break,
            }
        }

        Advertisement { structures }
    }

    /// The `CompleteLocalName`/`ShortenedLocalName` entry, if advertised.
    pub fn local_name(&self) -> Option<&str> {
        self.structures.iter().find_map(|s| match s {
            AdStructure::CompleteLocalName(n) | AdStructure::ShortenedLocalName(n) => Some(n.as_str()),
            _ => None,
        })
    }

    /// The `TxPowerLevel` entry, if advertised.
    pub fn tx_power_level(&self) -> Option<i8> {
        self.structures.iter().find_map(|s| match s {
            AdStructure::TxPowerLevel(dbm) => Some(*dbm),
            _ => None,
        })
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.structures
            .iter()
            .filter_map(|s| match s {
                AdStructure::ServiceUuids16 { uuids, .. } => Some(uuids.iter().map(|u| Uuid::Uuid16(*u))),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_name_and_flags() {
        let ad = Advertisement::new()
            .add(AdStructure::Flags(Flags { le_limited_discoverable: false, le_general_discoverable: true, br_edr_not_supported: true }))
            .add(AdStructure::CompleteLocalName("S-21".into()));

        let raw = ad.encode().unwrap();
        let back = Advertisement::decode(&raw);

        assert_eq!(back.local_name(), Some("S-21"));
    }

    #[test]
    fn rejects_oversized_payload() {
        let ad = Advertisement::new().add(AdStructure::ManufacturerSpecificData { company_id: 0x004C, data: vec![0u8; 40] });
        assert!(ad.encode().is_err());
    }
}
