//! Universal labels, identifiers and KLV key classification.
//!
//! Every KLV packet starts with a 16-byte SMPTE universal label. The demuxer
//! only needs to recognize a handful of key families; everything else is
//! reported as [`KeyKind::Unknown`] and skipped.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// 16-byte SMPTE universal label
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Ul(pub [u8; 16]);

/// 16-byte instance identifier used for strong references between sets
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Uuid(pub [u8; 16]);

/// 32-byte unique material identifier naming a package
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Umid(pub [u8; 32]);

// constants
const SMPTE_PREFIX: [u8; 4] = [0x06, 0x0e, 0x2b, 0x34];

const PARTITION_PACK_PREFIX: [u8; 13] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01,
];

const INDEX_SEGMENT_KEY: [u8; 16] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x10, 0x01, 0x00,
];

const METADATA_PREFIX: [u8; 13] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01,
];

const DESCRIPTIVE_METADATA_PREFIX: [u8; 12] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x04, 0x01,
];

const FILL_KEY: [u8; 16] = [
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x00, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00, 0x00, 0x00,
];

const GENERIC_CONTAINER_KEY: [u8; 4] = [0x0d, 0x01, 0x03, 0x01];

const DATA_DEFINITION_PREFIX: [u8; 11] = [
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02,
];

impl Ul {
    /// Build a label from a byte slice, failing if it is not 16 bytes long.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Ul)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Compare two labels ignoring the registry version byte (byte 7).
    pub fn matches_ignoring_version(&self, other: &Ul) -> bool {
        self.0[..7] == other.0[..7] && self.0[8..] == other.0[8..]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Partition pack of any kind with a valid status byte.
    pub fn is_partition_pack(&self) -> bool {
        self.0[..13] == PARTITION_PACK_PREFIX
            && (0x02..=0x04).contains(&self.0[13])
            && self.0[14] < 0x05
            && self.0[15] == 0x00
    }

    pub fn is_header_partition_pack(&self) -> bool {
        self.is_partition_pack() && self.0[13] == 0x02
    }

    pub fn is_body_partition_pack(&self) -> bool {
        self.is_partition_pack() && self.0[13] == 0x03
    }

    pub fn is_footer_partition_pack(&self) -> bool {
        self.is_partition_pack() && self.0[13] == 0x04
    }

    pub fn is_primer_pack(&self) -> bool {
        self.0[..13] == PARTITION_PACK_PREFIX && self.0[13..] == [0x05, 0x01, 0x00]
    }

    pub fn is_random_index_pack(&self) -> bool {
        self.0[..13] == PARTITION_PACK_PREFIX && self.0[13..] == [0x11, 0x01, 0x00]
    }

    pub fn is_index_table_segment(&self) -> bool {
        self.0 == INDEX_SEGMENT_KEY
    }

    pub fn is_fill(&self) -> bool {
        self.matches_ignoring_version(&Ul(FILL_KEY))
    }

    /// Structural metadata set (preface, packages, tracks, descriptors...).
    pub fn is_metadata(&self) -> bool {
        self.0[..13] == METADATA_PREFIX && self.0[15] == 0x00
    }

    pub fn is_descriptive_metadata(&self) -> bool {
        self.0[..12] == DESCRIPTIVE_METADATA_PREFIX
    }

    /// Generic container system item (SMPTE 385M / 405M).
    pub fn is_system_item(&self) -> bool {
        self.0[..4] == SMPTE_PREFIX
            && self.0[4] == 0x02
            && self.0[6] == 0x01
            && self.0[8..12] == GENERIC_CONTAINER_KEY
            && matches!(self.0[12], 0x04 | 0x14)
    }

    /// Generic container essence element (SMPTE 379M).
    pub fn is_essence_element(&self) -> bool {
        self.0[..4] == SMPTE_PREFIX
            && self.0[4] == 0x01
            && self.0[5] == 0x02
            && self.0[6] == 0x01
            && self.0[8..12] == GENERIC_CONTAINER_KEY
            && matches!(self.0[12], 0x05 | 0x06 | 0x07 | 0x15 | 0x16 | 0x17 | 0x18)
    }

    /// Track number of an essence element: item type, element count,
    /// element type and element number as one big-endian word.
    pub fn essence_track_number(&self) -> u32 {
        u32::from_be_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    /// Set type of a structural metadata key.
    pub fn metadata_type(&self) -> u16 {
        u16::from_be_bytes([self.0[13], self.0[14]])
    }

    /// Classify the key of a KLV packet.
    pub fn kind(&self) -> KeyKind {
        if self.is_partition_pack() {
            KeyKind::PartitionPack
        } else if self.is_primer_pack() {
            KeyKind::PrimerPack
        } else if self.is_metadata() {
            KeyKind::Metadata(self.metadata_type())
        } else if self.is_descriptive_metadata() {
            KeyKind::DescriptiveMetadata {
                scheme: self.0[12],
                set_type: u32::from_be_bytes([0, self.0[13], self.0[14], self.0[15]]),
            }
        } else if self.is_system_item() {
            KeyKind::SystemItem
        } else if self.is_essence_element() {
            KeyKind::EssenceElement(self.essence_track_number())
        } else if self.is_random_index_pack() {
            KeyKind::RandomIndexPack
        } else if self.is_index_table_segment() {
            KeyKind::IndexTableSegment
        } else if self.is_fill() {
            KeyKind::Fill
        } else {
            KeyKind::Unknown
        }
    }
}

impl fmt::Display for Ul {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chunk) in self.0.chunks(4).enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            for b in chunk {
                write!(f, "{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Ul {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ul({self})")
    }
}

impl Uuid {
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Uuid)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({self})")
    }
}

impl Umid {
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Umid)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Umid {
    fn default() -> Self {
        Umid([0; 32])
    }
}

/// UMIDs print as `urn:smpte:umid:` followed by eight dot-separated
/// groups of four hex bytes.
impl fmt::Display for Umid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("urn:smpte:umid:")?;
        for (i, chunk) in self.0.chunks(4).enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            for b in chunk {
                write!(f, "{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Umid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Umid({self})")
    }
}

impl FromStr for Umid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix("urn:smpte:umid:").unwrap_or(s);
        let digits: Vec<u8> = hex.bytes().filter(|c| *c != b'.').collect();
        if digits.len() != 64 {
            return Err(Error::InvalidState(format!("invalid UMID string '{s}'")));
        }

        let mut out = [0u8; 32];
        for (i, pair) in digits.chunks(2).enumerate() {
            let text = std::str::from_utf8(pair)
                .map_err(|_| Error::InvalidState(format!("invalid UMID string '{s}'")))?;
            out[i] = u8::from_str_radix(text, 16)
                .map_err(|_| Error::InvalidState(format!("invalid UMID string '{s}'")))?;
        }
        Ok(Umid(out))
    }
}

/// Classification of a KLV key as seen by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    PartitionPack,
    PrimerPack,
    /// Structural metadata set with its 16-bit set type
    Metadata(u16),
    DescriptiveMetadata {
        scheme: u8,
        set_type: u32,
    },
    SystemItem,
    /// Essence element with its track number
    EssenceElement(u32),
    RandomIndexPack,
    IndexTableSegment,
    Fill,
    Unknown,
}

impl KeyKind {
    /// Get a string representation of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartitionPack => "partition_pack",
            Self::PrimerPack => "primer_pack",
            Self::Metadata(_) => "metadata",
            Self::DescriptiveMetadata { .. } => "descriptive_metadata",
            Self::SystemItem => "system_item",
            Self::EssenceElement(_) => "essence_element",
            Self::RandomIndexPack => "random_index_pack",
            Self::IndexTableSegment => "index_table_segment",
            Self::Fill => "fill",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Partition kind from key byte 13
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Header,
    Body,
    Footer,
}

impl PartitionKind {
    pub fn from_key(key: &Ul) -> Option<Self> {
        if !key.is_partition_pack() {
            return None;
        }
        match key.0[13] {
            0x02 => Some(Self::Header),
            0x03 => Some(Self::Body),
            0x04 => Some(Self::Footer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Body => "body",
            Self::Footer => "footer",
        }
    }
}

/// Track type derived from a sequence's data definition label (RP 224)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackType {
    #[default]
    Unknown,
    Timecode12mInactive,
    Timecode12mActive,
    Timecode309m,
    Metadata,
    Picture,
    Sound,
    Data,
}

impl TrackType {
    /// Map a data definition label to a track type.
    pub fn from_data_definition(ul: &Ul) -> Self {
        let mut prefix = [0u8; 16];
        prefix[..11].copy_from_slice(&DATA_DEFINITION_PREFIX);
        prefix[11] = ul.0[11];
        prefix[12] = ul.0[12];
        if !ul.matches_ignoring_version(&Ul(prefix)) {
            return Self::Unknown;
        }

        match (ul.0[11], ul.0[12]) {
            (0x01, 0x01) => Self::Timecode12mInactive,
            (0x01, 0x02) => Self::Timecode12mActive,
            (0x01, 0x03) => Self::Timecode309m,
            (0x01, 0x10) => Self::Metadata,
            (0x02, 0x01) => Self::Picture,
            (0x02, 0x02) => Self::Sound,
            (0x02, 0x03) => Self::Data,
            _ => Self::Unknown,
        }
    }

    /// The data definition label for this track type.
    pub fn data_definition(&self) -> Option<Ul> {
        let (a, b) = match self {
            Self::Unknown => return None,
            Self::Timecode12mInactive => (0x01, 0x01),
            Self::Timecode12mActive => (0x01, 0x02),
            Self::Timecode309m => (0x01, 0x03),
            Self::Metadata => (0x01, 0x10),
            Self::Picture => (0x02, 0x01),
            Self::Sound => (0x02, 0x02),
            Self::Data => (0x02, 0x03),
        };
        let mut ul = [0u8; 16];
        ul[..11].copy_from_slice(&DATA_DEFINITION_PREFIX);
        ul[11] = a;
        ul[12] = b;
        Some(Ul(ul))
    }

    pub fn is_essence(&self) -> bool {
        matches!(self, Self::Picture | Self::Sound | Self::Data)
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata)
    }

    pub fn is_timecode(&self) -> bool {
        matches!(
            self,
            Self::Timecode12mInactive | Self::Timecode12mActive | Self::Timecode309m
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Timecode12mInactive | Self::Timecode12mActive | Self::Timecode309m => "timecode",
            Self::Metadata => "metadata",
            Self::Picture => "picture",
            Self::Sound => "sound",
            Self::Data => "data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition_key(kind: u8, status: u8) -> Ul {
        let mut k = [0u8; 16];
        k[..13].copy_from_slice(&PARTITION_PACK_PREFIX);
        k[13] = kind;
        k[14] = status;
        Ul(k)
    }

    #[test]
    fn test_partition_keys() {
        assert_eq!(partition_key(0x02, 0x04).kind(), KeyKind::PartitionPack);
        assert!(partition_key(0x02, 0x01).is_header_partition_pack());
        assert!(partition_key(0x03, 0x02).is_body_partition_pack());
        assert!(partition_key(0x04, 0x04).is_footer_partition_pack());
        // status byte out of range
        assert!(!partition_key(0x02, 0x05).is_partition_pack());
        assert_eq!(partition_key(0x05, 0x01).kind(), KeyKind::PrimerPack);
        assert_eq!(partition_key(0x11, 0x01).kind(), KeyKind::RandomIndexPack);
    }

    #[test]
    fn test_essence_element_key() {
        let key = Ul([
            0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x15, 0x01,
            0x05, 0x01,
        ]);
        assert_eq!(key.kind(), KeyKind::EssenceElement(0x1501_0501));

        let mut system = key.0;
        system[4] = 0x02;
        system[5] = 0x05;
        system[12] = 0x14;
        assert_eq!(Ul(system).kind(), KeyKind::SystemItem);
    }

    #[test]
    fn test_fill_ignores_version() {
        let mut fill = FILL_KEY;
        fill[7] = 0x02;
        assert_eq!(Ul(fill).kind(), KeyKind::Fill);
    }

    #[test]
    fn test_metadata_keys() {
        let mut k = [0u8; 16];
        k[..13].copy_from_slice(&METADATA_PREFIX);
        k[13] = 0x01;
        k[14] = 0x2f;
        assert_eq!(Ul(k).kind(), KeyKind::Metadata(0x012f));

        let mut dm = [0u8; 16];
        dm[..12].copy_from_slice(&DESCRIPTIVE_METADATA_PREFIX);
        dm[12] = 0x01;
        dm[15] = 0x02;
        assert_eq!(
            Ul(dm).kind(),
            KeyKind::DescriptiveMetadata {
                scheme: 0x01,
                set_type: 0x02
            }
        );
    }

    #[test]
    fn test_track_type_roundtrip_through_label() {
        for t in [TrackType::Picture, TrackType::Sound, TrackType::Timecode12mActive] {
            let mut ul = t.data_definition().unwrap();
            ul.0[7] = 0x05;
            assert_eq!(TrackType::from_data_definition(&ul), t);
        }
        assert_eq!(TrackType::from_data_definition(&Ul::default()), TrackType::Unknown);
        assert!(TrackType::Sound.is_essence());
        assert!(!TrackType::Timecode309m.is_essence());
    }

    #[test]
    fn test_umid_string() {
        let mut raw = [0u8; 32];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        let umid = Umid(raw);
        let text = umid.to_string();
        assert!(text.starts_with("urn:smpte:umid:00010203.04050607"));
        assert_eq!(text.parse::<Umid>().unwrap(), umid);
        assert!("urn:smpte:umid:0102".parse::<Umid>().is_err());
    }
}
