//! Local set decoding of structural and descriptive metadata.

use bytes::Bytes;

use super::sets::{MetadataObject, SetType};
use super::{DescriptiveSet, MetadataEntry, ResolveState};
use crate::error::{Error, Result};
use crate::klv::{KlvPacket, LocalSetIter, LocalTag};
use crate::primer::PrimerPack;
use crate::ul::{Ul, Uuid};

const TAG_INSTANCE_UID: u16 = 0x3c0a;
const TAG_GENERATION_UID: u16 = 0x0102;

/// Local tags at or above this value are assigned per file by the primer
const FIRST_DYNAMIC_TAG: u16 = 0x8000;

/// A tag kept undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherTag {
    pub tag: u16,
    /// Label from the primer, when it has one for this tag
    pub ul: Option<Ul>,
    pub value: Bytes,
}

impl OtherTag {
    fn new(tag: &LocalTag<'_>, primer: &PrimerPack) -> Self {
        Self {
            tag: tag.tag,
            ul: primer.resolve(tag.tag).copied(),
            value: Bytes::copy_from_slice(tag.value),
        }
    }
}

/// Decode a structural metadata set.
///
/// Returns `Ok(None)` for set types that are not decoded; such sets are
/// skipped by the demuxer.
pub fn parse_metadata_set(
    set_type: u16,
    primer: &PrimerPack,
    klv: &KlvPacket,
) -> Result<Option<MetadataEntry>> {
    let Some(mut object) = MetadataObject::for_set_type(SetType::from(set_type)) else {
        tracing::debug!(set_type = format!("{set_type:#06x}"), offset = klv.offset, "unhandled metadata set");
        return Ok(None);
    };

    let mut instance_uid = Uuid::default();
    let mut generation_uid = Uuid::default();
    let mut other_tags = Vec::new();

    for tag in LocalSetIter::new(klv.data(), klv.payload_offset()) {
        let tag = tag?;
        match tag.tag {
            TAG_INSTANCE_UID => instance_uid = tag.reader().uuid()?,
            TAG_GENERATION_UID => generation_uid = tag.reader().uuid()?,
            t if t >= FIRST_DYNAMIC_TAG => {
                if primer.resolve(t).is_none() {
                    tracing::warn!(tag = format!("{t:#06x}"), offset = tag.offset, "dynamic tag missing from primer");
                }
                other_tags.push(OtherTag::new(&tag, primer));
            }
            _ => {
                if !object.read_tag(&tag)? {
                    tracing::trace!(tag = format!("{:#06x}", tag.tag), set = object.name(), "unknown local tag");
                    other_tags.push(OtherTag::new(&tag, primer));
                }
            }
        }
    }

    if instance_uid.is_zero() {
        return Err(Error::malformed(
            klv.offset,
            format!("{} without instance UID", object.name()),
        ));
    }

    Ok(Some(MetadataEntry {
        instance_uid,
        generation_uid,
        offset: klv.offset,
        set_type,
        object,
        other_tags,
        state: ResolveState::Unresolved,
    }))
}

/// Decode a descriptive metadata set. The content is kept as opaque tags.
pub fn parse_descriptive_set(
    scheme: u8,
    set_type: u32,
    primer: &PrimerPack,
    klv: &KlvPacket,
) -> Result<DescriptiveSet> {
    let mut instance_uid = Uuid::default();
    let mut tags = Vec::new();

    for tag in LocalSetIter::new(klv.data(), klv.payload_offset()) {
        let tag = tag?;
        if tag.tag == TAG_INSTANCE_UID {
            instance_uid = tag.reader().uuid()?;
        } else {
            tags.push(OtherTag::new(&tag, primer));
        }
    }

    if instance_uid.is_zero() {
        return Err(Error::malformed(
            klv.offset,
            "descriptive metadata without instance UID",
        ));
    }

    Ok(DescriptiveSet {
        scheme,
        set_type,
        instance_uid,
        offset: klv.offset,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::sets::{ComponentKind, TrackKind};
    use std::collections::HashMap;

    fn local_set(items: &[(u16, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, value) in items {
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&(value.len() as u16).to_be_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    fn klv(payload: Vec<u8>) -> KlvPacket {
        KlvPacket {
            offset: 1000,
            length: payload.len() as u64,
            data_offset: 20,
            payload: Some(payload.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_timeline_track() {
        let mut rate = Vec::new();
        rate.extend_from_slice(&25i32.to_be_bytes());
        rate.extend_from_slice(&1i32.to_be_bytes());
        let payload = local_set(&[
            (0x3c0a, &[1; 16]),
            (0x4801, &2u32.to_be_bytes()),
            (0x4804, &0x1501_0501u32.to_be_bytes()),
            (0x4803, &[9; 16]),
            (0x4b01, &rate),
            (0x4b02, &0i64.to_be_bytes()),
            (0x4802, &[0, b'V', 0, 0]),
        ]);
        let entry = parse_metadata_set(0x013b, &PrimerPack::default(), &klv(payload))
            .unwrap()
            .unwrap();
        assert_eq!(entry.instance_uid, Uuid([1; 16]));
        assert_eq!(entry.offset, 1000);
        match entry.object {
            MetadataObject::Track(t) => {
                assert_eq!(t.kind, TrackKind::Timeline);
                assert_eq!(t.track_id, 2);
                assert_eq!(t.track_number, 0x1501_0501);
                assert_eq!(t.sequence_uid, Uuid([9; 16]));
                assert_eq!(t.edit_rate.n, 25);
                assert_eq!(t.name.as_deref(), Some("V"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_dynamic_tags_resolved_through_primer() {
        let primer = PrimerPack {
            offset: 0,
            mappings: HashMap::from([(0x8001, Ul([0x06; 16]))]),
        };
        let payload = local_set(&[
            (0x3c0a, &[1; 16]),
            (0x8001, &[0xab, 0xcd]),
            (0x1502, &25u16.to_be_bytes()),
        ]);
        let entry = parse_metadata_set(0x0114, &primer, &klv(payload))
            .unwrap()
            .unwrap();
        assert_eq!(entry.other_tags.len(), 1);
        assert_eq!(entry.other_tags[0].ul, Some(Ul([0x06; 16])));
        assert_eq!(&entry.other_tags[0].value[..], &[0xab, 0xcd]);
        match entry.object {
            MetadataObject::Component(c) => match c.kind {
                ComponentKind::Timecode(tc) => assert_eq!(tc.rounded_timecode_base, 25),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_set_type_skipped() {
        let payload = local_set(&[(0x3c0a, &[1; 16])]);
        assert!(parse_metadata_set(0x7f00, &PrimerPack::default(), &klv(payload))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_instance_uid_rejected() {
        let payload = local_set(&[(0x4801, &2u32.to_be_bytes())]);
        assert!(parse_metadata_set(0x013b, &PrimerPack::default(), &klv(payload)).is_err());
    }

    #[test]
    fn test_truncated_tag_rejected() {
        let mut payload = local_set(&[(0x3c0a, &[1; 16])]);
        payload.extend_from_slice(&[0x48, 0x01, 0x00, 0x04, 0x00]);
        assert!(parse_metadata_set(0x013b, &PrimerPack::default(), &klv(payload)).is_err());
    }
}
