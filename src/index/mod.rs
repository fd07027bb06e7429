//! Index table segments and the lookups built on them.
//!
//! An index table maps edit-unit positions of one essence container
//! (BodySID) to stream offsets, either with a constant byte count per edit
//! unit or with an explicit entry per edit unit. Segments are staged while
//! the file is scanned and folded into per-(BodySID, IndexSID) tables on
//! demand.

mod lookup;
mod table;

pub use lookup::{find_closest_offset, find_offset, IndexLookup};
pub use table::{IndexTable, IndexTables};

use crate::error::{Error, Result};
use crate::klv::{KlvPacket, LocalSetIter};
use crate::time::Rational;
use crate::ul::Uuid;

/// Entry flag: random access point
pub const FLAG_KEY_FRAME: u8 = 0x80;

/// Entry flag: the key frame offset field must not be used
pub const FLAG_NO_KEY_FRAME_OFFSET: u8 = 0x08;

// local tags
const TAG_INSTANCE_UID: u16 = 0x3c0a;
const TAG_EDIT_RATE: u16 = 0x3f0b;
const TAG_START_POSITION: u16 = 0x3f0c;
const TAG_DURATION: u16 = 0x3f0d;
const TAG_EDIT_UNIT_BYTE_COUNT: u16 = 0x3f05;
const TAG_INDEX_SID: u16 = 0x3f06;
const TAG_BODY_SID: u16 = 0x3f07;
const TAG_SLICE_COUNT: u16 = 0x3f08;
const TAG_POS_TABLE_COUNT: u16 = 0x3f0e;
const TAG_DELTA_ENTRIES: u16 = 0x3f09;
const TAG_INDEX_ENTRIES: u16 = 0x3f0a;

/// Which delta entry of an interleaved index describes a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaId {
    /// Not determined yet; inferred from the first essence offset seen
    #[default]
    Unknown,
    /// No delta entry applies
    Ignore,
    Entry(usize),
}

/// Position to offset mapping for one edit unit
///
/// Returned by the index lookups and stored in each track's fallback cache.
/// An `offset` of 0 marks an unused cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditEntry {
    /// Header-relative offset of the essence
    pub offset: u64,
    /// Presentation position in edit units, `None` when unknown
    pub pts: Option<u64>,
    /// Decode position in edit units
    pub dts: u64,
    /// Edit units covered by this entry
    pub duration: u64,
    pub keyframe: bool,
    pub initialized: bool,
    /// Byte size, for clip and custom wrapping
    pub size: u64,
}

impl Default for EditEntry {
    fn default() -> Self {
        Self {
            offset: 0,
            pts: None,
            dts: 0,
            duration: 1,
            keyframe: true,
            initialized: false,
            size: 0,
        }
    }
}

/// One entry of an explicit index segment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexEntry {
    pub temporal_offset: i8,
    pub key_frame_offset: i8,
    pub flags: u8,
    pub stream_offset: u64,
    pub slice_offsets: Vec<u32>,
    pub pos_table: Vec<Rational>,
}

impl IndexEntry {
    pub fn is_keyframe(&self) -> bool {
        self.flags & FLAG_KEY_FRAME != 0
    }
}

/// Describes one element inside an interleaved content package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeltaEntry {
    /// -1 marks the element using temporal reordering
    pub pos_table_index: i8,
    pub slice: u8,
    pub element_delta: u32,
}

/// Decoded index table segment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexTableSegment {
    pub instance_id: Uuid,
    pub index_edit_rate: Rational,
    pub index_start_position: u64,
    /// 0 means open-ended
    pub index_duration: u64,
    /// 0 for variable-size edit units
    pub edit_unit_byte_count: u32,
    pub index_sid: u32,
    pub body_sid: u32,
    pub slice_count: u8,
    pub pos_table_count: u8,
    pub delta_entries: Vec<DeltaEntry>,
    pub entries: Vec<IndexEntry>,
    /// Stream offset of the first edit unit covered
    pub segment_start_offset: u64,
}

impl IndexTableSegment {
    /// Parse a segment from a filled KLV packet.
    pub fn parse(klv: &KlvPacket) -> Result<Self> {
        let mut segment = Self::default();
        let mut entries_tag = None;

        for tag in LocalSetIter::new(klv.data(), klv.payload_offset()) {
            let tag = tag?;
            let mut r = tag.reader();
            match tag.tag {
                TAG_INSTANCE_UID => segment.instance_id = r.uuid()?,
                TAG_EDIT_RATE => {
                    segment.index_edit_rate = Rational::new(r.i32()?, r.i32()?);
                }
                TAG_START_POSITION => segment.index_start_position = r.i64()?.max(0) as u64,
                TAG_DURATION => segment.index_duration = r.i64()?.max(0) as u64,
                TAG_EDIT_UNIT_BYTE_COUNT => segment.edit_unit_byte_count = r.u32()?,
                TAG_INDEX_SID => segment.index_sid = r.u32()?,
                TAG_BODY_SID => segment.body_sid = r.u32()?,
                TAG_SLICE_COUNT => segment.slice_count = r.u8()?,
                TAG_POS_TABLE_COUNT => segment.pos_table_count = r.u8()?,
                TAG_DELTA_ENTRIES => {
                    for item in r.batch(6)? {
                        segment.delta_entries.push(DeltaEntry {
                            pos_table_index: item[0] as i8,
                            slice: item[1],
                            element_delta: u32::from_be_bytes([item[2], item[3], item[4], item[5]]),
                        });
                    }
                }
                // needs slice and pos table counts, which may come later
                TAG_INDEX_ENTRIES => entries_tag = Some(tag),
                _ => {}
            }
        }

        if let Some(tag) = entries_tag {
            let slices = segment.slice_count as usize;
            let positions = segment.pos_table_count as usize;
            let item_len = 11 + 4 * slices + 8 * positions;
            let mut r = tag.reader();
            for item in r.batch(item_len)? {
                let mut ir = crate::klv::FieldReader::new(item, tag.offset);
                let mut entry = IndexEntry {
                    temporal_offset: ir.i8()?,
                    key_frame_offset: ir.i8()?,
                    flags: ir.u8()?,
                    stream_offset: ir.u64()?,
                    ..Default::default()
                };
                for _ in 0..slices {
                    entry.slice_offsets.push(ir.u32()?);
                }
                for _ in 0..positions {
                    entry.pos_table.push(Rational::new(ir.i32()?, ir.i32()?));
                }
                segment.entries.push(entry);
            }
        }

        if segment.edit_unit_byte_count == 0 && segment.entries.is_empty() {
            tracing::warn!(
                offset = klv.offset,
                body_sid = segment.body_sid,
                "index segment has neither entries nor a constant edit unit size"
            );
        }
        for delta in &segment.delta_entries {
            if delta.slice as usize > segment.slice_count as usize {
                return Err(Error::malformed(
                    klv.offset,
                    format!(
                        "delta entry slice {} exceeds slice count {}",
                        delta.slice, segment.slice_count
                    ),
                ));
            }
        }

        segment.segment_start_offset = if segment.is_constant() {
            segment
                .index_start_position
                .saturating_mul(u64::from(segment.edit_unit_byte_count))
        } else {
            segment.entries.first().map_or(0, |e| e.stream_offset)
        };

        Ok(segment)
    }

    /// Constant byte count per edit unit and no explicit entries.
    pub fn is_constant(&self) -> bool {
        self.edit_unit_byte_count != 0 && self.entries.is_empty()
    }

    /// True if this segment covers `position`.
    pub fn covers(&self, position: u64) -> bool {
        position >= self.index_start_position
            && (self.index_duration == 0
                || position < self.index_start_position + self.index_duration)
    }

    /// Ordering key used to keep segments sorted.
    pub fn sort_key(&self) -> (u32, u32, u64) {
        (self.body_sid, self.index_sid, self.index_start_position)
    }

    /// Number of edit units from `position` to the end of the segment,
    /// capped at `limit`.
    pub(crate) fn units_until_end(&self, position: u64, limit: u64) -> u64 {
        if self.index_duration == 0 {
            return limit;
        }
        (self.index_start_position + self.index_duration)
            .saturating_sub(position)
            .min(limit)
    }
}

/// Segment identity that tolerates FFmpeg's instance UID reuse.
///
/// FFmpeg's MXF muxer (before March 2022) wrote one instance UID for every
/// index segment of a file. Two segments are therefore only treated as the
/// same one when BodySID, IndexSID and start position match *and* the
/// instance UIDs are equal; the UID never participates in ordering.
pub fn is_same_segment(a: &IndexTableSegment, b: &IndexTableSegment) -> bool {
    a.sort_key() == b.sort_key() && a.instance_id == b.instance_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(tag: u16, value: &[u8]) -> Vec<u8> {
        let mut out = tag.to_be_bytes().to_vec();
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    fn klv(payload: Vec<u8>) -> KlvPacket {
        KlvPacket {
            length: payload.len() as u64,
            data_offset: 20,
            payload: Some(payload.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_explicit_segment() {
        let mut payload = Vec::new();
        payload.extend(local(TAG_INDEX_SID, &2u32.to_be_bytes()));
        payload.extend(local(TAG_BODY_SID, &1u32.to_be_bytes()));
        payload.extend(local(TAG_START_POSITION, &0i64.to_be_bytes()));
        payload.extend(local(TAG_DURATION, &2i64.to_be_bytes()));

        // entries before the slice count: parsed after the whole set is read
        let mut entries = Vec::new();
        entries.extend_from_slice(&2u32.to_be_bytes());
        entries.extend_from_slice(&15u32.to_be_bytes());
        for (t, flags, so, slice) in [(0i8, 0x80u8, 0u64, 100u32), (-1, 0x00, 500, 120)] {
            entries.push(t as u8);
            entries.push(0);
            entries.push(flags);
            entries.extend_from_slice(&so.to_be_bytes());
            entries.extend_from_slice(&slice.to_be_bytes());
        }
        payload.extend(local(TAG_INDEX_ENTRIES, &entries));
        payload.extend(local(TAG_SLICE_COUNT, &[1]));

        let mut deltas = Vec::new();
        deltas.extend_from_slice(&2u32.to_be_bytes());
        deltas.extend_from_slice(&6u32.to_be_bytes());
        deltas.extend_from_slice(&[0xff, 0, 0, 0, 0, 0]);
        deltas.extend_from_slice(&[0, 1, 0, 0, 0, 4]);
        payload.extend(local(TAG_DELTA_ENTRIES, &deltas));

        let seg = IndexTableSegment::parse(&klv(payload)).unwrap();
        assert_eq!((seg.body_sid, seg.index_sid), (1, 2));
        assert_eq!(seg.entries.len(), 2);
        assert!(seg.entries[0].is_keyframe());
        assert_eq!(seg.entries[1].temporal_offset, -1);
        assert_eq!(seg.entries[1].slice_offsets, vec![120]);
        assert_eq!(seg.delta_entries[0].pos_table_index, -1);
        assert_eq!(seg.delta_entries[1].element_delta, 4);
        assert!(!seg.is_constant());
        assert_eq!(seg.segment_start_offset, 0);
        assert!(seg.covers(1));
        assert!(!seg.covers(2));
    }

    #[test]
    fn test_parse_constant_segment() {
        let mut payload = Vec::new();
        payload.extend(local(TAG_EDIT_UNIT_BYTE_COUNT, &4096u32.to_be_bytes()));
        payload.extend(local(TAG_START_POSITION, &10i64.to_be_bytes()));
        let seg = IndexTableSegment::parse(&klv(payload)).unwrap();
        assert!(seg.is_constant());
        assert_eq!(seg.segment_start_offset, 40960);
        // open-ended
        assert!(seg.covers(1_000_000));
        assert!(!seg.covers(9));
    }

    #[test]
    fn test_entry_length_must_match_counts() {
        let mut entries = Vec::new();
        entries.extend_from_slice(&1u32.to_be_bytes());
        entries.extend_from_slice(&15u32.to_be_bytes());
        entries.extend_from_slice(&[0; 15]);
        // no slice count declared, so items must be 11 bytes
        let payload = local(TAG_INDEX_ENTRIES, &entries);
        assert!(IndexTableSegment::parse(&klv(payload)).is_err());
    }

    #[test]
    fn test_same_segment_needs_matching_uid() {
        let a = IndexTableSegment {
            body_sid: 1,
            index_sid: 2,
            index_start_position: 0,
            instance_id: Uuid([1; 16]),
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(is_same_segment(&a, &b));
        b.instance_id = Uuid([2; 16]);
        assert!(!is_same_segment(&a, &b));
        b.instance_id = a.instance_id;
        b.index_start_position = 25;
        assert!(!is_same_segment(&a, &b));
    }
}
