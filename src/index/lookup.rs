//! Position to offset and offset to position lookups.

use super::{DeltaId, EditEntry, IndexTable, IndexTables, FLAG_NO_KEY_FRAME_OFFSET};
use crate::error::{Error, Result};
use crate::essence::EssenceTrack;
use crate::partition::{Partition, PartitionTable};

/// Look up `position` in a track's fallback cache.
///
/// When `keyframe` is set and the entry is not a keyframe, walks back to the
/// closest keyframe, stopping at the first unused slot. Updates `position`
/// to the entry found.
pub fn find_offset(offsets: &[EditEntry], position: &mut u64, keyframe: bool) -> Option<u64> {
    let idx = usize::try_from(*position).ok()?;
    let entry = offsets.get(idx)?;

    if entry.offset != 0 && (!keyframe || entry.keyframe) {
        return Some(entry.offset);
    }
    if entry.offset == 0 {
        return None;
    }

    for current in (0..idx).rev() {
        let e = &offsets[current];
        if e.offset == 0 {
            break;
        }
        if e.keyframe {
            *position = current as u64;
            return Some(e.offset);
        }
    }
    None
}

/// Closest cached entry at or before `position`.
///
/// `position` is clamped to the cache size first; unused slots and (when
/// `keyframe` is set) non-keyframes are skipped.
pub fn find_closest_offset(
    offsets: &[EditEntry],
    position: &mut u64,
    keyframe: bool,
) -> Option<u64> {
    let last = offsets.len().checked_sub(1)?;
    let start = usize::try_from(*position).map_or(last, |p| p.min(last));

    let found = (0..=start)
        .rev()
        .find(|i| offsets[*i].offset != 0 && (!keyframe || offsets[*i].keyframe))?;
    *position = found as u64;
    Some(offsets[found].offset)
}

/// Index lookups over the collected tables and known partitions
pub struct IndexLookup<'a> {
    pub tables: &'a IndexTables,
    pub partitions: &'a PartitionTable,
    /// Use raw temporal offsets instead of the reverse table
    pub temporal_order_misuse: bool,
}

impl<'a> IndexLookup<'a> {
    pub fn new(tables: &'a IndexTables, partitions: &'a PartitionTable) -> Self {
        Self {
            tables,
            partitions,
            temporal_order_misuse: false,
        }
    }

    pub fn with_temporal_order_misuse(mut self, misuse: bool) -> Self {
        self.temporal_order_misuse = misuse;
        self
    }

    fn table_for(&self, track: &EssenceTrack) -> Option<&'a IndexTable> {
        self.tables.table(track.body_sid, track.index_sid)
    }

    /// Find the edit entry of `track` at `position`.
    ///
    /// With `keyframe` set, the supporting keyframe is returned instead. For
    /// frame wrapping the offset is the essence KLV's; for clip wrapping it
    /// points at the essence bytes and `size` gives their length.
    pub fn find_edit_entry(
        &self,
        track: &EssenceTrack,
        position: u64,
        keyframe: bool,
    ) -> Result<EditEntry> {
        let mut position = position;
        let mut entry = EditEntry::default();

        let mut cached = position;
        if find_offset(&track.offsets, &mut cached, keyframe).is_some() {
            tracing::trace!(track_id = track.track_id, position = cached, "found entry in track offsets");
            if let Some(hit) = usize::try_from(cached).ok().and_then(|i| track.offsets.get(i)) {
                return Ok(*hit);
            }
        }

        let table = self.table_for(track).ok_or_else(|| {
            Error::not_found(format!(
                "index table for body_sid {} index_sid {}",
                track.body_sid, track.index_sid
            ))
        })?;

        // A backwards keyframe search can cross into earlier segments; each
        // hop moves strictly backwards so the segment count bounds it.
        let mut hops = 0;
        let segment = 'search: loop {
            hops += 1;
            if hops > table.segments.len() + 1 {
                return Err(Error::not_found("keyframe search did not converge"));
            }

            let segment = table.segment_for_position(position).ok_or_else(|| {
                Error::not_found(format!("index segment for position {position}"))
            })?;

            if !keyframe || segment.is_constant() {
                break segment;
            }

            let start = segment.index_start_position;
            let mut candidate = position;
            loop {
                let e = usize::try_from(candidate - start)
                    .ok()
                    .and_then(|i| segment.entries.get(i))
                    .ok_or_else(|| {
                        Error::not_found(format!("index entry for position {candidate}"))
                    })?;

                if e.is_keyframe() {
                    position = candidate;
                    break 'search segment;
                }
                if e.key_frame_offset != 0 && e.flags & FLAG_NO_KEY_FRAME_OFFSET == 0 {
                    let target = candidate as i64 + i64::from(e.key_frame_offset);
                    position = u64::try_from(target).map_err(|_| {
                        Error::not_found(format!("key frame offset before start at {candidate}"))
                    })?;
                    if position < start {
                        continue 'search;
                    }
                    break 'search segment;
                }
                if candidate == 0 {
                    position = 0;
                    break 'search segment;
                }
                if candidate == start {
                    position = candidate - 1;
                    continue 'search;
                }
                candidate -= 1;
            }
        };

        let stream_offset = if segment.is_constant() {
            let eubc = u64::from(segment.edit_unit_byte_count);
            let mut so = position.saturating_mul(eubc);
            match track.delta_id {
                DeltaId::Entry(id) if id < segment.delta_entries.len() => {
                    so += u64::from(segment.delta_entries[id].element_delta);
                }
                _ if track.min_edit_units != 1 => {
                    entry.duration =
                        segment.units_until_end(position, u64::from(track.min_edit_units));
                    entry.size = eubc * entry.duration;
                }
                _ => entry.size = eubc,
            }
            entry.pts = Some(position);
            so
        } else if !segment.entries.is_empty() {
            let e = usize::try_from(position - segment.index_start_position)
                .ok()
                .and_then(|i| segment.entries.get(i))
                .ok_or_else(|| Error::not_found(format!("index entry for position {position}")))?;
            let mut so = e.stream_offset;

            if let DeltaId::Entry(id) = track.delta_id {
                if let Some(delta) = segment.delta_entries.get(id) {
                    if delta.slice > 0 {
                        so += u64::from(
                            e.slice_offsets
                                .get(delta.slice as usize - 1)
                                .copied()
                                .unwrap_or(0),
                        );
                    }
                    so += u64::from(delta.element_delta);
                    if delta.pos_table_index == -1 {
                        entry.keyframe = e.is_keyframe();
                    }
                }
            }

            let reordered = matches!(
                (table.reordered_delta_entry, track.delta_id),
                (Some(r), DeltaId::Entry(id)) if r == id
            );
            entry.pts = if reordered {
                if position as usize >= table.reverse_temporal_offsets.len() {
                    tracing::warn!(
                        position,
                        max = table.reverse_temporal_offsets.len(),
                        "can't apply temporal offset"
                    );
                }
                let shift = if self.temporal_order_misuse {
                    e.temporal_offset
                } else {
                    table.reverse_temporal_offset(position)
                };
                position.checked_add_signed(i64::from(shift))
            } else {
                Some(position)
            };
            so
        } else {
            return Err(Error::not_found(
                "index segment without entries nor constant edit unit size",
            ));
        };

        let partition = self
            .partitions
            .for_stream_offset(track.body_sid, stream_offset)
            .ok_or_else(|| {
                Error::not_found(format!("partition for stream offset {stream_offset}"))
            })?;

        entry.offset = partition.essence_start() + (stream_offset - partition.pack.body_offset);
        entry.dts = position;
        entry.initialized = true;
        tracing::trace!(
            track_id = track.track_id,
            position,
            stream_offset,
            offset = entry.offset,
            "resolved edit entry"
        );
        Ok(entry)
    }

    /// Find the entry of `track` located at header-relative `offset`, which
    /// must lie in `partition` (the current one).
    ///
    /// Infers the track's delta entry when it is still unknown; a failed
    /// inference pins it to [`DeltaId::Ignore`].
    pub fn find_entry_for_offset(
        &self,
        partition: Option<&Partition>,
        track: &mut EssenceTrack,
        offset: u64,
    ) -> Result<EditEntry> {
        if let Some(hit) = track
            .offsets
            .iter()
            .find(|e| e.initialized && e.offset != 0 && e.offset == offset)
        {
            return Ok(*hit);
        }

        let table = self
            .table_for(track)
            .filter(|t| !t.segments.is_empty())
            .ok_or_else(|| Error::not_found("index table or entries to search in"))?;
        let partition = partition.ok_or_else(|| Error::not_found("current partition"))?;

        let stream_offset = offset
            .checked_sub(partition.essence_start())
            .map(|o| o + partition.pack.body_offset)
            .ok_or_else(|| Error::not_found(format!("offset {offset} before essence start")))?;

        let segment = table
            .segments
            .iter()
            .rev()
            .find(|s| stream_offset >= s.segment_start_offset)
            .unwrap_or(&table.segments[0]);

        let mut entry = EditEntry::default();
        let mut index_entry = None;
        let cp_offset;
        let position;

        if segment.edit_unit_byte_count != 0 {
            let eubc = u64::from(segment.edit_unit_byte_count);
            cp_offset = stream_offset % eubc;
            position = stream_offset / eubc;
            let start = segment.index_start_position;
            if position < start
                || (segment.index_duration != 0 && position > start + segment.index_duration)
            {
                return Err(Error::not_found("offset exceeds index segment limits"));
            }
            if track.min_edit_units != 1 {
                entry.duration = segment.units_until_end(position, u64::from(track.min_edit_units));
                entry.size = eubc * entry.duration;
            } else {
                entry.size = eubc;
            }
        } else {
            let mut found = None;
            for (i, e) in segment.entries.iter().enumerate() {
                if e.stream_offset == stream_offset {
                    found = Some(i);
                    break;
                }
                if e.stream_offset > stream_offset && i > 0 {
                    found = Some(i - 1);
                    break;
                }
            }
            let i = found
                .ok_or_else(|| Error::not_found("offset beyond the entries of the index segment"))?;
            let e = &segment.entries[i];
            cp_offset = stream_offset - e.stream_offset;
            position = segment.index_start_position + i as u64;
            index_entry = Some(e);
        }

        let mut delta_entry = None;
        if track.delta_id == DeltaId::Unknown {
            if segment.delta_entries.is_empty() {
                tracing::debug!(track_id = track.track_id, "index table has no delta entries");
                track.delta_id = DeltaId::Ignore;
            } else {
                let matched = segment.delta_entries.iter().position(|d| {
                    let slice_offset = match (index_entry, d.slice) {
                        (Some(e), s) if s > 0 => e
                            .slice_offsets
                            .get(s as usize - 1)
                            .copied()
                            .map_or(0, u64::from),
                        _ => 0,
                    };
                    cp_offset == slice_offset + u64::from(d.element_delta)
                });
                match matched {
                    Some(id) => {
                        tracing::debug!(track_id = track.track_id, delta = id, "matched delta entry");
                        track.delta_id = DeltaId::Entry(id);
                        delta_entry = segment.delta_entries.get(id);
                    }
                    None => {
                        tracing::warn!(
                            track_id = track.track_id,
                            "couldn't match delta id, ignoring it from now on"
                        );
                        track.delta_id = DeltaId::Ignore;
                    }
                }
            }
        } else if let DeltaId::Entry(id) = track.delta_id {
            delta_entry = segment.delta_entries.get(id);
        }

        match (index_entry, delta_entry) {
            (Some(e), Some(d)) if d.pos_table_index == -1 => {
                entry.keyframe = e.is_keyframe();
                let shift = if self.temporal_order_misuse {
                    e.temporal_offset
                } else {
                    table.reverse_temporal_offset(position)
                };
                entry.pts = position.checked_add_signed(i64::from(shift));
            }
            _ => entry.pts = Some(position),
        }

        entry.initialized = true;
        entry.offset = offset;
        entry.dts = position;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essence::{EssenceTrack, Wrapping};
    use crate::index::{DeltaEntry, IndexEntry, IndexTableSegment, FLAG_KEY_FRAME};
    use crate::partition::{Partition, PartitionPack};

    fn cached(offset: u64, keyframe: bool) -> EditEntry {
        EditEntry {
            offset,
            keyframe,
            initialized: offset != 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_find_offset_walks_to_keyframe() {
        let offsets = vec![cached(100, true), cached(200, false), cached(300, false)];
        let mut pos = 2;
        assert_eq!(find_offset(&offsets, &mut pos, false), Some(300));
        assert_eq!(pos, 2);
        assert_eq!(find_offset(&offsets, &mut pos, true), Some(100));
        assert_eq!(pos, 0);
        let mut beyond = 3;
        assert_eq!(find_offset(&offsets, &mut beyond, false), None);
    }

    #[test]
    fn test_find_closest_offset_clamps() {
        let offsets = vec![cached(100, true), cached(0, false), cached(300, false)];
        let mut pos = 10;
        assert_eq!(find_closest_offset(&offsets, &mut pos, false), Some(300));
        assert_eq!(pos, 2);
        let mut pos = 1;
        assert_eq!(find_closest_offset(&offsets, &mut pos, false), Some(100));
        assert_eq!(pos, 0);
        assert_eq!(find_closest_offset(&[], &mut pos, false), None);
    }

    fn partitions(eco: u64) -> PartitionTable {
        let mut table = PartitionTable::new();
        let mut pack = PartitionPack::stub(1000, 1);
        pack.index_sid = 2;
        let mut p = Partition::new(pack);
        p.essence_container_offset = eco;
        table.insert(p);
        table
    }

    fn track() -> EssenceTrack {
        let mut t = EssenceTrack::new(1, 0x1501_0501, 1, 2);
        t.wrapping = Wrapping::Frame;
        t
    }

    fn explicit_segment(flags: &[u8], offsets: &[i8]) -> IndexTableSegment {
        IndexTableSegment {
            body_sid: 1,
            index_sid: 2,
            index_duration: flags.len() as u64,
            delta_entries: vec![DeltaEntry {
                pos_table_index: -1,
                slice: 0,
                element_delta: 0,
            }],
            entries: flags
                .iter()
                .zip(offsets)
                .enumerate()
                .map(|(i, (f, t))| IndexEntry {
                    flags: *f,
                    temporal_offset: *t,
                    stream_offset: i as u64 * 1000,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_keyframe_search_and_round_trip() {
        let mut flags = [0u8; 12];
        for k in [0, 5, 10] {
            flags[k] = FLAG_KEY_FRAME;
        }
        let mut tables = IndexTables::new();
        tables.add_segment(explicit_segment(&flags, &[0; 12]));
        tables.collect_pending();
        let parts = partitions(200);
        let lookup = IndexLookup::new(&tables, &parts);
        let mut t = track();

        let key = lookup.find_edit_entry(&t, 7, true).unwrap();
        assert_eq!(key.dts, 5);
        assert_eq!(key.offset, 1000 + 200 + 5000);

        let exact = lookup.find_edit_entry(&t, 7, false).unwrap();
        assert_eq!(exact.dts, 7);

        let back = lookup
            .find_entry_for_offset(parts.get(1000), &mut t, exact.offset)
            .unwrap();
        assert_eq!(back.dts, 7);
        assert_eq!(t.delta_id, DeltaId::Entry(0));
    }

    #[test]
    fn test_keyframe_search_crosses_segments() {
        let mut first = explicit_segment(&[FLAG_KEY_FRAME, 0, 0, 0], &[0; 4]);
        first.instance_id = crate::ul::Uuid([1; 16]);
        let mut second = explicit_segment(&[0, 0, 0, 0], &[0; 4]);
        second.index_start_position = 4;
        for (i, e) in second.entries.iter_mut().enumerate() {
            e.stream_offset = (4 + i as u64) * 1000;
        }
        second.segment_start_offset = 4000;

        let mut tables = IndexTables::new();
        tables.add_segment(first);
        tables.add_segment(second);
        tables.collect_pending();
        let parts = partitions(0);
        let lookup = IndexLookup::new(&tables, &parts);

        let key = lookup.find_edit_entry(&track(), 6, true).unwrap();
        assert_eq!(key.dts, 0);
        assert_eq!(key.offset, 1000);
    }

    #[test]
    fn test_reordered_pts() {
        // entry 5 is shown after entry 6
        let mut flags = [0u8; 8];
        flags[0] = FLAG_KEY_FRAME;
        flags[5] = FLAG_KEY_FRAME;
        let offsets = [0, 0, 0, 0, 0, 1, -1, 0];
        let mut tables = IndexTables::new();
        tables.add_segment(explicit_segment(&flags, &offsets));
        tables.collect_pending();
        let parts = partitions(0);
        let mut t = track();
        t.delta_id = DeltaId::Entry(0);

        let lookup = IndexLookup::new(&tables, &parts);
        let five = lookup.find_edit_entry(&t, 5, false).unwrap();
        let six = lookup.find_edit_entry(&t, 6, false).unwrap();
        assert_eq!(five.pts, Some(6));
        assert_eq!(six.pts, Some(5));
        assert!(!six.keyframe);
        assert_eq!(tables.table(1, 2).unwrap().max_temporal_offset, 1);

        // the misuse branch reads raw temporal offsets
        let misuse = IndexLookup::new(&tables, &parts).with_temporal_order_misuse(true);
        assert_eq!(misuse.find_edit_entry(&t, 6, false).unwrap().pts, Some(5));
        assert_eq!(misuse.find_edit_entry(&t, 5, false).unwrap().pts, Some(6));
    }

    #[test]
    fn test_constant_segment_round_trip_with_deltas() {
        let segment = IndexTableSegment {
            body_sid: 1,
            index_sid: 2,
            edit_unit_byte_count: 2048,
            delta_entries: vec![
                DeltaEntry {
                    pos_table_index: 0,
                    slice: 0,
                    element_delta: 0,
                },
                DeltaEntry {
                    pos_table_index: 0,
                    slice: 0,
                    element_delta: 1536,
                },
            ],
            ..Default::default()
        };
        let mut tables = IndexTables::new();
        tables.add_segment(segment);
        tables.collect_pending();
        let parts = partitions(100);
        let lookup = IndexLookup::new(&tables, &parts);

        // the second element of content package 3
        let mut t = track();
        let offset = 1000 + 100 + 3 * 2048 + 1536;
        let found = lookup
            .find_entry_for_offset(parts.get(1000), &mut t, offset)
            .unwrap();
        assert_eq!(found.dts, 3);
        assert_eq!(t.delta_id, DeltaId::Entry(1));

        let forward = lookup.find_edit_entry(&t, 3, false).unwrap();
        assert_eq!(forward.offset, offset);
    }

    #[test]
    fn test_unmatched_delta_is_ignored() {
        let segment = IndexTableSegment {
            body_sid: 1,
            index_sid: 2,
            edit_unit_byte_count: 2048,
            delta_entries: vec![DeltaEntry::default()],
            ..Default::default()
        };
        let mut tables = IndexTables::new();
        tables.add_segment(segment);
        tables.collect_pending();
        let parts = partitions(0);
        let lookup = IndexLookup::new(&tables, &parts);
        let mut t = track();
        lookup
            .find_entry_for_offset(parts.get(1000), &mut t, 1000 + 2048 + 7)
            .unwrap();
        assert_eq!(t.delta_id, DeltaId::Ignore);
    }

    #[test]
    fn test_missing_table_is_not_found() {
        let tables = IndexTables::new();
        let parts = partitions(0);
        let lookup = IndexLookup::new(&tables, &parts);
        let err = lookup.find_edit_entry(&track(), 0, false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
