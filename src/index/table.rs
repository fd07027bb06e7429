use super::{is_same_segment, IndexTableSegment};

/// Highest edit unit position the reverse temporal offset table covers
const MAX_REORDERED_POSITIONS: u64 = 1 << 24;

/// All index segments of one (BodySID, IndexSID) pair
#[derive(Debug, Clone, Default)]
pub struct IndexTable {
    pub body_sid: u32,
    pub index_sid: u32,
    /// Sorted by start position
    pub segments: Vec<IndexTableSegment>,
    /// Delta entry of the element using temporal reordering
    pub reordered_delta_entry: Option<usize>,
    /// Shift from decode position to presentation position, by decode position
    pub reverse_temporal_offsets: Vec<i8>,
    pub max_temporal_offset: u32,
}

impl IndexTable {
    fn new(body_sid: u32, index_sid: u32) -> Self {
        Self {
            body_sid,
            index_sid,
            ..Default::default()
        }
    }

    /// First segment covering `position`.
    pub fn segment_for_position(&self, position: u64) -> Option<&IndexTableSegment> {
        self.segments.iter().find(|s| s.covers(position))
    }

    /// Reverse temporal offset for a decode position, 0 when out of range.
    pub fn reverse_temporal_offset(&self, position: u64) -> i8 {
        usize::try_from(position)
            .ok()
            .and_then(|p| self.reverse_temporal_offsets.get(p))
            .copied()
            .unwrap_or(0)
    }

    fn insert_segment(&mut self, segment: IndexTableSegment) {
        let at = self
            .segments
            .partition_point(|s| s.index_start_position <= segment.index_start_position);
        self.segments.insert(at, segment);
    }

    fn note_reordering(&mut self, segment: &IndexTableSegment) {
        for (didx, delta) in segment.delta_entries.iter().enumerate() {
            if delta.pos_table_index == -1 {
                match self.reordered_delta_entry {
                    Some(existing) if existing != didx => tracing::warn!(
                        body_sid = self.body_sid,
                        index_sid = self.index_sid,
                        "more than one stream uses temporal reordering ({didx} and {existing})"
                    ),
                    _ => self.reordered_delta_entry = Some(didx),
                }
            } else if delta.pos_table_index > 0 {
                tracing::warn!(
                    body_sid = self.body_sid,
                    "index table uses fractional offsets, which are not supported"
                );
            }
        }
    }

    /// Rebuild the reverse temporal offset table from every segment.
    fn build_reverse_temporal_offsets(&mut self) {
        if self.reordered_delta_entry.is_none() {
            return;
        }

        let mut rto: Vec<i8> = Vec::new();
        let mut max = 0u32;
        for s in &self.segments {
            let start = s.index_start_position;
            let stop = match start
                .checked_add(s.entries.len() as u64)
                .filter(|stop| *stop <= MAX_REORDERED_POSITIONS)
                .and_then(|stop| usize::try_from(stop).ok())
            {
                Some(stop) => stop,
                None => {
                    tracing::warn!(
                        body_sid = self.body_sid,
                        index_sid = self.index_sid,
                        start,
                        entries = s.entries.len(),
                        "reordered index segment out of range, skipping"
                    );
                    continue;
                }
            };
            if stop > rto.len() {
                rto.resize(stop, 0);
            }

            for (i, entry) in s.entries.iter().enumerate() {
                // start + i < stop, which fits in usize
                let position = start + i as u64;
                let target = position as i64 + i64::from(entry.temporal_offset);
                match usize::try_from(target).ok().filter(|t| *t < rto.len()) {
                    Some(t) => {
                        rto[t] = entry.temporal_offset.wrapping_neg();
                        if i32::from(entry.temporal_offset) > max as i32 {
                            max = entry.temporal_offset as u32;
                        }
                    }
                    None => tracing::error!(
                        entry = position,
                        temporal_offset = entry.temporal_offset,
                        max = rto.len(),
                        "temporal offset exceeds boundaries"
                    ),
                }
            }
        }
        self.reverse_temporal_offsets = rto;
        self.max_temporal_offset = max;
    }
}

/// Staged and collected index segments of a file
#[derive(Debug, Default)]
pub struct IndexTables {
    pending: Vec<IndexTableSegment>,
    tables: Vec<IndexTable>,
}

impl IndexTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.tables.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn tables(&self) -> &[IndexTable] {
        &self.tables
    }

    pub fn table(&self, body_sid: u32, index_sid: u32) -> Option<&IndexTable> {
        self.tables
            .iter()
            .find(|t| t.body_sid == body_sid && t.index_sid == index_sid)
    }

    /// Stage a segment unless it is already pending or collected.
    ///
    /// Returns false for duplicates.
    pub fn add_segment(&mut self, segment: IndexTableSegment) -> bool {
        let known = self.pending.iter().any(|s| is_same_segment(s, &segment))
            || self
                .tables
                .iter()
                .flat_map(|t| t.segments.iter())
                .any(|s| is_same_segment(s, &segment));
        if known {
            tracing::trace!(
                body_sid = segment.body_sid,
                index_sid = segment.index_sid,
                start = segment.index_start_position,
                "index segment already known"
            );
            return false;
        }

        let at = self
            .pending
            .partition_point(|s| s.sort_key() <= segment.sort_key());
        self.pending.insert(at, segment);
        true
    }

    /// Fold staged segments into their tables. A no-op when nothing is
    /// pending.
    pub fn collect_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::debug!(count = self.pending.len(), "collecting index table segments");

        let mut touched = Vec::new();
        for segment in std::mem::take(&mut self.pending) {
            let idx = match self
                .tables
                .iter()
                .position(|t| t.body_sid == segment.body_sid && t.index_sid == segment.index_sid)
            {
                Some(idx) => idx,
                None => {
                    self.tables
                        .push(IndexTable::new(segment.body_sid, segment.index_sid));
                    self.tables.len() - 1
                }
            };
            let table = &mut self.tables[idx];
            table.note_reordering(&segment);
            table.insert_segment(segment);
            if !touched.contains(&idx) {
                touched.push(idx);
            }
        }

        for idx in touched {
            self.tables[idx].build_reverse_temporal_offsets();
        }
    }
}
