//! Pull mode: reading the file on demand.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use super::{Demuxer, ReadState};
use crate::error::{Error, Result};
use crate::index::{find_closest_offset, find_offset, IndexLookup};
use crate::klv::{ber_field_size, parse_header, KlvPacket, MIN_KLV_HEADER};
use crate::partition::PartitionPack;
use crate::source::ByteSource;
use crate::ul::{KeyKind, PartitionKind, Ul};

/// Smallest possible random index pack: key, 4 byte length, one entry and
/// the trailing overall length.
const MIN_RIP_SIZE: u64 = 20;

/// Outcome of one attempt at reading footer metadata
enum FooterStep {
    Done,
    /// Try the partition at this header-relative offset instead
    Retry(u64),
    GiveUp,
}

impl<S: ByteSource> Demuxer<S> {
    /// Advance by one packet, producing zero or more events.
    pub(super) fn step(&mut self) -> Result<()> {
        self.check_flushing()?;

        if self.state == ReadState::Unknown {
            self.find_header_partition()?;
            self.pull_random_index_pack()?;
        }

        if !self.cursors.is_empty() {
            let stop = self.segment.stop;
            let done = self
                .cursors
                .iter()
                .all(|c| c.eos || stop.is_some_and(|s| c.position >= s));
            if done {
                tracing::debug!("every stream reached the end of the segment");
                return Err(Error::EndOfStream);
            }
        }

        self.pull_and_handle_klv()
    }

    /// Read the key and length of the packet at absolute `offset`.
    pub(super) fn peek_klv(&mut self, offset: u64) -> Result<KlvPacket> {
        let head = self.source.pull_range(offset, MIN_KLV_HEADER)?;
        if head.len() < MIN_KLV_HEADER {
            tracing::debug!(offset, available = head.len(), "trailing bytes too short for a KLV");
            return Err(Error::EndOfStream);
        }
        let needed = 16 + ber_field_size(head[16]).unwrap_or(1);
        let head = if needed > head.len() {
            self.source.pull_exact(offset, needed)?
        } else {
            head
        };
        parse_header(&head, offset - self.run_in)
    }

    /// Fetch the payload of `klv` unless it is already present.
    pub(super) fn fill_klv(&mut self, klv: &mut KlvPacket) -> Result<()> {
        if klv.payload.is_some() {
            return Ok(());
        }
        if klv.length == 0 {
            klv.payload = Some(Bytes::new());
            return Ok(());
        }
        if klv.length > self.config.max_klv_length {
            return Err(Error::malformed(
                klv.offset,
                format!("KLV payload of {} bytes is too large", klv.length),
            ));
        }
        let data = self
            .source
            .pull_exact(self.run_in + klv.payload_offset(), klv.length as usize)?;
        klv.payload = Some(data);
        Ok(())
    }

    /// Move the read offset past what was used of `klv`.
    pub(super) fn consume(&mut self, klv: &KlvPacket) {
        let used = if klv.consumed > 0 {
            klv.consumed
        } else {
            klv.total_size()
        };
        self.offset = self.run_in + klv.offset + used;
    }

    /// Continue reading at header-relative `offset`.
    ///
    /// Landing inside the clip wrapped essence of a single track partition
    /// resumes reading that clip.
    pub(super) fn move_to(&mut self, offset: u64) {
        self.offset = self.run_in + offset;
        self.state = ReadState::Klv;
        self.current_partition = self.partitions.containing(offset).map(|p| p.this_partition());

        let Some(p) = self
            .current_partition
            .and_then(|o| self.partitions.get_mut(o))
        else {
            return;
        };
        let non_frame = p
            .single_track
            .and_then(|t| self.essence_tracks.get(t))
            .is_some_and(|t| !t.wrapping.is_frame());
        if !non_frame {
            return;
        }
        if let Some(clip) = p.clip_klv.as_mut() {
            if offset > clip.offset && offset < clip.end_offset() {
                clip.consumed = offset - clip.offset;
                self.state = ReadState::Essence;
            }
        }
    }

    fn peek_skipping_fill(&mut self) -> Result<KlvPacket> {
        loop {
            let klv = self.peek_klv(self.offset)?;
            if !klv.key.is_fill() {
                return Ok(klv);
            }
            self.consume(&klv);
        }
    }

    /// Locate the header partition pack within the allowed run-in.
    fn find_header_partition(&mut self) -> Result<()> {
        let max_run_in = self.config.max_run_in;
        let window = usize::try_from(max_run_in).unwrap_or(usize::MAX).saturating_add(32);
        let data = match self.source.pull_range(0, window) {
            Ok(data) => data,
            Err(Error::EndOfStream) => Bytes::new(),
            Err(e) => return Err(e),
        };

        let found = data
            .windows(16)
            .enumerate()
            .take_while(|(i, _)| *i as u64 <= max_run_in)
            .find(|(i, key)| {
                Ul::from_slice(key).is_some_and(|ul| ul.is_header_partition_pack())
                    && parse_header(&data[*i..], 0).is_ok()
            })
            .map(|(i, _)| i as u64);

        let Some(run_in) = found else {
            tracing::error!(max_run_in, "no header partition pack found");
            return Err(Error::InvalidState("no header partition pack found".into()));
        };
        tracing::debug!(run_in, "found header partition pack");
        self.run_in = run_in;
        self.offset = run_in;
        self.state = ReadState::Klv;
        Ok(())
    }

    /// Read the random index pack at the end of the file, if any.
    fn pull_random_index_pack(&mut self) -> Result<()> {
        let Some(size) = self.source.size() else {
            tracing::debug!("source size unknown, not looking for a random index pack");
            return Ok(());
        };
        if size < self.run_in + MIN_RIP_SIZE {
            return Ok(());
        }

        let klv = match self.source.pull_exact(size - 4, 4) {
            Ok(tail) => {
                let length = u64::from(BigEndian::read_u32(&tail));
                if length < MIN_RIP_SIZE || length > size - self.run_in - MIN_RIP_SIZE {
                    tracing::debug!(length, "no random index pack");
                    return Ok(());
                }
                self.peek_klv(size - length)
            }
            Err(e) => Err(e),
        };

        match klv {
            Ok(mut klv) if klv.key.is_random_index_pack() => {
                if let Err(e) = self.handle_random_index_pack(&mut klv) {
                    tracing::warn!(error = %e, "ignoring invalid random index pack");
                }
            }
            Ok(klv) => tracing::debug!(key = %klv.key, "no random index pack at the end of the file"),
            Err(Error::Flushing) => return Err(Error::Flushing),
            Err(e) => tracing::warn!(error = %e, "couldn't read random index pack"),
        }
        Ok(())
    }

    /// Read the index table segments of every partition.
    ///
    /// Partitions are found from the random index pack or, without one, by
    /// walking back from the footer partition.
    pub(super) fn collect_index_table_segments(&mut self) -> Result<()> {
        self.index_table_segments_collected = true;
        let saved = (self.offset, self.current_partition, self.state);

        let result = match self.random_index_pack.as_ref() {
            Some(rip) => {
                let offsets: Vec<u64> = rip.entries.iter().map(|e| e.offset).collect();
                offsets
                    .into_iter()
                    .try_for_each(|offset| self.read_partition_header(offset).map(|_| ()))
            }
            None => self.walk_partitions_backwards(),
        };

        self.offset = saved.0;
        self.current_partition = saved.1;
        self.state = saved.2;

        match result {
            Ok(()) => {}
            Err(Error::Flushing) => return Err(Error::Flushing),
            Err(e) => tracing::warn!(error = %e, "failed to collect index table segments"),
        }
        self.index_tables.collect_pending();
        tracing::debug!(
            tables = self.index_tables.tables().len(),
            partitions = self.partitions.len(),
            "collected index table segments"
        );
        Ok(())
    }

    fn walk_partitions_backwards(&mut self) -> Result<()> {
        let mut this = self.footer_partition_pack_offset;
        let mut hops = 0;
        while this != 0 {
            hops += 1;
            if hops > 1 << 16 {
                return Err(Error::malformed(this, "partition chain does not end"));
            }
            let prev = self.read_partition_header(self.run_in + this)?;
            if prev >= this {
                return Err(Error::malformed(this, "partition links forward"));
            }
            this = prev;
        }
        Ok(())
    }

    /// Parse the partition pack at absolute `offset` and the index table
    /// segments following it. Returns the declared previous partition.
    fn read_partition_header(&mut self, offset: u64) -> Result<u64> {
        let mut klv = self.peek_klv(offset)?;
        if !klv.key.is_partition_pack() {
            return Err(Error::malformed(klv.offset, "expected a partition pack"));
        }
        self.fill_klv(&mut klv)?;
        let declared_prev = PartitionPack::parse(&klv)?.prev_partition;
        self.handle_partition_pack(&mut klv)?;
        self.consume(&klv);
        let this = klv.offset;

        match self.read_index_segments(this) {
            Ok(()) | Err(Error::EndOfStream) => Ok(declared_prev),
            Err(e) => Err(e),
        }
    }

    fn read_index_segments(&mut self, this: u64) -> Result<()> {
        let mut klv = self.peek_skipping_fill()?;
        let header_byte_count = self
            .partitions
            .get(this)
            .map_or(0, |p| p.pack.header_byte_count);
        if !klv.key.is_index_table_segment() && header_byte_count > 0 {
            self.offset += header_byte_count;
            klv = self.peek_skipping_fill()?;
        }

        while klv.key.is_index_table_segment() {
            self.handle_index_table_segment(&mut klv)?;
            self.consume(&klv);
            klv = self.peek_skipping_fill()?;
        }

        if klv.key.is_essence_element() || klv.key.is_system_item() {
            if let Some(p) = self.partitions.get_mut(this) {
                if p.essence_container_offset == 0 {
                    p.essence_container_offset = klv.offset - this;
                }
            }
        }
        Ok(())
    }

    fn should_parse_footer_metadata(&self, this: u64) -> bool {
        if !self.random_access
            || !self.config.pull_footer_metadata
            || self.footer_metadata_parsed
            || self.footer_partition_pack_offset == 0
        {
            return false;
        }
        self.partitions
            .get(this)
            .is_some_and(|p| p.pack.kind == PartitionKind::Header && !(p.pack.closed && p.pack.complete))
    }

    /// Read the header metadata repeated in the footer (or the last
    /// partition carrying some), which is final when the header's isn't.
    fn parse_footer_metadata(&mut self) -> Result<()> {
        self.footer_metadata_parsed = true;
        let saved = (self.offset, self.current_partition, self.state);
        for p in self.partitions.iter_mut() {
            p.parsed_metadata = false;
        }

        let mut target = self.footer_partition_pack_offset;
        for _ in 0..=self.partitions.len() {
            match self.footer_metadata_step(target) {
                Ok(FooterStep::Done) => {
                    tracing::debug!(partition = target, "using footer metadata");
                    break;
                }
                Ok(FooterStep::Retry(prev)) => target = prev,
                Ok(FooterStep::GiveUp) => break,
                Err(Error::Flushing) => return Err(Error::Flushing),
                Err(e) => {
                    tracing::warn!(error = %e, partition = target, "failed to read footer metadata");
                    break;
                }
            }
        }

        self.offset = saved.0;
        self.current_partition = saved.1;
        self.state = saved.2;

        if let Some(p) = saved.1.and_then(|o| self.partitions.get(o)) {
            if p.pack.body_offset == 0 {
                let body_sid = p.body_sid();
                for t in self
                    .essence_tracks
                    .iter_mut()
                    .filter(|t| t.body_sid == body_sid && t.position.is_none())
                {
                    t.position = Some(0);
                }
            }
        }
        Ok(())
    }

    fn footer_metadata_step(&mut self, target: u64) -> Result<FooterStep> {
        if target == 0 {
            return Ok(FooterStep::GiveUp);
        }
        let mut klv = self.peek_klv(self.run_in + target)?;
        if !klv.key.is_partition_pack() {
            return Err(Error::malformed(klv.offset, "expected a partition pack"));
        }
        self.fill_klv(&mut klv)?;
        let declared_prev = PartitionPack::parse(&klv)?.prev_partition;
        self.handle_partition_pack(&mut klv)?;
        self.consume(&klv);

        let retry = if declared_prev < target {
            FooterStep::Retry(declared_prev)
        } else {
            FooterStep::GiveUp
        };
        let header_byte_count = self
            .partitions
            .get(target)
            .map_or(0, |p| p.pack.header_byte_count);
        if header_byte_count == 0 {
            return Ok(retry);
        }

        let mut primer = self.peek_skipping_fill()?;
        if !primer.key.is_primer_pack() {
            tracing::warn!(key = %primer.key, "expected a primer pack");
            return Ok(retry);
        }
        self.handle_klv_packet(&mut primer, false)?;
        self.consume(&primer);
        let end = self.run_in + primer.offset + header_byte_count;

        while self.offset < end {
            let mut klv = self.peek_klv(self.offset)?;
            match klv.key.kind() {
                KeyKind::Metadata(set_type) => self.handle_metadata(&mut klv, set_type)?,
                KeyKind::DescriptiveMetadata { scheme, set_type } => {
                    self.handle_descriptive_metadata(&mut klv, scheme, set_type)?
                }
                KeyKind::Fill => {}
                _ => break,
            }
            self.consume(&klv);
        }

        match self.resolve_references().and_then(|()| self.update_tracks()) {
            Ok(()) => Ok(FooterStep::Done),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, partition = target, "footer metadata not usable");
                Ok(retry)
            }
            Err(e) => Err(e),
        }
    }

    fn pull_and_handle_klv(&mut self) -> Result<()> {
        let mut force_switch = false;

        let clip = match self.state {
            ReadState::Essence => self
                .current_partition
                .and_then(|o| self.partitions.get(o))
                .and_then(|p| p.clip_klv.clone()),
            _ => None,
        };

        if let Some(mut klv) = clip {
            self.handle_essence_element(&mut klv, false)?;
            self.consume(&klv);
            force_switch = true;
        } else {
            self.state = ReadState::Klv;
            let mut klv = match self.peek_klv(self.offset) {
                Ok(klv) => klv,
                Err(Error::EndOfStream) if !self.cursors.is_empty() => {
                    return self.handle_end_of_data();
                }
                Err(e) => return Err(e),
            };
            self.handle_klv_packet(&mut klv, false)?;
            if self.state != ReadState::Essence {
                klv.consumed = 0;
            }
            self.consume(&klv);

            if klv.key.is_partition_pack() {
                self.after_partition_pack(klv.offset)?;
            }
            if !self.index_table_segments_collected {
                self.collect_index_table_segments()?;
            }
        }

        self.check_drift(force_switch)
    }

    fn after_partition_pack(&mut self, this: u64) -> Result<()> {
        if self.should_parse_footer_metadata(this) {
            self.parse_footer_metadata()?;
        }
        if !self.index_table_segments_collected || self.cursors.is_empty() {
            return Ok(());
        }

        let Some(body_sid) = self.partitions.get(this).map(|p| p.body_sid()) else {
            return Ok(());
        };
        if body_sid == 0 {
            return Ok(());
        }
        let next = self
            .partitions
            .iter()
            .map(|p| p.this_partition())
            .find(|o| *o > this);

        let wanted = self.cursors.iter().any(|c| {
            !c.eos
                && self
                    .essence_tracks
                    .get(c.current_essence_track)
                    .is_some_and(|t| t.body_sid == body_sid)
        });
        if !wanted {
            if let Some(next) = next {
                tracing::debug!(partition = this, body_sid, next, "skipping partition without streams");
                self.move_to(next);
            }
            return Ok(());
        }

        self.resume_partition_tracks(this, next);
        Ok(())
    }

    /// Entering partition `this`: continue where its tracks already are.
    ///
    /// Tracks seen for the first time in a partition at body offset 0 start
    /// at position 0. Tracks that were read further elsewhere have their
    /// earlier edit units skipped, or the whole partition when it holds
    /// nothing new.
    fn resume_partition_tracks(&mut self, this: u64, next: Option<u64>) {
        let Some(partition) = self.partitions.get(this) else {
            return;
        };
        let body_sid = partition.body_sid();
        let body_offset = partition.pack.body_offset;
        let single_track = partition.single_track;

        let misuse = self.metadata.read().temporal_order_misuse();
        let lookup =
            IndexLookup::new(&self.index_tables, &self.partitions).with_temporal_order_misuse(misuse);
        let mut lowest: Option<u64> = None;
        let mut done = false;
        for (ti, track) in self.essence_tracks.iter_mut().enumerate() {
            let in_partition = match single_track {
                Some(single) => single == ti,
                None => track.body_sid == body_sid,
            };
            if !in_partition {
                continue;
            }
            match track.position {
                None if body_offset == 0 => {
                    tracing::debug!(track_id = track.track_id, "first time in partition, starting at 0");
                    track.position = Some(0);
                }
                None | Some(0) => {}
                Some(position) => match lookup.find_edit_entry(track, position, false) {
                    Ok(entry) => lowest = Some(lowest.map_or(entry.offset, |l| l.min(entry.offset))),
                    Err(_) if single_track.is_some() && track.duration > 0 && position >= track.duration => {
                        tracing::debug!(track_id = track.track_id, "track fully read, partition done");
                        done = true;
                    }
                    Err(e) => tracing::trace!(error = %e, position, "no entry for track position"),
                },
            }
        }

        let target = match (done, lowest, next) {
            (true, _, Some(next)) => next,
            (false, Some(lowest), Some(next)) if lowest > next => next,
            (false, Some(lowest), _) => lowest,
            _ => return,
        };
        if self.run_in + target <= self.offset {
            return;
        }
        tracing::debug!(partition = this, from = self.offset, to = target, "skipping elements already read");
        self.move_to(target);
    }

    /// Jump to the stream lagging behind when the others drifted too far
    /// ahead, or when its next element isn't where reading continues.
    fn check_drift(&mut self, force_switch: bool) -> Result<()> {
        let Some(ci) = self.earliest_cursor() else {
            return Ok(());
        };
        let c = &self.cursors[ci];
        let (et, etp, position) = (
            c.current_essence_track,
            c.current_essence_track_position,
            c.position,
        );
        let drifted = self.segment.position.saturating_sub(position) > self.config.max_drift;
        let elsewhere = self
            .essence_tracks
            .get(et)
            .and_then(|t| t.position)
            .is_some_and(|p| p != etp);
        if !(force_switch || drifted || elsewhere) {
            return Ok(());
        }

        let mut target = etp;
        match self.find_essence_element(et, &mut target, false)? {
            Some(offset) => {
                if self.jump_to_essence(et, offset, target)? {
                    tracing::debug!(
                        track_id = self.cursors[ci].track_id,
                        position = target,
                        offset,
                        "switched to lagging stream"
                    );
                }
            }
            None if self.cursors[ci].eos => {}
            None => {
                tracing::error!(track_id = self.cursors[ci].track_id, etp, "no offset for lagging stream");
                self.set_cursor_eos(ci);
            }
        }
        Ok(())
    }

    /// Continue reading essence track `et` at `position`, stored at
    /// header-relative `offset`. Returns false when nothing moved.
    pub(super) fn jump_to_essence(&mut self, et: usize, offset: u64, position: u64) -> Result<bool> {
        let already_there = self.run_in + offset == self.offset
            && self.essence_tracks.get(et).and_then(|t| t.position) == Some(position);
        if already_there {
            return Ok(false);
        }
        if self.last_redirect == Some((et, position, offset)) {
            tracing::debug!(offset, position, "already redirected here, not jumping again");
            return Ok(false);
        }
        self.last_redirect = Some((et, position, offset));
        self.move_to(offset);
        if let Some(t) = self.essence_tracks.get_mut(et) {
            t.position = Some(position);
        }
        Ok(true)
    }

    /// Reading hit the end of the file.
    ///
    /// Tracks end where they were last seen; streams that still have
    /// essence left somewhere get a jump, the others finish.
    fn handle_end_of_data(&mut self) -> Result<()> {
        tracing::debug!(offset = self.offset, "end of data");
        self.mark_durations_at_eos();
        self.eos_finished_cursors();

        loop {
            let Some(ci) = self.earliest_cursor() else {
                return Err(Error::EndOfStream);
            };
            let c = &self.cursors[ci];
            let et = c.current_essence_track;
            let mut target = c.current_essence_track_position;
            let found = match self.find_essence_element(et, &mut target, false) {
                Ok(found) => found,
                Err(Error::Flushing) => return Err(Error::Flushing),
                Err(e) => {
                    tracing::debug!(error = %e, "no essence left");
                    None
                }
            };
            match found {
                Some(offset) if self.jump_to_essence(et, offset, target)? => return Ok(()),
                _ => self.set_cursor_eos(ci),
            }
        }
    }

    /// Header-relative offset of the edit unit at `position` of essence
    /// track `et`.
    ///
    /// Uses the index and the entries seen so far; in pull mode the file is
    /// scanned when neither knows. With `keyframe` set, `position` is moved
    /// back to the supporting keyframe.
    pub(super) fn find_essence_element(
        &mut self,
        et: usize,
        position: &mut u64,
        keyframe: bool,
    ) -> Result<Option<u64>> {
        let Some(track) = self.essence_tracks.get(et) else {
            return Ok(None);
        };
        if track.duration > 0 && *position >= track.duration {
            return Ok(None);
        }

        let misuse = self.metadata.read().temporal_order_misuse();
        let lookup =
            IndexLookup::new(&self.index_tables, &self.partitions).with_temporal_order_misuse(misuse);
        match lookup.find_edit_entry(track, *position, keyframe) {
            Ok(entry) => {
                *position = entry.dts;
                return Ok(Some(entry.offset));
            }
            Err(e) => tracing::trace!(error = %e, position = *position, "not in index"),
        }

        if !self.random_access {
            return Ok(find_closest_offset(&track.offsets, position, keyframe));
        }

        let saved_positions: Vec<Option<u64>> =
            self.essence_tracks.iter().map(|t| t.position).collect();
        let saved = (self.offset, self.current_partition, self.state);
        let saved_clip = saved
            .1
            .and_then(|o| self.partitions.get(o))
            .and_then(|p| p.clip_klv.clone());

        let result = self.scan_for_essence(et, position, keyframe);

        for (t, p) in self.essence_tracks.iter_mut().zip(saved_positions) {
            t.position = p;
        }
        self.offset = saved.0;
        self.current_partition = saved.1;
        self.state = saved.2;
        if let Some(p) = saved.1.and_then(|o| self.partitions.get_mut(o)) {
            p.clip_klv = saved_clip;
        }

        match result {
            Ok(found) => Ok(found),
            Err(Error::Flushing) => Err(Error::Flushing),
            Err(e) => {
                tracing::debug!(error = %e, "scanning for essence failed");
                Ok(None)
            }
        }
    }

    fn scan_for_essence(&mut self, et: usize, position: &mut u64, keyframe: bool) -> Result<Option<u64>> {
        let wanted = *position;
        for attempt in 0..2 {
            let mut start_position = wanted;
            let closest = if attempt == 0 {
                find_closest_offset(&self.essence_tracks[et].offsets, &mut start_position, false)
            } else {
                None
            };
            match closest {
                Some(offset) => {
                    self.move_to(offset);
                    self.essence_tracks[et].position = Some(start_position);
                }
                None if attempt == 0 => continue,
                None => {
                    for t in &mut self.essence_tracks {
                        t.position = None;
                    }
                    self.move_to(0);
                }
            }
            tracing::debug!(attempt, from = self.offset, wanted, "scanning for essence");

            let mut reached_end = false;
            loop {
                if self.essence_tracks[et].position.is_some_and(|p| p > wanted) {
                    break;
                }
                match self.scan_next() {
                    Ok(()) => {}
                    Err(Error::EndOfStream) => {
                        reached_end = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if reached_end {
                self.mark_durations_at_eos();
                self.eos_finished_cursors();
            }

            let mut found_position = wanted;
            if let Some(offset) =
                find_offset(&self.essence_tracks[et].offsets, &mut found_position, keyframe)
            {
                *position = found_position;
                return Ok(Some(offset));
            }
            if reached_end {
                break;
            }
        }
        Ok(None)
    }

    /// Peek at one packet, advancing positions without output.
    fn scan_next(&mut self) -> Result<()> {
        self.check_flushing()?;
        let clip = match self.state {
            ReadState::Essence => self
                .current_partition
                .and_then(|o| self.partitions.get(o))
                .and_then(|p| p.clip_klv.clone()),
            _ => None,
        };
        let mut klv = match clip {
            Some(klv) => klv,
            None => {
                self.state = ReadState::Klv;
                self.peek_klv(self.offset)?
            }
        };
        self.handle_klv_packet(&mut klv, true)?;
        if self.state != ReadState::Essence {
            klv.consumed = 0;
        }
        self.consume(&klv);
        Ok(())
    }
}
