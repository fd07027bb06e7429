//! Per-packet dispatch and the handlers for structural packets.

use std::sync::Arc;

use super::Demuxer;
use crate::error::{Error, Result};
use crate::index::{IndexLookup, IndexTableSegment};
use crate::klv::KlvPacket;
use crate::metadata::{parse_descriptive_set, parse_metadata_set};
use crate::partition::{Partition, PartitionPack, RandomIndexPack};
use crate::primer::PrimerPack;
use crate::source::ByteSource;
use crate::ul::{KeyKind, PartitionKind};

impl<S: ByteSource> Demuxer<S> {
    /// Route one KLV packet to its handler.
    ///
    /// With `peek` set, essence elements only advance track positions; no
    /// payload is read and nothing is output.
    pub(super) fn handle_klv_packet(&mut self, klv: &mut KlvPacket, peek: bool) -> Result<()> {
        let kind = klv.key.kind();
        tracing::trace!(offset = klv.offset, length = klv.length, kind = %kind, "handling KLV packet");

        if self.metadata_is_stale(klv, kind) {
            tracing::debug!(offset = klv.offset, "header metadata changed, updating streams");
            if let Some(p) = self.current_partition.and_then(|o| self.partitions.get_mut(o)) {
                p.parsed_metadata = true;
            }
            match self.resolve_references().and_then(|()| self.update_tracks()) {
                Ok(()) => {}
                Err(e)
                    if e.is_recoverable()
                        && !matches!(kind, KeyKind::SystemItem | KeyKind::EssenceElement(_)) =>
                {
                    tracing::warn!(error = %e, "metadata not usable yet, retrying later");
                    self.update_metadata = true;
                }
                Err(e) => return Err(e),
            }
        } else if self.requested_package.is_some() && self.metadata.read().is_resolved() {
            self.update_tracks()?;
        }

        match kind {
            KeyKind::PartitionPack => self.handle_partition_pack(klv),
            KeyKind::PrimerPack => self.handle_primer_pack(klv),
            KeyKind::Metadata(set_type) => self.handle_metadata(klv, set_type),
            KeyKind::DescriptiveMetadata { scheme, set_type } => {
                self.handle_descriptive_metadata(klv, scheme, set_type)
            }
            KeyKind::SystemItem => {
                self.collect_pending_segments();
                self.handle_system_item(klv)
            }
            KeyKind::EssenceElement(_) => {
                self.collect_pending_segments();
                self.handle_essence_element(klv, peek)
            }
            KeyKind::RandomIndexPack => {
                if let Err(e) = self.handle_random_index_pack(klv) {
                    tracing::warn!(error = %e, offset = klv.offset, "ignoring invalid random index pack");
                }
                Ok(())
            }
            KeyKind::IndexTableSegment => self.handle_index_table_segment(klv),
            KeyKind::Fill => Ok(()),
            KeyKind::Unknown => {
                tracing::debug!(key = %klv.key, offset = klv.offset, "skipping unknown KLV packet");
                Ok(())
            }
        }
    }

    /// Metadata was updated and the stream has moved past it.
    fn metadata_is_stale(&self, klv: &KlvPacket, kind: KeyKind) -> bool {
        if !self.update_metadata || self.metadata.read().preface_uid().is_none() {
            return false;
        }
        if matches!(kind, KeyKind::SystemItem | KeyKind::EssenceElement(_)) {
            return true;
        }
        self.current_partition
            .and_then(|o| self.partitions.get(o))
            .and_then(|p| {
                p.primer
                    .as_ref()
                    .map(|primer| primer.offset + p.pack.header_byte_count)
            })
            .is_some_and(|end| klv.offset >= end)
    }

    fn collect_pending_segments(&mut self) {
        if self.index_tables.has_pending() {
            self.index_tables.collect_pending();
        }
    }

    pub(super) fn handle_partition_pack(&mut self, klv: &mut KlvPacket) -> Result<()> {
        if self.partitions.get(klv.offset).is_some_and(|p| p.parsed) {
            tracing::trace!(offset = klv.offset, "partition pack already known");
            self.current_partition = Some(klv.offset);
            return Ok(());
        }

        self.fill_klv(klv)?;
        let mut pack = PartitionPack::parse(klv)?;
        if pack.this_partition != klv.offset {
            tracing::warn!(
                declared = pack.this_partition,
                actual = klv.offset,
                "partition pack at unexpected offset"
            );
            pack.this_partition = klv.offset;
        }
        tracing::debug!(
            kind = pack.kind.as_str(),
            offset = pack.this_partition,
            body_sid = pack.body_sid,
            index_sid = pack.index_sid,
            closed = pack.closed,
            complete = pack.complete,
            "partition pack"
        );

        match pack.kind {
            PartitionKind::Footer => self.footer_partition_pack_offset = pack.this_partition,
            _ if pack.footer_partition != 0 => {
                self.footer_partition_pack_offset = pack.footer_partition
            }
            _ => {}
        }

        let this = pack.this_partition;
        match self.partitions.get_mut(this) {
            Some(existing) => {
                existing.pack = pack;
                existing.parsed = true;
                self.partitions.relink();
            }
            None => self.partitions.insert(Partition::new(pack)),
        }
        self.current_partition = Some(this);
        self.partition_postcheck(this)
    }

    /// Assign the single essence track of a partition and, for clip and
    /// custom wrapping, move its essence offset past the KLV header.
    pub(super) fn partition_postcheck(&mut self, this: u64) -> Result<()> {
        let Some(partition) = self.partitions.get(this) else {
            return Ok(());
        };
        let body_sid = partition.body_sid();
        if partition.single_track.is_some() || body_sid == 0 {
            return Ok(());
        }

        let single = {
            let store = self.metadata.read();
            self.essence_tracks.iter().position(|t| {
                t.body_sid == body_sid
                    && t.source_package
                        .and_then(|p| store.package(&p))
                        .is_some_and(|p| !p.is_interleaved)
            })
        };
        let Some(ti) = single else {
            return Ok(());
        };
        tracing::debug!(
            partition = this,
            track_id = self.essence_tracks[ti].track_id,
            "single track partition"
        );

        let eco = partition.essence_container_offset;
        let wrapping = self.essence_tracks[ti].wrapping;
        let peek_clip = eco != 0 && !wrapping.is_frame() && self.random_access;
        let clip = if peek_clip {
            match self.peek_klv(self.run_in + this + eco) {
                Ok(klv) if klv.key.is_essence_element() => Some(klv),
                Ok(klv) => {
                    tracing::warn!(key = %klv.key, "expected a clip wrapped essence element");
                    None
                }
                Err(Error::Flushing) => return Err(Error::Flushing),
                Err(e) => {
                    tracing::warn!(error = %e, "couldn't read clip wrapped essence element");
                    None
                }
            }
        } else {
            None
        };

        let clip_data = clip.as_ref().map(|klv| klv.offset + klv.data_offset);
        if let Some(partition) = self.partitions.get_mut(this) {
            partition.single_track = Some(ti);
            if let Some(klv) = clip {
                partition.essence_container_offset += klv.data_offset;
                partition.clip_klv = Some(klv.header_only());
            }
        }

        // Resolve the delta entry before the first essence read
        if let Some(offset) = clip_data {
            self.collect_pending_segments();
            let misuse = self.metadata.read().temporal_order_misuse();
            let lookup =
                IndexLookup::new(&self.index_tables, &self.partitions).with_temporal_order_misuse(misuse);
            let partition = self.partitions.get(this);
            match lookup.find_entry_for_offset(partition, &mut self.essence_tracks[ti], offset) {
                Ok(entry) => tracing::debug!(
                    partition = this,
                    position = entry.dts,
                    delta_id = ?self.essence_tracks[ti].delta_id,
                    "clip wrapped essence found in index"
                ),
                Err(e) => tracing::debug!(
                    error = %e,
                    partition = this,
                    "clip wrapped essence not in index"
                ),
            }
        }
        Ok(())
    }

    fn handle_primer_pack(&mut self, klv: &mut KlvPacket) -> Result<()> {
        let this = self
            .current_partition
            .ok_or_else(|| Error::InvalidState("primer pack before any partition pack".into()))?;
        if self.partitions.get(this).is_some_and(|p| p.primer.is_some()) {
            tracing::trace!(offset = klv.offset, "primer pack already parsed");
            return Ok(());
        }

        self.fill_klv(klv)?;
        let primer = PrimerPack::parse(klv)?;
        tracing::debug!(offset = klv.offset, mappings = primer.mappings.len(), "primer pack");
        if let Some(p) = self.partitions.get_mut(this) {
            p.primer = Some(primer);
        }
        Ok(())
    }

    pub(super) fn handle_metadata(&mut self, klv: &mut KlvPacket, set_type: u16) -> Result<()> {
        if !self.metadata_wanted(klv)? {
            return Ok(());
        }
        self.fill_klv(klv)?;

        let parsed = {
            let primer = self.current_primer()?;
            parse_metadata_set(set_type, primer, klv)
        };
        let entry = match parsed {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    set_type = format!("{set_type:#06x}"),
                    offset = klv.offset,
                    "failed to parse metadata set"
                );
                return Ok(());
            }
        };

        let outcome = self.metadata.write().insert(entry)?;
        if outcome.is_update() {
            self.update_metadata = true;
        }
        Ok(())
    }

    pub(super) fn handle_descriptive_metadata(
        &mut self,
        klv: &mut KlvPacket,
        scheme: u8,
        set_type: u32,
    ) -> Result<()> {
        if !self.metadata_wanted(klv)? {
            return Ok(());
        }
        self.fill_klv(klv)?;

        let parsed = {
            let primer = self.current_primer()?;
            parse_descriptive_set(scheme, set_type, primer, klv)
        };
        let set = match parsed {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(error = %e, offset = klv.offset, "failed to parse descriptive metadata set");
                return Ok(());
            }
        };

        let outcome = self.metadata.write().insert_descriptive(set)?;
        if outcome.is_update() {
            self.update_metadata = true;
        }
        Ok(())
    }

    /// Metadata of the current partition is still to be read.
    fn metadata_wanted(&self, klv: &KlvPacket) -> Result<bool> {
        let partition = self
            .current_partition
            .and_then(|o| self.partitions.get(o))
            .ok_or_else(|| Error::InvalidState("metadata before any partition pack".into()))?;
        if partition.primer.is_none() {
            return Err(Error::InvalidState(format!(
                "metadata at offset {} before the primer pack",
                klv.offset
            )));
        }
        Ok(!partition.parsed_metadata && klv.length > 0)
    }

    fn current_primer(&self) -> Result<&PrimerPack> {
        self.current_partition
            .and_then(|o| self.partitions.get(o))
            .and_then(|p| p.primer.as_ref())
            .ok_or_else(|| Error::InvalidState("no primer pack in current partition".into()))
    }

    fn handle_system_item(&mut self, klv: &KlvPacket) -> Result<()> {
        let Some(this) = self.current_partition else {
            return Ok(());
        };
        if let Some(p) = self.partitions.get_mut(this) {
            if p.essence_container_offset == 0 {
                p.essence_container_offset = klv.offset.saturating_sub(this);
            }
        }
        Ok(())
    }

    pub(super) fn handle_random_index_pack(&mut self, klv: &mut KlvPacket) -> Result<()> {
        if self.random_index_pack.is_some() {
            tracing::trace!("random index pack already parsed");
            return Ok(());
        }

        self.fill_klv(klv)?;
        let rip = RandomIndexPack::parse(klv)?;
        if let Some(entry) = rip.entries.iter().find(|e| e.offset < self.run_in) {
            return Err(Error::malformed(
                klv.offset,
                format!(
                    "partition offset {} lies before the run-in of {} bytes",
                    entry.offset, self.run_in
                ),
            ));
        }

        for entry in &rip.entries {
            let this = entry.offset - self.run_in;
            if !self.partitions.contains(this) {
                self.partitions.insert(Partition::stub(this, entry.body_sid));
            }
        }
        tracing::debug!(partitions = rip.entries.len(), "random index pack");
        self.random_index_pack = Some(rip);
        Ok(())
    }

    pub(super) fn handle_index_table_segment(&mut self, klv: &mut KlvPacket) -> Result<()> {
        self.fill_klv(klv)?;
        match IndexTableSegment::parse(klv) {
            Ok(segment) => {
                let (body_sid, index_sid, start) =
                    (segment.body_sid, segment.index_sid, segment.index_start_position);
                if self.index_tables.add_segment(segment) {
                    tracing::debug!(body_sid, index_sid, start, "index table segment");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, offset = klv.offset, "failed to parse index table segment");
            }
        }
        Ok(())
    }

    /// Resolve the metadata graph and refresh the container tags.
    pub(super) fn resolve_references(&mut self) -> Result<()> {
        self.update_metadata = false;
        let metadata = Arc::clone(&self.metadata);
        let mut store = metadata.write();
        store.resolve()?;

        let application = store
            .preface()
            .and_then(|p| p.identifications.last())
            .and_then(|uid| store.identification(uid))
            .and_then(|i| i.product_name.clone());
        drop(store);

        self.container_tags
            .insert("container-format".into(), "MXF".into());
        if let Some(name) = application {
            self.container_tags.insert("application-name".into(), name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::index::DeltaId;
    use crate::klv::parse_header;
    use crate::source::MemorySource;
    use crate::test_utils::MxfBuilder;

    fn demuxer(data: Vec<u8>) -> Demuxer<MemorySource> {
        Demuxer::new(MemorySource::new(data), DemuxConfig::new())
    }

    fn packet(data: &[u8], offset: u64) -> KlvPacket {
        parse_header(&data[offset as usize..], offset).unwrap()
    }

    #[test]
    fn test_random_index_pack_creates_stubs() {
        let file = MxfBuilder::single_track(3).with_body_partitions().build();
        let mut demuxer = demuxer(file.data.clone());
        let mut klv = packet(&file.data, file.rip_offset.unwrap());
        demuxer.handle_random_index_pack(&mut klv).unwrap();

        assert_eq!(demuxer.partitions.len(), file.partition_offsets.len());
        for offset in &file.partition_offsets {
            let p = demuxer.partitions.get(*offset).unwrap();
            assert!(!p.parsed);
        }
        // a second pack is ignored
        demuxer.handle_random_index_pack(&mut klv).unwrap();
        assert_eq!(demuxer.partitions.len(), file.partition_offsets.len());
    }

    #[test]
    fn test_partition_pack_replaces_stub() {
        let file = MxfBuilder::single_track(3).with_body_partitions().build();
        let mut demuxer = demuxer(file.data.clone());
        let mut rip = packet(&file.data, file.rip_offset.unwrap());
        demuxer.handle_random_index_pack(&mut rip).unwrap();

        let body = file.partition_offsets[1];
        let mut klv = packet(&file.data, body);
        demuxer.handle_partition_pack(&mut klv).unwrap();
        let p = demuxer.partitions.get(body).unwrap();
        assert!(p.parsed);
        assert_eq!(p.pack.kind, PartitionKind::Body);
        assert_eq!(p.pack.prev_partition, 0);
        assert_eq!(demuxer.current_partition, Some(body));
        assert_eq!(
            demuxer.footer_partition_pack_offset,
            *file.partition_offsets.last().unwrap()
        );
    }

    #[test]
    fn test_clip_partition_resolves_delta_id() {
        let file = MxfBuilder::clip_wrapped(4).with_body_partitions().build();
        let mut demuxer = Demuxer::with_registry(
            MemorySource::new(file.data.clone()),
            DemuxConfig::new(),
            MxfBuilder::registry(),
        );
        while demuxer.stream_count() == 0 {
            demuxer.step().unwrap();
        }

        // back to the state before the body partition was checked
        let body = file.partition_offsets[1];
        let element = file.essence_offsets[0];
        demuxer.essence_tracks[0].delta_id = DeltaId::Unknown;
        {
            let p = demuxer.partitions.get_mut(body).unwrap();
            p.single_track = None;
            p.clip_klv = None;
            p.essence_container_offset = element - body;
        }

        demuxer.partition_postcheck(body).unwrap();
        let p = demuxer.partitions.get(body).unwrap();
        assert_eq!(p.single_track, Some(0));
        assert_eq!(p.essence_start(), element + 20);
        assert!(p.clip_klv.is_some());
        assert_ne!(demuxer.essence_tracks[0].delta_id, DeltaId::Unknown);
    }

    #[test]
    fn test_metadata_requires_primer() {
        let file = MxfBuilder::single_track(1).build();
        let mut demuxer = demuxer(file.data.clone());
        let mut header = packet(&file.data, 0);
        demuxer.handle_partition_pack(&mut header).unwrap();

        let mut set = packet(&file.data, file.first_metadata_offset);
        assert!(matches!(
            demuxer.handle_metadata(&mut set, 0x012f),
            Err(Error::InvalidState(_))
        ));
    }
}
