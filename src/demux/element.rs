//! Essence element handling: position tracking, index verification and
//! buffer output.

use std::sync::Arc;

use bytes::Bytes;

use super::{Demuxer, Event, OutputBuffer, ReadState};
use crate::error::{Error, Result};
use crate::index::{DeltaId, EditEntry, IndexLookup};
use crate::klv::KlvPacket;
use crate::source::ByteSource;
use crate::time::{rescale_units, units_to_time, Rational};
use crate::ul::TrackType;

impl<S: ByteSource> Demuxer<S> {
    pub(super) fn handle_essence_element(&mut self, klv: &mut KlvPacket, peek: bool) -> Result<()> {
        let this = self
            .current_partition
            .ok_or_else(|| Error::InvalidState("essence element outside of any partition".into()))?;

        let (single_track, body_sid) = {
            let partition = self
                .partitions
                .get_mut(this)
                .ok_or_else(|| Error::InvalidState("current partition is unknown".into()))?;
            if partition.essence_container_offset == 0 {
                partition.essence_container_offset = klv.offset.saturating_sub(this);
                let non_frame = partition
                    .single_track
                    .and_then(|t| self.essence_tracks.get(t))
                    .is_some_and(|t| !t.wrapping.is_frame());
                if non_frame {
                    partition.essence_container_offset += klv.data_offset;
                    partition.clip_klv = Some(klv.header_only());
                }
            }
            (partition.single_track, partition.body_sid())
        };

        if self.current_package.is_none() || self.cursors.is_empty() || self.essence_tracks.is_empty() {
            return Err(Error::InvalidState(
                "essence element before any stream was created".into(),
            ));
        }

        let track_number = klv.key.essence_track_number();
        let Some(ti) = single_track.or_else(|| {
            self.essence_tracks.iter().position(|t| {
                t.body_sid == body_sid && (t.track_number == track_number || t.track_number == 0)
            })
        }) else {
            tracing::debug!(
                track_number = format!("{track_number:#010x}"),
                body_sid,
                "no essence track for element"
            );
            return Ok(());
        };

        let frame = self.essence_tracks[ti].wrapping.is_frame();
        if !frame && !self.random_access {
            return Err(Error::Unsupported(
                "clip and custom wrapped essence in push mode".into(),
            ));
        }
        let lookup_offset = if frame {
            klv.offset
        } else {
            klv.offset + klv.consumed.max(klv.data_offset)
        };

        let misuse = self.metadata.read().temporal_order_misuse();
        let lookup =
            IndexLookup::new(&self.index_tables, &self.partitions).with_temporal_order_misuse(misuse);
        let partition = self.partitions.get(this);

        if self.essence_tracks[ti].position.is_none() {
            match lookup.find_entry_for_offset(partition, &mut self.essence_tracks[ti], lookup_offset) {
                Ok(entry) => self.essence_tracks[ti].position = Some(entry.dts),
                Err(_)
                    if partition.is_some_and(|p| {
                        p.pack.body_offset == 0 && p.essence_start() == klv.offset
                    }) =>
                {
                    self.essence_tracks[ti].position = Some(0);
                }
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        offset = lookup_offset,
                        track_id = self.essence_tracks[ti].track_id,
                        "essence position not in index, skipping element"
                    );
                    return Ok(());
                }
            }
        } else if self.essence_tracks[ti].delta_id == DeltaId::Unknown {
            match lookup.find_entry_for_offset(partition, &mut self.essence_tracks[ti], lookup_offset) {
                Ok(entry) if Some(entry.dts) != self.essence_tracks[ti].position => {
                    return Err(Error::InvalidState(format!(
                        "track {} is at position {:?} but the index says {}",
                        self.essence_tracks[ti].track_id, self.essence_tracks[ti].position, entry.dts
                    )));
                }
                Ok(_) => {}
                Err(_) => self.essence_tracks[ti].delta_id = DeltaId::Ignore,
            }
        }

        let track = &self.essence_tracks[ti];
        let Some(position) = track.position else {
            return Ok(());
        };

        let mut entry = None;
        if !frame || track.delta_id != DeltaId::Ignore {
            match lookup.find_edit_entry(track, position, false) {
                Ok(e) if frame && e.offset != klv.offset => {
                    tracing::error!(
                        track_id = track.track_id,
                        position,
                        expected = e.offset,
                        actual = klv.offset,
                        "essence element not where the index says"
                    );
                    return Err(Error::OffsetMismatch {
                        expected: e.offset,
                        actual: klv.offset,
                    });
                }
                Ok(e) => entry = Some(e),
                Err(e) if frame => {
                    tracing::trace!(error = %e, position, "no index entry, scanning");
                }
                Err(e) => {
                    tracing::error!(error = %e, track_id = track.track_id, "clip wrapped essence needs an index");
                    return Err(Error::IndexRequired {
                        track_number: track.track_number,
                        body_sid: track.body_sid,
                    });
                }
            }
        }

        let data = if frame {
            if !peek {
                self.fill_klv(klv)?;
            }
            klv.payload.clone().unwrap_or_default()
        } else {
            let e = entry.ok_or(Error::IndexRequired {
                track_number: self.essence_tracks[ti].track_number,
                body_sid,
            })?;
            self.read_clip_entry(klv, &e, lookup_offset, this, peek)?
        };

        let track = &self.essence_tracks[ti];
        let out = match (&track.handler, &track.mapping) {
            (Some(handler), Some(mapping)) if !peek => {
                handler.transform(&klv.key, data, &track.description, mapping)?
            }
            _ => data,
        };

        let edit_entry = match entry {
            Some(e) => {
                if position == self.essence_tracks[ti].offsets.len() as u64 {
                    self.essence_tracks[ti].record_entry(position, e);
                }
                e
            }
            None => {
                let e = EditEntry {
                    offset: klv.offset,
                    pts: Some(position),
                    dts: position,
                    keyframe: true,
                    initialized: true,
                    ..Default::default()
                };
                if position <= self.essence_tracks[ti].offsets.len() as u64 {
                    self.essence_tracks[ti].record_entry(position, e);
                }
                e
            }
        };
        self.essence_tracks[ti].position = Some(position + edit_entry.duration);
        if peek {
            return Ok(());
        }

        self.output_element(ti, position, &edit_entry, out, body_sid)
    }

    /// Read the edit units of a clip or custom wrapped element described by
    /// `entry`, advancing the packet's consumed count.
    fn read_clip_entry(
        &mut self,
        klv: &mut KlvPacket,
        entry: &EditEntry,
        expected: u64,
        this: u64,
        peek: bool,
    ) -> Result<Bytes> {
        if entry.offset != expected {
            return Err(Error::OffsetMismatch {
                expected: entry.offset,
                actual: expected,
            });
        }
        if entry.size == 0 {
            return Err(Error::malformed(klv.offset, "zero sized edit unit in clip wrapped essence"));
        }
        let remaining = klv.end_offset().saturating_sub(expected);
        let size = entry.size.min(remaining);
        if size > self.config.max_klv_length {
            return Err(Error::malformed(
                klv.offset,
                format!("edit unit of {size} bytes exceeds the maximum KLV length"),
            ));
        }

        let data = if peek {
            Bytes::new()
        } else {
            self.source.pull_exact(self.run_in + expected, size as usize)?
        };
        klv.consumed = expected - klv.offset + size;
        self.state = if klv.consumed >= klv.total_size() {
            ReadState::Klv
        } else {
            ReadState::Essence
        };
        if let Some(p) = self.partitions.get_mut(this) {
            p.clip_klv = Some(klv.header_only());
        }
        Ok(data)
    }

    /// Time-stamp `out` for every stream reading essence track `ti`.
    fn output_element(
        &mut self,
        ti: usize,
        position: u64,
        entry: &EditEntry,
        out: Bytes,
        body_sid: u32,
    ) -> Result<()> {
        self.last_redirect = None;
        let metadata = Arc::clone(&self.metadata);
        let store = metadata.read();

        let track = &self.essence_tracks[ti];
        let src_rate = track.edit_rate;
        let intra_only = track.intra_only;
        let track_duration = track.duration;
        let max_temporal_offset = u64::from(
            self.index_tables
                .table(body_sid, track.index_sid)
                .map_or(0, |t| t.max_temporal_offset),
        );
        let earliest = self.earliest_cursor().map(|ci| self.cursors[ci].position);

        for ci in 0..self.cursors.len() {
            let c = &self.cursors[ci];
            if c.current_essence_track != ti || c.eos {
                continue;
            }
            if position < c.current_essence_track_position {
                tracing::trace!(
                    track_id = c.track_id,
                    position,
                    expected = c.current_essence_track_position,
                    "element before the stream's position"
                );
                continue;
            }
            if let Some(earliest) = earliest.filter(|e| *e < c.position) {
                if c.position - earliest > self.config.max_drift {
                    tracing::trace!(track_id = c.track_id, "stream too far ahead, dropping element");
                    continue;
                }
            }
            if self.segment.stop.is_some_and(|stop| c.position >= stop) {
                self.set_cursor_eos(ci);
                continue;
            }

            let segment = self.segment.clone();
            let container_tags = self.container_tags.clone();
            let c = &mut self.cursors[ci];
            let mat_rate = c.material_edit_rate;
            let shift = if intra_only {
                0
            } else {
                units_to_time(max_temporal_offset, src_rate)
            };

            let dts = c.position;
            let pts = if intra_only {
                Some(dts)
            } else {
                entry.pts.map(|p| c.presentation_time(p, src_rate, shift))
            };
            let duration = c.buffer_duration(entry.duration, src_rate);
            let timecode = match (c.track_type, c.start_timecode) {
                (TrackType::Picture, Some(tc)) => Some(tc.add_frames(rescale_units(
                    c.current_material_track_position,
                    mat_rate,
                    Rational::new(i32::from(tc.fps), 1),
                ))),
                _ => None,
            };

            if c.need_segment {
                let mut segment = segment;
                segment.start += shift;
                segment.stop = segment.stop.map(|s| s + shift);
                c.need_segment = false;
                self.events.push_back(Event::Segment {
                    track_id: c.track_id,
                    segment,
                });
            }
            if !c.tags_sent {
                let mut tags = container_tags;
                tags.extend(c.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                c.tags_sent = true;
                self.events.push_back(Event::Tags {
                    track_id: c.track_id,
                    tags,
                });
            }

            tracing::trace!(
                track_id = c.track_id,
                dts,
                pts,
                duration,
                size = out.len(),
                "output buffer"
            );
            let event = if out.is_empty() {
                Event::Gap {
                    track_id: c.track_id,
                    timestamp: dts,
                    duration,
                }
            } else {
                Event::Buffer(OutputBuffer {
                    track_id: c.track_id,
                    data: out.clone(),
                    pts,
                    dts: Some(dts),
                    duration: Some(duration),
                    offset: c.current_material_track_position,
                    discont: c.discont,
                    delta_unit: !(intra_only || entry.keyframe),
                    timecode,
                })
            };
            self.events.push_back(event);

            c.advance(duration, entry.duration);
            self.segment.position = self.segment.position.max(c.position);

            let c = &self.cursors[ci];
            match c.current_component {
                Some(index) if c.component_finished() => {
                    tracing::debug!(track_id = c.track_id, "switching to next component");
                    match self.set_component(&store, ci, index + 1) {
                        Ok(true) => self.set_cursor_eos(ci),
                        Ok(false) => {
                            let c = &self.cursors[ci];
                            let (et, etp) = (c.current_essence_track, c.current_essence_track_position);
                            if et != ti {
                                self.essence_tracks[et].position = Some(etp);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "couldn't switch component, ending stream");
                            self.set_cursor_eos(ci);
                        }
                    }
                }
                Some(_) => {}
                None if track_duration > 0 && c.current_essence_track_position >= track_duration => {
                    self.set_cursor_eos(ci);
                }
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::source::MemorySource;
    use crate::test_utils::MxfBuilder;

    fn buffers(demuxer: &mut Demuxer<MemorySource>) -> Vec<OutputBuffer> {
        let mut out = Vec::new();
        while let Some(event) = demuxer.next_event().unwrap() {
            if let Event::Buffer(b) = event {
                out.push(b);
            }
        }
        out
    }

    #[test]
    fn test_first_buffer_is_discont() {
        let file = MxfBuilder::single_track(3).build();
        let mut demuxer = Demuxer::with_registry(
            MemorySource::new(file.data),
            DemuxConfig::new(),
            MxfBuilder::registry(),
        );
        let out = buffers(&mut demuxer);
        assert_eq!(out.len(), 3);
        assert!(out[0].discont);
        assert!(!out[1].discont);
        assert!(out.iter().all(|b| !b.delta_unit));
        assert_eq!(out[2].offset, 2);
    }

    #[test]
    fn test_index_offset_mismatch_is_fatal() {
        let file = MxfBuilder::single_track(4).with_index().corrupt_index_entry(2).build();
        let mut demuxer = Demuxer::with_registry(
            MemorySource::new(file.data),
            DemuxConfig::new(),
            MxfBuilder::registry(),
        );
        let mut result = Ok(None);
        for _ in 0..100 {
            result = demuxer.next_event();
            if !matches!(result, Ok(Some(_))) {
                break;
            }
        }
        assert!(matches!(result, Err(Error::OffsetMismatch { .. })));
    }

    #[test]
    fn test_indexed_entries_fill_offset_cache() {
        let file = MxfBuilder::single_track(4).with_index().build();
        let mut demuxer = Demuxer::with_registry(
            MemorySource::new(file.data.clone()),
            DemuxConfig::new(),
            MxfBuilder::registry(),
        );
        assert_eq!(buffers(&mut demuxer).len(), 4);

        let offsets = &demuxer.essence_tracks[0].offsets;
        assert_eq!(offsets.len(), 4);
        for (i, entry) in offsets.iter().enumerate() {
            assert!(entry.initialized);
            assert_eq!(entry.offset, file.essence_offsets[i], "offset of edit unit {i}");
            assert_eq!(entry.dts, i as u64);
        }
    }

    #[test]
    fn test_timecode_follows_material_position() {
        let file = MxfBuilder::single_track(3).build();
        let mut demuxer = Demuxer::with_registry(
            MemorySource::new(file.data),
            DemuxConfig::new(),
            MxfBuilder::registry(),
        );
        let out = buffers(&mut demuxer);
        let frames: Vec<u64> = out.iter().filter_map(|b| b.timecode).map(|tc| tc.frames).collect();
        assert_eq!(frames, vec![90_000, 90_001, 90_002]);
    }
}
