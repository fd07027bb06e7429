//! Seeking in time.

use std::sync::Arc;

use super::{Demuxer, Event, Segment};
use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::source::ByteSource;
use crate::time::{rescale_units, time_to_units, units_to_time};

/// A seek to a time range, in nanoseconds
#[derive(Debug, Clone, PartialEq)]
pub struct SeekRequest {
    pub rate: f64,
    pub start: u64,
    pub stop: Option<u64>,
    /// Start at the keyframe before `start`
    pub key_unit: bool,
    /// Finish with [`Event::SegmentDone`] instead of end-of-stream
    pub segment: bool,
    /// Drop queued events and clear the flushing flag
    pub flush: bool,
}

impl SeekRequest {
    pub fn new(start: u64) -> Self {
        Self {
            rate: 1.0,
            start,
            stop: None,
            key_unit: false,
            segment: false,
            flush: true,
        }
    }

    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn stop(mut self, stop: u64) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn key_unit(mut self, key_unit: bool) -> Self {
        self.key_unit = key_unit;
        self
    }

    pub fn segment(mut self, segment: bool) -> Self {
        self.segment = segment;
        self
    }

    pub fn flush(mut self, flush: bool) -> Self {
        self.flush = flush;
        self
    }
}

impl<S: ByteSource> Demuxer<S> {
    /// Seek every stream to `request.start`.
    ///
    /// In pull mode reading continues at the new position. In push mode an
    /// [`Event::UpstreamSeek`] tells where the next bytes must come from.
    pub fn seek(&mut self, request: SeekRequest) -> Result<()> {
        if request.rate.is_nan() || request.rate <= 0.0 {
            return Err(Error::Unsupported("only forward playback is supported".into()));
        }
        if self.cursors.is_empty() {
            return Err(Error::InvalidState("no streams to seek".into()));
        }
        tracing::debug!(
            start = request.start,
            stop = request.stop,
            key_unit = request.key_unit,
            segment = request.segment,
            "seek"
        );

        if request.flush {
            self.flush.stop();
            self.events.clear();
        }

        let mut start = request.start;
        if request.key_unit {
            start = self.keyframe_start(start)?;
            tracing::debug!(start, "keyframe seek moved start");
        }

        let targets = self.prepare_seek(start)?;
        let min = targets.iter().flatten().map(|(offset, _)| *offset).min();

        self.segment = Segment {
            rate: request.rate,
            start,
            stop: request.stop,
            time: start,
            position: start,
            duration: self.duration(),
            segment_seek: request.segment,
        };
        self.last_redirect = None;
        self.finished = false;

        for (ci, target) in targets.iter().enumerate() {
            if target.is_none() && !self.cursors[ci].eos {
                self.cursors[ci].eos = true;
            }
            if self.cursors[ci].eos {
                let track_id = self.cursors[ci].track_id;
                self.cursors[ci].need_segment = false;
                self.events.push_back(Event::Segment {
                    track_id,
                    segment: self.segment.clone(),
                });
                if !self.segment.segment_seek {
                    self.events.push_back(Event::Eos { track_id });
                }
            }
        }

        let Some(min) = min else {
            if !self.random_access {
                return Err(Error::not_found("offset to seek to"));
            }
            tracing::debug!("seek past the end of every stream");
            return self.finish();
        };

        for t in &mut self.essence_tracks {
            t.position = None;
        }
        for (ci, target) in targets.iter().enumerate() {
            if let Some((offset, position)) = *target {
                if offset == min {
                    let et = self.cursors[ci].current_essence_track;
                    self.essence_tracks[et].position = Some(position);
                }
            }
        }

        self.move_to(min);
        if self.random_access {
            tracing::debug!(offset = min, "seeking in file");
        } else {
            self.adapter.clear();
            self.events.push_back(Event::UpstreamSeek {
                offset: self.run_in + min,
            });
        }
        Ok(())
    }

    /// Earliest keyframe time at or before `start` over all streams.
    fn keyframe_start(&mut self, start: u64) -> Result<u64> {
        let saved = self.cursors.clone();
        let metadata = Arc::clone(&self.metadata);
        let mut earliest = start;
        for ci in 0..self.cursors.len() {
            {
                let store = metadata.read();
                self.set_cursor_position(&store, ci, start)?;
            }
            if self.cursors[ci].eos {
                continue;
            }
            let et = self.cursors[ci].current_essence_track;
            let mut position = self.cursors[ci].current_essence_track_position;
            if self.find_essence_element(et, &mut position, true)?.is_some() {
                earliest = earliest.min(self.stream_time(ci, position));
            }
        }
        self.cursors = saved;
        Ok(earliest)
    }

    /// Position every cursor at `start` and find where its essence is.
    ///
    /// Returns per cursor the header-relative offset and essence position
    /// to continue from, `None` for cursors that ended.
    fn prepare_seek(&mut self, start: u64) -> Result<Vec<Option<(u64, u64)>>> {
        let metadata = Arc::clone(&self.metadata);
        let mut targets = Vec::with_capacity(self.cursors.len());
        for ci in 0..self.cursors.len() {
            {
                let store = metadata.read();
                self.set_cursor_position(&store, ci, start)?;
            }
            if self.cursors[ci].eos {
                targets.push(None);
                continue;
            }
            let et = self.cursors[ci].current_essence_track;
            let mut position = self.cursors[ci].current_essence_track_position;
            match self.find_essence_element(et, &mut position, false)? {
                Some(offset) => targets.push(Some((offset, position))),
                None => {
                    tracing::debug!(track_id = self.cursors[ci].track_id, "no essence at seek position");
                    targets.push(None);
                }
            }
        }
        Ok(targets)
    }

    /// Move cursor `ci` to material time `start`.
    pub(super) fn set_cursor_position(
        &mut self,
        store: &MetadataStore,
        ci: usize,
        start: u64,
    ) -> Result<()> {
        let mat_rate = self.cursors[ci].material_edit_rate;
        let material_position = time_to_units(start, mat_rate);
        {
            let c = &mut self.cursors[ci];
            c.position = units_to_time(material_position, mat_rate);
            c.position_accumulated_error = 0.0;
            c.current_material_track_position = material_position;
            c.discont = true;
            c.need_segment = true;
            c.eos = false;
        }

        if self.cursors[ci].current_component.is_some() {
            let durations: Vec<i64> = store
                .track(&self.cursors[ci].material_track)
                .map(|t| store.track_components(t).iter().map(|c| c.duration).collect())
                .unwrap_or_default();
            let mut component_start = 0u64;
            let mut index = None;
            for (i, duration) in durations.iter().enumerate() {
                if *duration < 0 || material_position < component_start + *duration as u64 {
                    index = Some(i);
                    break;
                }
                component_start += *duration as u64;
            }

            let Some(index) = index else {
                // past the end: clamp to the end of the last component
                let c = &mut self.cursors[ci];
                c.current_material_track_position = component_start;
                c.position = units_to_time(component_start, mat_rate);
                if !durations.is_empty() {
                    self.set_component(store, ci, durations.len())?;
                }
                self.cursors[ci].eos = true;
                return Ok(());
            };
            if self.set_component(store, ci, index)? {
                self.cursors[ci].eos = true;
                return Ok(());
            }
            let c = &self.cursors[ci];
            let src_rate = self.essence_tracks[c.current_essence_track].edit_rate;
            let into = rescale_units(
                material_position - c.current_component_start_position,
                mat_rate,
                src_rate,
            );
            self.cursors[ci].current_essence_track_position += into;
        } else {
            let c = &mut self.cursors[ci];
            let duration = self.essence_tracks[c.current_essence_track].duration;
            if duration > 0 && material_position >= duration {
                c.current_material_track_position = duration;
                c.current_essence_track_position = duration;
                c.position = units_to_time(duration, mat_rate);
                c.eos = true;
            } else {
                c.current_essence_track_position = material_position;
            }
        }
        Ok(())
    }

    /// Stream time of essence position `position` on cursor `ci`.
    pub(super) fn stream_time(&self, ci: usize, position: u64) -> u64 {
        let c = &self.cursors[ci];
        let src_rate = self.essence_tracks[c.current_essence_track].edit_rate;
        units_to_time(position.saturating_sub(c.current_component_start), src_rate)
            + units_to_time(c.current_component_start_position, c.material_edit_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::demux::OutputBuffer;
    use crate::source::MemorySource;
    use crate::test_utils::MxfBuilder;

    const FRAME: u64 = 40_000_000;

    fn demuxer(file: Vec<u8>) -> Demuxer<MemorySource> {
        let mut demuxer =
            Demuxer::with_registry(MemorySource::new(file), DemuxConfig::new(), MxfBuilder::registry());
        while demuxer.stream_count() == 0 {
            demuxer.step().unwrap();
        }
        demuxer
    }

    fn drain(demuxer: &mut Demuxer<MemorySource>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = demuxer.next_event().unwrap() {
            out.push(event);
        }
        out
    }

    fn buffers(events: &[Event]) -> Vec<&OutputBuffer> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Buffer(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reverse_rate_rejected() {
        let mut demuxer = demuxer(MxfBuilder::single_track(3).build().data);
        let err = demuxer.seek(SeekRequest::new(0).rate(-1.0)).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_seek_with_index() {
        let file = MxfBuilder::single_track(6).with_index().build();
        let mut demuxer = demuxer(file.data);
        demuxer.seek(SeekRequest::new(3 * FRAME)).unwrap();
        let events = drain(&mut demuxer);

        assert!(matches!(
            events.first(),
            Some(Event::Segment { segment, .. }) if segment.start == 3 * FRAME
        ));
        let out = buffers(&events);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].offset, 3);
        assert_eq!(out[0].dts, Some(3 * FRAME));
        assert!(out[0].discont);
    }

    #[test]
    fn test_seek_without_index_scans() {
        let file = MxfBuilder::single_track(6).build();
        let mut demuxer = demuxer(file.data);
        demuxer.seek(SeekRequest::new(4 * FRAME)).unwrap();
        let out_events = drain(&mut demuxer);
        let out = buffers(&out_events);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].offset, 4);
    }

    #[test]
    fn test_segment_seek_ends_with_segment_done() {
        let file = MxfBuilder::single_track(6).with_index().build();
        let mut demuxer = demuxer(file.data);
        demuxer
            .seek(SeekRequest::new(0).stop(2 * FRAME).segment(true))
            .unwrap();
        let events = drain(&mut demuxer);
        assert_eq!(buffers(&events).len(), 2);
        assert!(!events.iter().any(|e| matches!(e, Event::Eos { .. })));
        assert!(matches!(
            events.last(),
            Some(Event::SegmentDone { position }) if *position == 2 * FRAME
        ));
    }

    #[test]
    fn test_seek_past_end_finishes() {
        let file = MxfBuilder::single_track(3).with_index().build();
        let mut demuxer = demuxer(file.data);
        demuxer.seek(SeekRequest::new(10 * FRAME)).unwrap();
        let events = drain(&mut demuxer);
        assert!(buffers(&events).is_empty());
        assert!(events.iter().any(|e| matches!(e, Event::Eos { track_id: 1 })));

        // clamped to the end of the last component
        let c = &demuxer.cursors[0];
        assert!(c.eos);
        assert_eq!(c.position, 3 * FRAME);
        assert_eq!(c.current_material_track_position, 3);
        assert_eq!(c.current_component, Some(0));
        assert_eq!(c.current_essence_track_position, 3);
    }

    #[test]
    fn test_push_seek_asks_upstream() {
        let file = MxfBuilder::single_track(6).with_index_in_header().build();
        let mut demuxer = Demuxer::push_mode(DemuxConfig::new(), MxfBuilder::registry());
        demuxer
            .push(&file.data[..file.essence_offsets[1] as usize])
            .unwrap();
        while demuxer.next_event().unwrap().is_some() {}

        demuxer.seek(SeekRequest::new(4 * FRAME)).unwrap();
        let mut upstream = None;
        while let Some(event) = demuxer.next_event().unwrap() {
            if let Event::UpstreamSeek { offset } = event {
                upstream = Some(offset);
            }
        }
        assert_eq!(upstream, Some(file.essence_offsets[4]));
    }
}
