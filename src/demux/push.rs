//! Push mode: the caller delivers the bytes.

use super::{Demuxer, Event, PushSource, ReadState};
use crate::config::DemuxConfig;
use crate::error::{Error, Result};
use crate::essence::HandlerRegistry;
use crate::klv::{ber_field_size, parse_header, MIN_KLV_HEADER};
use crate::ul::Ul;

impl Demuxer<PushSource> {
    /// Push-mode demuxer. Feed it with [`push`](Self::push) and collect
    /// events with [`next_event`](Self::next_event).
    pub fn push_mode(config: DemuxConfig, registry: HandlerRegistry) -> Self {
        Self::build(PushSource, false, config, registry)
    }

    /// Deliver the bytes following the previous ones.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        let offset = self.offset + self.adapter.available() as u64;
        self.push_at(offset, data)
    }

    /// Deliver bytes starting at absolute file offset `offset`.
    ///
    /// An offset other than where the previous data ended is a
    /// discontinuity: buffered bytes are dropped and track positions are
    /// learned again from the index.
    pub fn push_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_flushing()?;
        let expected = self.offset + self.adapter.available() as u64;
        if offset != expected {
            self.discontinuity(offset);
        }
        self.adapter.push(data);
        self.chain()
    }

    /// No more data will come.
    ///
    /// Streams with essence left elsewhere in the file produce an
    /// [`Event::UpstreamSeek`] instead of finishing.
    pub fn push_eos(&mut self) -> Result<()> {
        self.check_flushing()?;
        if !self.cursors.is_empty() {
            self.mark_durations_at_eos();
            self.eos_finished_cursors();

            if let Some(ci) = self.earliest_cursor() {
                let et = self.cursors[ci].current_essence_track;
                let mut position = self.cursors[ci].current_essence_track_position;
                if let Some(offset) = self.find_essence_element(et, &mut position, false)? {
                    if self.jump_to_essence(et, offset, position)? {
                        self.adapter.clear();
                        tracing::debug!(offset, position, "asking upstream for remaining essence");
                        self.events.push_back(Event::UpstreamSeek {
                            offset: self.run_in + offset,
                        });
                        return Ok(());
                    }
                }
            }
        }
        self.finish()
    }

    fn discontinuity(&mut self, offset: u64) {
        tracing::debug!(from = self.offset, to = offset, "discontinuity");
        self.adapter.clear();
        self.offset = offset;
        if self.state == ReadState::Unknown {
            return;
        }
        self.state = ReadState::Klv;
        let relative = offset.saturating_sub(self.run_in);
        self.current_partition = self
            .partitions
            .containing(relative)
            .map(|p| p.this_partition());
        for t in &mut self.essence_tracks {
            t.position = None;
        }
        for c in &mut self.cursors {
            c.discont = true;
        }
    }

    /// Handle every complete packet in the adapter.
    fn chain(&mut self) -> Result<()> {
        loop {
            self.check_flushing()?;
            if self.state == ReadState::Unknown && !self.sync_header()? {
                return Ok(());
            }

            let needed = match self.adapter.peek(MIN_KLV_HEADER) {
                Some(head) => 16 + ber_field_size(head[16])?,
                None => return Ok(()),
            };
            let Some(head) = self.adapter.peek(needed) else {
                return Ok(());
            };
            let mut klv = parse_header(head, self.offset - self.run_in)?;
            if klv.length > self.config.max_klv_length {
                return Err(Error::malformed(
                    klv.offset,
                    format!("KLV payload of {} bytes is too large", klv.length),
                ));
            }

            let total = klv.total_size();
            if (self.adapter.available() as u64) < total {
                return Ok(());
            }
            let Some(packet) = self.adapter.take(total as usize) else {
                return Ok(());
            };
            klv.payload = Some(packet.slice(klv.data_offset as usize..));
            self.offset += total;

            self.handle_klv_packet(&mut klv, false)?;
        }
    }

    /// Skip the run-in. Returns false until the header partition pack
    /// key has arrived.
    fn sync_header(&mut self) -> Result<bool> {
        let found = {
            let data = self.adapter.peek(self.adapter.available()).unwrap_or_default();
            data.windows(16)
                .position(|w| Ul::from_slice(w).is_some_and(|ul| ul.is_header_partition_pack()))
        };

        match found {
            Some(skip) => {
                self.adapter.flush(skip);
                self.offset += skip as u64;
                if self.offset > self.config.max_run_in {
                    return Err(Error::InvalidState("no header partition pack found".into()));
                }
                self.run_in = self.offset;
                self.state = ReadState::Klv;
                tracing::debug!(run_in = self.run_in, "found header partition pack");
                Ok(true)
            }
            None => {
                let drop = self.adapter.available().saturating_sub(15);
                self.adapter.flush(drop);
                self.offset += drop as u64;
                if self.offset > self.config.max_run_in {
                    return Err(Error::InvalidState("no header partition pack found".into()));
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MxfBuilder;

    fn push_all(demuxer: &mut Demuxer, data: &[u8], chunk: usize) {
        for part in data.chunks(chunk) {
            demuxer.push(part).unwrap();
        }
    }

    fn drain(demuxer: &mut Demuxer) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = demuxer.next_event().unwrap() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_small_chunks() {
        let file = MxfBuilder::single_track(3).with_run_in(40).build();
        let mut demuxer = Demuxer::push_mode(DemuxConfig::new(), MxfBuilder::registry());
        push_all(&mut demuxer, &file.data, 7);
        demuxer.push_eos().unwrap();

        let events = drain(&mut demuxer);
        let buffers = events.iter().filter(|e| matches!(e, Event::Buffer(_))).count();
        assert_eq!(buffers, 3);
        assert_eq!(demuxer.run_in, 40);
        assert!(matches!(events.last(), Some(Event::Eos { track_id: 1 })));
    }

    #[test]
    fn test_missing_header_in_run_in() {
        let mut demuxer = Demuxer::push_mode(DemuxConfig::new().max_run_in(64), MxfBuilder::registry());
        demuxer.push(&[0u8; 40]).unwrap();
        assert!(matches!(demuxer.push(&[0u8; 60]), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_discontinuity_resets_positions() {
        let file = MxfBuilder::single_track(3).build();
        let mut demuxer = Demuxer::push_mode(DemuxConfig::new(), MxfBuilder::registry());
        demuxer.push(&file.data[..file.essence_offsets[1] as usize]).unwrap();
        assert_eq!(demuxer.essence_tracks[0].position, Some(1));

        let resume = file.essence_offsets[2] as usize;
        demuxer.push_at(resume as u64, &file.data[resume..]).unwrap();
        // without an index the element can't be placed
        assert!(demuxer.cursors[0].discont);
        let buffers = drain(&mut demuxer)
            .into_iter()
            .filter(|e| matches!(e, Event::Buffer(_)))
            .count();
        assert_eq!(buffers, 1);
    }
}
