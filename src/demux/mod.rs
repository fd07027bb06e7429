//! The demultiplexing engine.
//!
//! A [`Demuxer`] turns the KLV packets of an MXF file into timed buffers,
//! one output stream per essence track of the played package. It runs in
//! one of two modes:
//!
//! - **pull**: the demuxer owns a [`ByteSource`] and reads what it needs,
//!   seeking directly inside the file. Drive it with
//!   [`Demuxer::next_event`].
//! - **push**: the caller delivers bytes with [`Demuxer::push`]; seeks and
//!   end-of-stream redirects are turned into [`Event::UpstreamSeek`]
//!   requests.
//!
//! # Example
//!
//! ```no_run
//! use mxf_demux::{DemuxConfig, Demuxer, Event};
//!
//! # fn main() -> mxf_demux::Result<()> {
//! let mut demuxer = Demuxer::open("clip.mxf", DemuxConfig::new())?;
//! while let Some(event) = demuxer.next_event()? {
//!     if let Event::Buffer(buffer) = event {
//!         println!("track {} dts {:?}", buffer.track_id, buffer.dts);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod element;
mod handlers;
mod pull;
mod push;
mod seek;
mod tracks;

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::{DemuxConfig, MIN_MAX_DRIFT};
use crate::cursor::OutputTrackCursor;
use crate::error::{Error, Result};
use crate::essence::{EssenceTrack, HandlerRegistry, MediaCaps, Tags};
use crate::index::IndexTables;
use crate::metadata::{MetadataStore, StructureNode};
use crate::partition::{PartitionTable, RandomIndexPack};
use crate::source::{ByteSource, PushAdapter, ReaderSource};
use crate::time::{units_to_time, Timecode};
use crate::ul::Uuid;

pub use seek::SeekRequest;

/// What the next read is expected to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadState {
    /// Looking for the header partition pack
    Unknown,
    /// A KLV key
    Klv,
    /// More bytes of the current clip or custom wrapped KLV
    Essence,
}

/// Cancels the step in progress from another thread
///
/// While flushing, every drive call returns [`Error::Flushing`]. A flushing
/// seek clears the flag again.
#[derive(Debug, Clone, Default)]
pub struct FlushHandle(Arc<AtomicBool>);

impl FlushHandle {
    pub fn start(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_flushing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Byte source of a push-mode demuxer, which never reads on its own
#[derive(Debug, Clone, Copy, Default)]
pub struct PushSource;

impl ByteSource for PushSource {
    fn pull_range(&mut self, _offset: u64, _size: usize) -> Result<Bytes> {
        Err(Error::Unsupported("random access in push mode".into()))
    }

    fn size(&mut self) -> Option<u64> {
        None
    }
}

/// Unit of [`Demuxer::position`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Nanoseconds
    Time,
    /// Edit units of the material track
    EditUnits,
}

/// The playback range, in nanoseconds
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub rate: f64,
    pub start: u64,
    pub stop: Option<u64>,
    /// Stream time corresponding to `start`
    pub time: u64,
    /// Highest timestamp output so far
    pub position: u64,
    pub duration: Option<u64>,
    /// Finish with [`Event::SegmentDone`] instead of end-of-stream
    pub segment_seek: bool,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            rate: 1.0,
            start: 0,
            stop: None,
            time: 0,
            position: 0,
            duration: None,
            segment_seek: false,
        }
    }
}

/// A timed piece of essence
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBuffer {
    pub track_id: u32,
    pub data: Bytes,
    /// Presentation timestamp, `None` when the index doesn't tell
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub duration: Option<u64>,
    /// Material track position of the first edit unit
    pub offset: u64,
    /// First buffer after a start, seek or redirect
    pub discont: bool,
    /// Not decodable on its own
    pub delta_unit: bool,
    pub timecode: Option<Timecode>,
}

/// Output of the demuxer
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new output stream
    StreamStart { track_id: u32, caps: MediaCaps },
    /// Every stream of the package has been announced
    NoMoreStreams,
    Segment { track_id: u32, segment: Segment },
    Tags { track_id: u32, tags: Tags },
    Buffer(OutputBuffer),
    /// The element produced no data
    Gap {
        track_id: u32,
        timestamp: u64,
        duration: u64,
    },
    Eos { track_id: u32 },
    /// End of a segment seek
    SegmentDone { position: u64 },
    /// Push mode: deliver data from this absolute offset next
    UpstreamSeek { offset: u64 },
}

/// MXF demultiplexer
///
/// Pull-mode demuxers are created with [`Demuxer::new`] or
/// [`Demuxer::open`], push-mode ones with [`Demuxer::push_mode`].
pub struct Demuxer<S = PushSource> {
    source: S,
    random_access: bool,
    config: DemuxConfig,
    registry: HandlerRegistry,
    flush: FlushHandle,

    state: ReadState,
    run_in: u64,
    /// Absolute offset of the next read
    offset: u64,

    partitions: PartitionTable,
    current_partition: Option<u64>,
    footer_partition_pack_offset: u64,
    random_index_pack: Option<RandomIndexPack>,
    index_tables: IndexTables,
    index_table_segments_collected: bool,
    footer_metadata_parsed: bool,

    metadata: Arc<RwLock<MetadataStore>>,
    update_metadata: bool,

    essence_tracks: Vec<EssenceTrack>,
    cursors: Vec<OutputTrackCursor>,
    current_package: Option<Uuid>,
    current_package_string: Option<String>,
    requested_package: Option<String>,

    segment: Segment,
    adapter: PushAdapter,
    events: VecDeque<Event>,
    container_tags: Tags,
    finished: bool,
    /// Last redirect target as (essence track, position, offset)
    last_redirect: Option<(usize, u64, u64)>,
}

impl<S> std::fmt::Debug for Demuxer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer")
            .field("random_access", &self.random_access)
            .field("state", &self.state)
            .field("run_in", &self.run_in)
            .field("offset", &self.offset)
            .field("partitions", &self.partitions.len())
            .field("essence_tracks", &self.essence_tracks.len())
            .field("streams", &self.cursors.len())
            .finish()
    }
}

impl Demuxer<ReaderSource<File>> {
    /// Open a file for pull-mode demuxing with the built-in handlers.
    pub fn open(path: impl AsRef<Path>, config: DemuxConfig) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(ReaderSource::new(file), config))
    }
}

impl<S: ByteSource> Demuxer<S> {
    /// Pull-mode demuxer with the built-in handlers.
    pub fn new(source: S, config: DemuxConfig) -> Self {
        Self::with_registry(source, config, HandlerRegistry::with_builtin())
    }

    /// Pull-mode demuxer with the given essence handlers.
    pub fn with_registry(source: S, config: DemuxConfig, registry: HandlerRegistry) -> Self {
        Self::build(source, true, config, registry)
    }

    fn build(source: S, random_access: bool, config: DemuxConfig, registry: HandlerRegistry) -> Self {
        let config = DemuxConfig {
            max_drift: config.max_drift.max(MIN_MAX_DRIFT),
            ..config
        };
        Self {
            source,
            random_access,
            requested_package: config.requested_package.clone(),
            config,
            registry,
            flush: FlushHandle::default(),
            state: ReadState::Unknown,
            run_in: 0,
            offset: 0,
            partitions: PartitionTable::new(),
            current_partition: None,
            footer_partition_pack_offset: 0,
            random_index_pack: None,
            index_tables: IndexTables::new(),
            index_table_segments_collected: false,
            footer_metadata_parsed: false,
            metadata: Arc::new(RwLock::new(MetadataStore::new())),
            update_metadata: false,
            essence_tracks: Vec::new(),
            cursors: Vec::new(),
            current_package: None,
            current_package_string: None,
            segment: Segment::default(),
            adapter: PushAdapter::new(),
            events: VecDeque::new(),
            container_tags: Tags::new(),
            finished: false,
            last_redirect: None,
        }
    }

    /// Next output event, `None` once the stream is finished.
    ///
    /// In pull mode this reads as much as needed. In push mode it only
    /// returns events produced by earlier [`push`](Demuxer::push) calls.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if self.finished || !self.random_access {
                return Ok(None);
            }
            match self.step() {
                Ok(()) => {}
                Err(Error::EndOfStream) => self.finish()?,
                Err(Error::Flushing) => return Err(Error::Flushing),
                Err(e) => {
                    tracing::error!(error = %e, offset = self.offset, "demuxing failed");
                    self.finished = true;
                    return Err(e);
                }
            }
        }
    }

    /// Handle for cancelling the current step from another thread.
    pub fn flush_handle(&self) -> FlushHandle {
        self.flush.clone()
    }

    /// Shared handle on the metadata graph.
    pub fn metadata(&self) -> Arc<RwLock<MetadataStore>> {
        Arc::clone(&self.metadata)
    }

    /// Snapshot of the resolved structural metadata.
    pub fn structure(&self) -> Option<StructureNode> {
        self.metadata.read().structure()
    }

    /// UMID of the played package, or of the requested one until it is
    /// chosen.
    pub fn package(&self) -> Option<String> {
        self.current_package_string
            .clone()
            .or_else(|| self.requested_package.clone())
    }

    /// Play another package. Takes effect with the next packet.
    pub fn set_package(&mut self, umid: impl Into<String>) {
        self.requested_package = Some(umid.into());
    }

    pub fn max_drift(&self) -> u64 {
        self.config.max_drift
    }

    /// Set the maximum drift between streams, at least 100 ms.
    pub fn set_max_drift(&mut self, max_drift: u64) {
        self.config.max_drift = max_drift.max(MIN_MAX_DRIFT);
    }

    /// Number of output streams created so far.
    pub fn stream_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Position of the stream lagging behind the most.
    pub fn position(&self, format: Format) -> Option<u64> {
        let earliest = self.earliest_cursor().map(|ci| &self.cursors[ci]);
        match format {
            Format::Time => Some(earliest.map_or(self.segment.position, |c| c.position)),
            Format::EditUnits => earliest.map(|c| c.current_material_track_position),
        }
    }

    /// Duration of the longest stream.
    pub fn duration(&self) -> Option<u64> {
        let store = self.metadata.read();
        self.cursors
            .iter()
            .filter_map(|c| {
                let track = store.track(&c.material_track)?;
                let sequence = track.sequence.and_then(|s| store.sequence(&s))?;
                (sequence.duration > 0 && track.edit_rate.is_valid())
                    .then(|| units_to_time(sequence.duration as u64, track.edit_rate))
            })
            .max()
    }

    fn check_flushing(&self) -> Result<()> {
        if self.flush.is_flushing() {
            tracing::debug!("flushing");
            return Err(Error::Flushing);
        }
        Ok(())
    }

    /// Non-EOS cursor with the lowest position.
    fn earliest_cursor(&self) -> Option<usize> {
        self.cursors
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.eos)
            .min_by_key(|(_, c)| c.position)
            .map(|(i, _)| i)
    }

    fn set_cursor_eos(&mut self, ci: usize) {
        let Some(c) = self.cursors.get_mut(ci) else {
            return;
        };
        if !c.eos {
            tracing::debug!(track_id = c.track_id, "stream finished");
            c.eos = true;
            let track_id = c.track_id;
            if !self.segment.segment_seek {
                self.events.push_back(Event::Eos { track_id });
            }
        }
    }

    /// End of data: every track ends where it was last seen.
    fn mark_durations_at_eos(&mut self) {
        for t in &mut self.essence_tracks {
            if let Some(position) = t.position.filter(|p| *p > 0) {
                t.duration = position;
            }
        }
    }

    /// Mark every cursor that reached its essence track's duration as EOS.
    fn eos_finished_cursors(&mut self) {
        for ci in 0..self.cursors.len() {
            let c = &self.cursors[ci];
            let Some(t) = self.essence_tracks.get(c.current_essence_track) else {
                continue;
            };
            if !c.eos && t.duration > 0 && c.current_essence_track_position >= t.duration {
                self.set_cursor_eos(ci);
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if self.cursors.is_empty() {
            tracing::error!("no streams were created");
            return Err(Error::InvalidState("stream contains no data".into()));
        }

        if self.segment.segment_seek {
            let position = self
                .segment
                .stop
                .or_else(|| self.duration())
                .unwrap_or(self.segment.position);
            self.events.push_back(Event::SegmentDone { position });
        } else {
            for ci in 0..self.cursors.len() {
                self.set_cursor_eos(ci);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn test_flush_handle_is_shared() {
        let demuxer = Demuxer::new(MemorySource::new(Vec::new()), DemuxConfig::new());
        let handle = demuxer.flush_handle();
        handle.start();
        assert!(demuxer.check_flushing().is_err());
        handle.stop();
        assert!(demuxer.check_flushing().is_ok());
    }

    #[test]
    fn test_properties() {
        let mut demuxer = Demuxer::new(MemorySource::new(Vec::new()), DemuxConfig::new());
        assert_eq!(demuxer.max_drift(), MIN_MAX_DRIFT);
        demuxer.set_max_drift(1);
        assert_eq!(demuxer.max_drift(), MIN_MAX_DRIFT);
        demuxer.set_max_drift(2 * MIN_MAX_DRIFT);
        assert_eq!(demuxer.max_drift(), 2 * MIN_MAX_DRIFT);

        assert!(demuxer.package().is_none());
        demuxer.set_package("urn:smpte:umid:00");
        assert_eq!(demuxer.package().as_deref(), Some("urn:smpte:umid:00"));
        assert!(demuxer.structure().is_none());
        assert_eq!(demuxer.position(Format::Time), Some(0));
        assert_eq!(demuxer.position(Format::EditUnits), None);
        assert_eq!(demuxer.duration(), None);
    }

    #[test]
    fn test_empty_source_has_no_data() {
        let mut demuxer = Demuxer::new(MemorySource::new(Vec::new()), DemuxConfig::new());
        assert!(matches!(demuxer.next_event(), Err(Error::InvalidState(_))));
        assert!(demuxer.next_event().unwrap().is_none());
    }

    #[test]
    fn test_push_source_refuses_reads() {
        let mut source = PushSource;
        assert!(matches!(source.pull_range(0, 1), Err(Error::Unsupported(_))));
        assert_eq!(source.size(), None);
    }
}
