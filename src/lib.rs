//! Streaming demultiplexer core for MXF (SMPTE 377M) files.
//!
//! This crate turns the KLV packets of an MXF file into timestamped
//! elementary stream buffers, one output stream per essence track of the
//! played package.
//!
//! # Design Principles
//!
//! - **Streaming**: pull mode reads only what it needs; push mode accepts
//!   the file in arbitrary chunks
//! - **Lazy**: payloads are only fetched for packets that are decoded
//! - **Codec agnostic**: essence formats plug in through [`EssenceHandler`]
//! - **Tolerant**: incomplete headers, missing indexes and truncated files
//!   are recovered from where the file allows it
//!
//! # Quick Start (Pull Mode)
//!
//! ```no_run
//! use mxf_demux::{DemuxConfig, Demuxer, Event};
//!
//! # fn main() -> mxf_demux::Result<()> {
//! let mut demuxer = Demuxer::open("clip.mxf", DemuxConfig::new())?;
//! while let Some(event) = demuxer.next_event()? {
//!     match event {
//!         Event::StreamStart { track_id, caps } => println!("track {track_id}: {caps}"),
//!         Event::Buffer(buffer) => println!("{} bytes, pts {:?}", buffer.data.len(), buffer.pts),
//!         Event::Eos { track_id } => println!("track {track_id} done"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Push Mode
//!
//! When the bytes arrive from elsewhere, feed them in and act on
//! [`Event::UpstreamSeek`] requests:
//!
//! ```no_run
//! use mxf_demux::{DemuxConfig, Demuxer, Event, HandlerRegistry};
//!
//! # fn main() -> mxf_demux::Result<()> {
//! # let chunks: Vec<Vec<u8>> = Vec::new();
//! let mut demuxer = Demuxer::push_mode(DemuxConfig::new(), HandlerRegistry::with_builtin());
//! for chunk in &chunks {
//!     demuxer.push(chunk)?;
//!     while let Some(event) = demuxer.next_event()? {
//!         if let Event::UpstreamSeek { offset } = event {
//!             println!("continue reading at {offset}");
//!         }
//!     }
//! }
//! demuxer.push_eos()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Seeking
//!
//! ```no_run
//! use mxf_demux::{DemuxConfig, Demuxer, SeekRequest, SECOND};
//!
//! # fn main() -> mxf_demux::Result<()> {
//! let mut demuxer = Demuxer::open("clip.mxf", DemuxConfig::new())?;
//! while demuxer.stream_count() == 0 {
//!     demuxer.next_event()?;
//! }
//! demuxer.seek(SeekRequest::new(10 * SECOND).key_unit(true))?;
//! # Ok(())
//! # }
//! ```

mod config;
mod cursor;
mod demux;
mod error;
pub mod essence;
pub mod index;
pub mod klv;
pub mod metadata;
pub mod partition;
pub mod primer;
mod source;
pub mod time;
pub mod ul;

pub use config::{DemuxConfig, DEFAULT_MAX_DRIFT, DEFAULT_MAX_RUN_IN, MIN_MAX_DRIFT};
pub use demux::{Demuxer, Event, FlushHandle, Format, OutputBuffer, PushSource, SeekRequest, Segment};
pub use error::{Error, Result};
pub use essence::{
    CapsValue, EssenceHandler, EssenceMapping, HandlerRegistry, MediaCaps, RawAudioHandler, Tags,
    TrackDescription, Wrapping,
};
pub use metadata::{MetadataStore, StructureNode};
#[cfg(feature = "memory-mapped")]
pub use source::MmapSource;
pub use source::{ByteSource, MemorySource, ReaderSource};
pub use time::{Rational, Timecode, MSECOND, SECOND};

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
