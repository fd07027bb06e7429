//! Essence tracks: the streams stored in the file's essence containers.
//!
//! An essence track is one timeline track of a source package linked to an
//! essence container (BodySID). It carries the read position, the fallback
//! index built while scanning, and the handler used to map its elements.

mod handler;
mod raw_audio;

pub use handler::{
    CapsValue, EssenceHandler, EssenceMapping, HandlerRegistry, MediaCaps, Tags, TrackDescription,
};
pub use raw_audio::RawAudioHandler;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{DeltaId, EditEntry};
use crate::metadata::{MetadataStore, Package};
use crate::time::{scale, Rational, MSECOND, SECOND};
use crate::ul::{Umid, Uuid};

/// How edit units are laid out in KLV packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrapping {
    /// One KLV per edit unit
    Frame,
    /// One KLV for the whole track
    Clip,
    /// Format specific layout
    Custom,
    /// No handler; read like clip wrapping
    #[default]
    Unknown,
}

impl Wrapping {
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Clip => "clip",
            Self::Custom => "custom",
            Self::Unknown => "unknown",
        }
    }
}

/// One essence track of an essence container
#[derive(Debug, Clone)]
pub struct EssenceTrack {
    pub track_id: u32,
    pub track_number: u32,
    pub body_sid: u32,
    pub index_sid: u32,
    pub delta_id: DeltaId,
    pub source_package_uid: Umid,
    /// Edit unit of the next element, `None` when it must be looked up
    pub position: Option<u64>,
    /// Duration in edit units, 0 when unknown
    pub duration: u64,
    pub edit_rate: Rational,
    /// Entries discovered while scanning, by position. An entry with
    /// offset 0 is unused.
    pub offsets: Vec<EditEntry>,
    pub wrapping: Wrapping,
    pub intra_only: bool,
    /// Edit units output per buffer
    pub min_edit_units: u32,
    pub handler: Option<Arc<dyn EssenceHandler>>,
    pub mapping: Option<EssenceMapping>,
    /// Source track as seen by the handler
    pub description: TrackDescription,
    pub source_package: Option<Uuid>,
    pub source_track: Option<Uuid>,
}

impl EssenceTrack {
    pub fn new(track_id: u32, track_number: u32, body_sid: u32, index_sid: u32) -> Self {
        Self {
            track_id,
            track_number,
            body_sid,
            index_sid,
            delta_id: DeltaId::Unknown,
            source_package_uid: Umid::default(),
            position: None,
            duration: 0,
            edit_rate: Rational::default(),
            offsets: Vec::new(),
            wrapping: Wrapping::Unknown,
            intra_only: false,
            min_edit_units: 1,
            handler: None,
            mapping: None,
            description: TrackDescription::default(),
            source_package: None,
            source_track: None,
        }
    }

    pub fn caps(&self) -> Option<&MediaCaps> {
        self.mapping.as_ref().map(|m| &m.caps)
    }

    /// Remember an entry found while scanning.
    pub fn record_entry(&mut self, position: u64, entry: EditEntry) {
        let Ok(idx) = usize::try_from(position) else {
            return;
        };
        if idx >= self.offsets.len() {
            self.offsets.resize(idx + 1, EditEntry::default());
        }
        self.offsets[idx] = entry;
    }
}

/// Index of the track with this number in this essence container.
pub fn find_track(tracks: &[EssenceTrack], body_sid: u32, track_number: u32) -> Option<usize> {
    tracks
        .iter()
        .position(|t| t.body_sid == body_sid && t.track_number == track_number)
}

/// Edit units per output buffer: about 25 ms worth for raw audio with edit
/// units shorter than 10 ms, otherwise 1.
pub fn min_edit_units(edit_rate: Rational, caps: Option<&MediaCaps>) -> u32 {
    let (n, d) = edit_rate.terms();
    if n == 0 || d == 0 {
        return 1;
    }
    if scale(SECOND, d, n) >= 10 * MSECOND || !caps.is_some_and(|c| c.is_raw_audio()) {
        return 1;
    }
    let units = scale(25 * MSECOND, n, d.saturating_mul(SECOND));
    u32::try_from(units).unwrap_or(u32::MAX).max(1)
}

fn same_rate(a: Rational, b: Rational) -> bool {
    i64::from(a.n) * i64::from(b.d) == i64::from(a.d) * i64::from(b.n)
}

/// Every essence track of an interleaved package must share one edit rate.
fn check_common_edit_rate(store: &MetadataStore, package: &Package) -> Result<()> {
    let mut common: Option<Rational> = None;
    for (_, track) in store.package_tracks(package) {
        if !track.is_timeline() || !track.track_type.is_essence() || !track.edit_rate.is_valid() {
            continue;
        }
        match common {
            None => common = Some(track.edit_rate),
            Some(rate) if !same_rate(rate, track.edit_rate) => {
                tracing::error!(
                    first = %rate,
                    second = %track.edit_rate,
                    "interleaved package tracks don't share a common edit rate"
                );
                return Err(Error::InconsistentEditRate {
                    first: rate.to_string(),
                    second: track.edit_rate.to_string(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Synchronize `tracks` with the resolved metadata.
///
/// Walks every essence container, creating or refreshing one track per
/// essence timeline track of its linked source package. `current` is the
/// (BodySID, BodyOffset) of the current partition: new tracks of that
/// container starting at body offset 0 begin at position 0.
pub fn update_essence_tracks(
    tracks: &mut Vec<EssenceTrack>,
    store: &MetadataStore,
    registry: &HandlerRegistry,
    current: Option<(u32, u64)>,
) -> Result<()> {
    if store.content_storage().is_none() {
        return Err(Error::PrefaceUnresolved);
    }

    for ecd in store.essence_containers() {
        let Some(package_uid) = ecd.linked_package else {
            tracing::warn!(body_sid = ecd.body_sid, "linked package not resolved");
            continue;
        };
        let Some(package) = store.package(&package_uid) else {
            continue;
        };
        if package.tracks.is_empty() {
            tracing::warn!(body_sid = ecd.body_sid, "linked package with no resolved tracks");
            continue;
        }

        if package.is_interleaved {
            check_common_edit_rate(store, package)?;
        }

        for (track_uid, track) in store.package_tracks(package) {
            if !track.is_timeline() {
                continue;
            }
            if !track.track_type.is_essence() {
                tracing::debug!(
                    track_id = track.track_id,
                    track_number = format!("{:#010x}", track.track_number),
                    track_type = track.track_type.as_str(),
                    "skipping non-essence track"
                );
                continue;
            }
            if !track.edit_rate.is_valid() {
                tracing::warn!(track_id = track.track_id, "invalid edit rate");
                continue;
            }

            let existing = find_track(tracks, ecd.body_sid, track.track_number);
            if let Some(idx) = existing {
                let t = &tracks[idx];
                if t.track_id != track.track_id || t.source_package_uid != package.package_uid {
                    tracing::error!(
                        track_number = format!("{:#010x}", track.track_number),
                        body_sid = ecd.body_sid,
                        "a different track with this track number and body SID exists, ignoring"
                    );
                    continue;
                }
            }

            let mut etrack = match existing {
                Some(idx) => tracks[idx].clone(),
                None => {
                    let mut t = EssenceTrack::new(
                        track.track_id,
                        track.track_number,
                        ecd.body_sid,
                        ecd.index_sid,
                    );
                    t.source_package_uid = package.package_uid;
                    if current == Some((ecd.body_sid, 0)) {
                        t.position = Some(0);
                    }
                    t
                }
            };
            etrack.source_package = None;
            etrack.source_track = None;
            etrack.delta_id = DeltaId::Unknown;

            let Some(sequence) = track.sequence.and_then(|s| store.sequence(&s)) else {
                tracing::warn!(track_id = track.track_id, "source track has no sequence");
                continue;
            };
            if track.descriptors.is_empty() {
                tracing::warn!(track_id = track.track_id, "source track has no descriptors");
                continue;
            }
            if sequence.duration > 0 && sequence.duration as u64 > etrack.duration {
                etrack.duration = sequence.duration as u64;
            }

            let description = TrackDescription {
                track_id: track.track_id,
                track_number: track.track_number,
                track_type: track.track_type,
                edit_rate: track.edit_rate,
                name: track.name.clone(),
                descriptors: track
                    .descriptors
                    .iter()
                    .filter_map(|d| store.descriptor(d).cloned())
                    .collect(),
            };

            etrack.handler = registry.find(&description);
            let mapping = match &etrack.handler {
                Some(handler) => {
                    tracing::debug!(track_id = track.track_id, handler = handler.name(), "found essence handler");
                    handler.build_caps(&description)
                }
                None => {
                    tracing::warn!(track_id = track.track_id, "no essence element handler for track");
                    handler::fallback_caps(&description).map(EssenceMapping::new)
                }
            };
            match mapping {
                Some(mapping) => {
                    tracing::debug!(track_id = track.track_id, caps = %mapping.caps, "created caps");
                    etrack.intra_only = mapping.intra_only;
                    etrack.mapping = Some(mapping);
                }
                None if existing.is_none() => {
                    tracing::warn!(track_id = track.track_id, "no caps created, ignoring stream");
                    continue;
                }
                None => tracing::warn!(track_id = track.track_id, "couldn't create updated caps for stream"),
            }

            etrack.edit_rate = track.edit_rate;
            etrack.min_edit_units = min_edit_units(track.edit_rate, etrack.caps());
            etrack.wrapping = match &etrack.handler {
                Some(handler) => handler.classify_wrapping(&description),
                None => Wrapping::Unknown,
            };

            if package.is_interleaved && !etrack.wrapping.is_frame() {
                return Err(Error::Unsupported(
                    "non-frame wrapping in an interleaved file package".into(),
                ));
            }

            etrack.description = description;
            etrack.source_package = Some(package_uid);
            etrack.source_track = Some(track_uid);

            match existing {
                Some(idx) => tracks[idx] = etrack,
                None => tracks.push(etrack),
            }
        }
    }

    if tracks.is_empty() {
        tracing::error!("no valid essence tracks in this file");
        return Err(Error::NoValidTracks);
    }
    if let Some(t) = tracks
        .iter()
        .find(|t| t.source_package.is_none() || t.source_track.is_none() || t.mapping.is_none())
    {
        return Err(Error::InvalidState(format!(
            "failed to update essence track {}",
            t.track_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MetadataBuilder;
    use crate::ul::TrackType;

    #[test]
    fn test_min_edit_units() {
        let audio = MediaCaps::new("audio/x-raw");
        assert_eq!(min_edit_units(Rational::new(48000, 1), Some(&audio)), 1200);
        assert_eq!(min_edit_units(Rational::new(25, 1), Some(&audio)), 1);
        let video = MediaCaps::new("video/x-raw");
        assert_eq!(min_edit_units(Rational::new(48000, 1), Some(&video)), 1);
        assert_eq!(min_edit_units(Rational::new(0, 1), Some(&audio)), 1);
    }

    #[test]
    fn test_record_entry_pads_cache() {
        let mut t = EssenceTrack::new(1, 2, 1, 0);
        t.record_entry(
            3,
            EditEntry {
                offset: 500,
                initialized: true,
                ..Default::default()
            },
        );
        assert_eq!(t.offsets.len(), 4);
        assert_eq!(t.offsets[0].offset, 0);
        assert_eq!(t.offsets[3].offset, 500);
    }

    #[test]
    fn test_update_creates_tracks() {
        let mut store = MetadataBuilder::new().single_track_file().build_store();
        store.resolve().unwrap();
        let mut tracks = Vec::new();
        update_essence_tracks(&mut tracks, &store, &HandlerRegistry::new(), Some((1, 0))).unwrap();

        assert_eq!(tracks.len(), 1);
        let t = &tracks[0];
        assert_eq!(t.body_sid, 1);
        assert_eq!(t.position, Some(0));
        assert_eq!(t.duration, 10);
        assert_eq!(t.wrapping, Wrapping::Unknown);
        assert_eq!(t.description.track_type, TrackType::Picture);
        assert!(t.caps().unwrap().media_type.starts_with("video/x-mxf-"));

        // a second update keeps the same track
        update_essence_tracks(&mut tracks, &store, &HandlerRegistry::new(), None).unwrap();
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn test_interleaved_edit_rates_must_match() {
        let mut store = MetadataBuilder::new()
            .interleaved_file(Rational::new(25, 1), Rational::new(48000, 1))
            .build_store();
        store.resolve().unwrap();
        let mut tracks = Vec::new();
        let err = update_essence_tracks(&mut tracks, &store, &HandlerRegistry::with_builtin(), None)
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentEditRate { .. }));
    }
}
