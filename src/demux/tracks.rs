//! Output stream creation, package selection and component switching.

use std::sync::Arc;

use super::{Demuxer, Event};
use crate::cursor::OutputTrackCursor;
use crate::error::{Error, Result};
use crate::essence::update_essence_tracks;
use crate::metadata::{MetadataStore, Package};
use crate::source::ByteSource;
use crate::time::{rescale_units, Timecode};
use crate::ul::{TrackType, Umid, Uuid};

impl<S: ByteSource> Demuxer<S> {
    /// Synchronize essence tracks and output streams with the metadata.
    ///
    /// Streams are only created on the first successful run; later runs
    /// refresh the existing ones.
    pub(super) fn update_tracks(&mut self) -> Result<()> {
        let metadata = Arc::clone(&self.metadata);
        let store = metadata.read();

        let current = self
            .current_partition
            .and_then(|o| self.partitions.get(o))
            .map(|p| (p.body_sid(), p.pack.body_offset));
        update_essence_tracks(&mut self.essence_tracks, &store, &self.registry, current)?;

        let package_uid = self.choose_package(&store)?;
        let package = store
            .package(&package_uid)
            .ok_or_else(|| Error::not_found("chosen package"))?;
        if package.tracks.is_empty() {
            return Err(Error::InvalidState("package without tracks".into()));
        }
        if package.n_essence_tracks == 0 {
            tracing::error!("package has no essence tracks");
            return Err(Error::NoValidTracks);
        }

        let first_run = self.cursors.is_empty();
        for (track_uid, track) in store.package_tracks(package) {
            if !track.is_timeline() || !track.track_type.is_essence() {
                continue;
            }
            if !track.edit_rate.is_valid() {
                tracing::warn!(track_id = track.track_id, "track with invalid edit rate");
                continue;
            }

            let et = if package.is_material() {
                let clip = store
                    .track_components(track)
                    .into_iter()
                    .find_map(|c| c.source_clip());
                let Some((source_uid, source_track_uid)) = clip.and_then(|clip| {
                    let source_uid = clip.source_package?;
                    let source = store.package(&source_uid)?;
                    let (st, _) = store
                        .package_tracks(source)
                        .find(|(_, t)| t.track_id == clip.source_track_id)?;
                    Some((source_uid, st))
                }) else {
                    tracing::warn!(track_id = track.track_id, "material track without resolved source track");
                    continue;
                };
                self.essence_tracks.iter().position(|t| {
                    t.source_package == Some(source_uid) && t.source_track == Some(source_track_uid)
                })
            } else {
                self.essence_tracks.iter().position(|t| {
                    t.source_package == Some(package_uid) && t.source_track == Some(track_uid)
                })
            };
            let Some(et) = et else {
                tracing::warn!(track_id = track.track_id, "no essence track for stream");
                continue;
            };

            if let Some(c) = self.cursors.iter_mut().find(|c| c.track_id == track.track_id) {
                c.material_package = package_uid;
                c.material_track = track_uid;
                c.material_edit_rate = track.edit_rate;
                if c.current_component.is_none() {
                    c.current_essence_track = et;
                }
                c.caps = self.essence_tracks[et].caps().cloned();
                continue;
            }
            if !first_run {
                tracing::warn!(track_id = track.track_id, "new stream after all streams were announced, ignoring");
                continue;
            }

            let etrack = &self.essence_tracks[et];
            let Some(caps) = etrack.caps().cloned() else {
                continue;
            };
            let mut cursor =
                OutputTrackCursor::new(track.track_id, package_uid, track_uid, track.edit_rate, et);
            cursor.track_type = track.track_type;
            cursor.caps = Some(caps.clone());
            if let Some(mapping) = &etrack.mapping {
                cursor.tags = mapping.tags.clone();
            }
            if let Some(name) = &track.name {
                cursor.tags.insert("title".into(), name.clone());
            }
            if track.track_type == TrackType::Picture {
                cursor.start_timecode = start_timecode(&store, package);
            }

            self.cursors.push(cursor);
            let ci = self.cursors.len() - 1;
            if package.is_material() {
                if let Err(e) = self.set_component(&store, ci, 0) {
                    tracing::warn!(track_id = track.track_id, error = %e, "couldn't set first component");
                    self.cursors.pop();
                    continue;
                }
            }
            tracing::debug!(track_id = track.track_id, caps = %caps, "created stream");
            self.events.push_back(Event::StreamStart {
                track_id: track.track_id,
                caps,
            });
        }

        if first_run {
            if self.cursors.is_empty() {
                tracing::error!("no streams could be created");
                return Err(Error::NoValidTracks);
            }
            self.events.push_back(Event::NoMoreStreams);
        }
        drop(store);

        let offsets: Vec<u64> = self.partitions.iter().map(|p| p.this_partition()).collect();
        for offset in offsets {
            self.partition_postcheck(offset)?;
        }
        Ok(())
    }

    /// Pick the package to play.
    ///
    /// In order: the requested package if playable, the current package,
    /// the preface's primary package, the first material package.
    fn choose_package(&mut self, store: &MetadataStore) -> Result<Uuid> {
        if let Some(requested) = self.requested_package.take() {
            self.current_package_string = Some(requested);
        }

        let playable = |p: &Package| p.is_material() || (p.is_source() && p.top_level);
        let mut chosen = None;
        if let Some(s) = &self.current_package_string {
            match s.parse::<Umid>() {
                Ok(umid) => {
                    chosen = store
                        .package_by_umid(&umid)
                        .filter(|(_, p)| playable(p))
                        .map(|(uid, _)| uid);
                    if chosen.is_none() {
                        tracing::warn!(package = %s, "requested package not found or not playable");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "invalid package identifier"),
            }
        }

        let chosen = chosen
            .or_else(|| self.current_package.filter(|uid| store.package(uid).is_some()))
            .or_else(|| {
                store
                    .preface()
                    .and_then(|p| p.primary_package)
                    .filter(|uid| store.package(uid).is_some_and(playable))
            })
            .or_else(|| store.packages().find(|(_, p)| p.is_material()).map(|(uid, _)| uid))
            .ok_or_else(|| Error::not_found("playable package"))?;

        let package = store
            .package(&chosen)
            .ok_or_else(|| Error::not_found("chosen package"))?;
        if self.current_package.is_some_and(|uid| uid != chosen) && !self.cursors.is_empty() {
            tracing::info!(package = %package.package_uid, "switching package, ending current streams");
            for ci in 0..self.cursors.len() {
                self.set_cursor_eos(ci);
            }
            self.cursors.clear();
        }

        self.current_package = Some(chosen);
        self.current_package_string = Some(package.package_uid.to_string());
        Ok(chosen)
    }

    /// Bind cursor `ci` to component `index` of its material track.
    ///
    /// An index past the last component selects the last one, positioned
    /// at its end; `Ok(true)` reports that case.
    pub(super) fn set_component(
        &mut self,
        store: &MetadataStore,
        ci: usize,
        index: usize,
    ) -> Result<bool> {
        let material_track_uid = self.cursors[ci].material_track;
        let track = store
            .track(&material_track_uid)
            .ok_or_else(|| Error::not_found("material track"))?;
        let components = store.track_components(track);
        let last = components
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::not_found("components of material track"))?;
        let past_end = index > last;
        let index = index.min(last);
        let component = components[index];

        let clip = component
            .source_clip()
            .ok_or_else(|| Error::not_found("source clip"))?;
        let source_uid = clip
            .source_package
            .ok_or_else(|| Error::not_found(format!("source package {}", clip.source_package_id)))?;
        let source = store
            .package(&source_uid)
            .filter(|p| p.top_level && !p.tracks.is_empty())
            .ok_or_else(|| Error::not_found("top level source package"))?;
        let (source_track_uid, source_track) = store
            .package_tracks(source)
            .find(|(_, t)| t.track_id == clip.source_track_id)
            .ok_or_else(|| Error::not_found(format!("source track {}", clip.source_track_id)))?;
        if source.descriptor.is_none() || source_track.descriptors.is_empty() {
            return Err(Error::not_found("descriptor of source track"));
        }
        if !source_track.edit_rate.is_valid() {
            return Err(Error::InvalidState(format!(
                "source track {} has an invalid edit rate",
                source_track.track_id
            )));
        }

        let et = self
            .essence_tracks
            .iter()
            .position(|t| {
                t.source_package == Some(source_uid) && t.source_track == Some(source_track_uid)
            })
            .ok_or_else(|| Error::not_found("essence track of component"))?;

        let mat_rate = track.edit_rate;
        let src_rate = source_track.edit_rate;
        let start_position: u64 = components[..index]
            .iter()
            .map(|c| c.duration.max(0) as u64)
            .sum();
        let component_start = rescale_units(clip.start_position.max(0) as u64, mat_rate, src_rate);
        let duration = (component.duration >= 0)
            .then(|| rescale_units(component.duration as u64, mat_rate, src_rate));

        let caps = self.essence_tracks[et].caps().cloned();
        let c = &mut self.cursors[ci];
        c.current_component = Some(index);
        c.current_component_start_position = start_position;
        c.current_component_start = component_start;
        c.current_component_duration = duration;
        c.current_essence_track = et;
        c.current_essence_track_position = component_start;
        if past_end {
            c.current_essence_track_position += duration.unwrap_or(0);
        }
        if caps.is_some() {
            c.caps = caps;
        }
        tracing::debug!(
            track_id = c.track_id,
            component = index,
            essence_track = et,
            start = component_start,
            past_end,
            "switched component"
        );
        Ok(past_end)
    }
}

/// Start timecode of a package, from its timecode track.
fn start_timecode(store: &MetadataStore, package: &Package) -> Option<Timecode> {
    let (_, track) = store
        .package_tracks(package)
        .find(|(_, t)| t.is_timeline() && t.track_type.is_timecode())?;
    let components = store.track_components(track);
    let [component] = components.as_slice() else {
        return None;
    };
    let tc = component.timecode()?;
    if tc.rounded_timecode_base == 0 {
        return None;
    }
    let start = track.origin.saturating_add(tc.start_timecode).max(0) as u64;
    Some(Timecode::new(tc.rounded_timecode_base, tc.drop_frame, start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::source::MemorySource;
    use crate::test_utils::MetadataBuilder;

    fn demuxer_with(builder: &MetadataBuilder) -> Demuxer<MemorySource> {
        let demuxer = Demuxer::new(MemorySource::new(Vec::new()), DemuxConfig::new());
        {
            let mut store = demuxer.metadata.write();
            *store = builder.build_store();
            store.resolve().unwrap();
        }
        demuxer
    }

    #[test]
    fn test_streams_created_once() {
        let mut demuxer = demuxer_with(&MetadataBuilder::new().single_track_file());
        demuxer.update_tracks().unwrap();
        assert_eq!(demuxer.cursors.len(), 1);
        assert!(matches!(demuxer.events.pop_front(), Some(Event::StreamStart { track_id: 1, .. })));
        assert_eq!(demuxer.events.pop_front(), Some(Event::NoMoreStreams));

        demuxer.update_tracks().unwrap();
        assert_eq!(demuxer.cursors.len(), 1);
        assert!(demuxer.events.is_empty());
    }

    #[test]
    fn test_material_cursor_starts_at_first_component() {
        let mut demuxer = demuxer_with(&MetadataBuilder::new().single_track_file());
        demuxer.update_tracks().unwrap();
        let c = &demuxer.cursors[0];
        assert_eq!(c.current_component, Some(0));
        assert_eq!(c.current_component_start, 0);
        assert_eq!(c.current_component_duration, Some(10));
        assert_eq!(c.current_essence_track, 0);
        assert_eq!(c.start_timecode.map(|tc| tc.fps), Some(25));
    }

    #[test]
    fn test_component_index_is_clamped() {
        let mut demuxer = demuxer_with(&MetadataBuilder::new().single_track_file());
        demuxer.update_tracks().unwrap();
        let metadata = Arc::clone(&demuxer.metadata);
        let store = metadata.read();
        assert!(demuxer.set_component(&store, 0, 5).unwrap());
        let c = &demuxer.cursors[0];
        assert_eq!(c.current_component, Some(0));
        assert_eq!(c.current_essence_track_position, 10);
    }

    #[test]
    fn test_requested_source_package_is_played() {
        let builder = MetadataBuilder::new().single_track_file();
        let mut demuxer = demuxer_with(&builder);
        demuxer.set_package(builder.source_package_umid().to_string());
        demuxer.update_tracks().unwrap();
        // the source package is top level, so it is played directly
        assert_eq!(
            demuxer.package(),
            Some(builder.source_package_umid().to_string())
        );
        assert_eq!(demuxer.cursors[0].current_component, None);
    }

    #[test]
    fn test_unknown_requested_package_falls_back() {
        let builder = MetadataBuilder::new().single_track_file();
        let mut demuxer = demuxer_with(&builder);
        demuxer.set_package(Umid([9; 32]).to_string());
        demuxer.update_tracks().unwrap();
        assert_eq!(
            demuxer.package(),
            Some(builder.material_package_umid().to_string())
        );
        assert_eq!(demuxer.cursors.len(), 1);
        assert_eq!(demuxer.cursors[0].current_component, Some(0));
    }

    #[test]
    fn test_malformed_requested_package_falls_back() {
        let builder = MetadataBuilder::new().single_track_file();
        let mut demuxer = demuxer_with(&builder);
        demuxer.set_package("not a umid");
        demuxer.update_tracks().unwrap();
        assert_eq!(
            demuxer.package(),
            Some(builder.material_package_umid().to_string())
        );
    }
}
