//! Header metadata: decoded sets and the reference graph between them.
//!
//! Sets are stored in an arena keyed by instance UID. Strong references
//! stay UIDs; resolving only checks that every required target exists and
//! resolves itself, and records the surviving links next to the declared
//! ones. A resolve pass can be repeated at any time, for example after a
//! newer copy of some set was read from a later partition.

mod parse;
mod sets;
mod structure;

pub use parse::{parse_descriptive_set, parse_metadata_set, OtherTag};
pub use sets::{
    Component, ComponentKind, ContentStorage, Descriptor, DescriptorKind, EssenceContainerData,
    Identification, Locator, LocatorKind, MetadataObject, Package, PackageKind, PictureDescriptor,
    PictureKind, Preface, ProductVersion, Sequence, SetType, SoundDescriptor, SoundKind,
    SourceClip, TimecodeComponent, Timestamp, Track, TrackKind,
};
pub use structure::StructureNode;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ul::{TrackType, Umid, Uuid};

/// Resolution state of one set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveState {
    #[default]
    Unresolved,
    /// On the current resolve stack; reaching it again means a cycle
    Resolving,
    Resolved,
    Failed,
}

/// A decoded set with its bookkeeping
#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub instance_uid: Uuid,
    pub generation_uid: Uuid,
    /// Offset of the KLV the set was read from
    pub offset: u64,
    pub set_type: u16,
    pub object: MetadataObject,
    pub other_tags: Vec<OtherTag>,
    pub state: ResolveState,
}

/// A descriptive metadata set, kept undecoded
#[derive(Debug, Clone)]
pub struct DescriptiveSet {
    pub scheme: u8,
    pub set_type: u32,
    pub instance_uid: Uuid,
    pub offset: u64,
    pub tags: Vec<OtherTag>,
}

/// What happened to a set handed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// Replaced an older copy
    Replaced,
    /// An equal or newer copy was already known
    Ignored,
}

impl InsertOutcome {
    /// The graph changed and must be resolved again.
    pub fn is_update(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// All header metadata of a session
#[derive(Debug, Default)]
pub struct MetadataStore {
    objects: HashMap<Uuid, MetadataEntry>,
    descriptive: HashMap<Uuid, DescriptiveSet>,
    /// Most recently read Preface
    preface_uid: Option<Uuid>,
    resolved: bool,
    temporal_order_misuse: bool,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Forget everything, including the writer quirk flag.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add a structural set, keeping the copy with the highest offset.
    ///
    /// A set whose instance UID is already used by a set of another type is
    /// an error.
    pub fn insert(&mut self, entry: MetadataEntry) -> Result<InsertOutcome> {
        let outcome = match self.objects.get(&entry.instance_uid) {
            Some(old) if old.set_type != entry.set_type => {
                return Err(Error::malformed(
                    entry.offset,
                    format!(
                        "instance UID {} changed type from {:#06x} to {:#06x}",
                        entry.instance_uid, old.set_type, entry.set_type
                    ),
                ));
            }
            Some(old) if old.offset >= entry.offset => {
                tracing::debug!(uid = %entry.instance_uid, "metadata already known in a newer version");
                return Ok(InsertOutcome::Ignored);
            }
            Some(_) => InsertOutcome::Replaced,
            None => InsertOutcome::Added,
        };

        if matches!(entry.object, MetadataObject::Preface(_)) {
            self.preface_uid = Some(entry.instance_uid);
        }
        self.reset_linked();
        self.objects.insert(entry.instance_uid, entry);
        Ok(outcome)
    }

    /// Add a descriptive set with the same replacement policy as
    /// [`MetadataStore::insert`].
    pub fn insert_descriptive(&mut self, set: DescriptiveSet) -> Result<InsertOutcome> {
        let outcome = match self.descriptive.get(&set.instance_uid) {
            Some(old) if (old.scheme, old.set_type) != (set.scheme, set.set_type) => {
                return Err(Error::malformed(
                    set.offset,
                    format!("descriptive set {} changed type", set.instance_uid),
                ));
            }
            Some(old) if old.offset >= set.offset => return Ok(InsertOutcome::Ignored),
            Some(_) => InsertOutcome::Replaced,
            None => InsertOutcome::Added,
        };
        self.descriptive.insert(set.instance_uid, set);
        Ok(outcome)
    }

    pub fn descriptive_sets(&self) -> impl Iterator<Item = &DescriptiveSet> {
        self.descriptive.values()
    }

    pub fn entry(&self, uid: &Uuid) -> Option<&MetadataEntry> {
        self.objects.get(uid)
    }

    /// Drop all links and resolution states.
    pub fn reset_linked(&mut self) {
        for entry in self.objects.values_mut() {
            entry.state = ResolveState::Unresolved;
            entry.object.reset_links();
        }
        self.resolved = false;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Set once any Identification matches a writer known to misuse the
    /// temporal offset field. Never cleared by later resolves.
    pub fn temporal_order_misuse(&self) -> bool {
        self.temporal_order_misuse
    }

    /// Resolve the whole graph and return the Preface UID.
    ///
    /// Every set is attempted; only a failing Preface fails the pass.
    /// Repeating the call without new input yields the same graph.
    pub fn resolve(&mut self) -> Result<Uuid> {
        tracing::debug!(sets = self.objects.len(), "resolving metadata references");
        self.reset_linked();

        let preface_uid = self.preface_uid.ok_or(Error::PrefaceUnresolved)?;

        let mut uids: Vec<Uuid> = self.objects.keys().copied().collect();
        uids.sort();
        for uid in uids {
            if !self.resolve_uid(uid) && uid == preface_uid {
                tracing::error!(uid = %uid, "preface could not be resolved");
                return Err(Error::PrefaceUnresolved);
            }
        }
        if self.state(&preface_uid) != Some(ResolveState::Resolved) {
            return Err(Error::PrefaceUnresolved);
        }
        self.resolved = true;

        let misuse = self
            .preface()
            .map(|p| p.identifications.clone())
            .unwrap_or_default()
            .iter()
            .filter_map(|uid| self.identification(uid))
            .any(|ident| {
                tracing::debug!(
                    product = ident.product_name.as_deref().unwrap_or(""),
                    company = ident.company_name.as_deref().unwrap_or(""),
                    "identification"
                );
                ident.misuses_temporal_order()
            });
        if misuse && !self.temporal_order_misuse {
            tracing::warn!("setting up quirk for misuse of temporal_order field");
            self.temporal_order_misuse = true;
        }

        Ok(preface_uid)
    }

    fn state(&self, uid: &Uuid) -> Option<ResolveState> {
        self.objects.get(uid).map(|e| e.state)
    }

    fn object(&self, uid: &Uuid) -> Option<&MetadataObject> {
        self.objects.get(uid).map(|e| &e.object)
    }

    fn object_mut(&mut self, uid: &Uuid) -> Option<&mut MetadataObject> {
        self.objects.get_mut(uid).map(|e| &mut e.object)
    }

    /// Resolve one set. A set already on the resolve stack or already
    /// failed counts as unresolvable.
    fn resolve_uid(&mut self, uid: Uuid) -> bool {
        let object = match self.objects.get_mut(&uid) {
            None => return false,
            Some(entry) => match entry.state {
                ResolveState::Resolved => return true,
                ResolveState::Resolving | ResolveState::Failed => return false,
                ResolveState::Unresolved => {
                    entry.state = ResolveState::Resolving;
                    entry.object.clone()
                }
            },
        };

        let ok = match object {
            MetadataObject::Preface(p) => self.resolve_preface(uid, &p),
            MetadataObject::ContentStorage(c) => self.resolve_content_storage(uid, &c),
            MetadataObject::EssenceContainerData(e) => self.resolve_ecd(uid, &e),
            MetadataObject::Package(p) => match p.kind {
                PackageKind::Material => self.resolve_material_package(uid, &p),
                PackageKind::Source => self.resolve_source_package(uid, &p),
            },
            MetadataObject::Track(t) => self.resolve_track(uid, &t),
            MetadataObject::Sequence(s) => self.resolve_sequence(uid, &s),
            MetadataObject::Component(c) => self.resolve_component(uid, &c),
            MetadataObject::Descriptor(d) => self.resolve_descriptor(uid, &d),
            MetadataObject::Identification(_) | MetadataObject::Locator(_) => true,
        };

        if let Some(entry) = self.objects.get_mut(&uid) {
            entry.state = if ok {
                ResolveState::Resolved
            } else {
                ResolveState::Failed
            };
        }
        ok
    }

    /// Resolve `uid` if it names a set accepted by `is_kind`.
    fn resolve_ref(&mut self, uid: &Uuid, is_kind: fn(&MetadataObject) -> bool) -> bool {
        match self.object(uid).map(is_kind) {
            Some(true) => self.resolve_uid(*uid),
            Some(false) => {
                tracing::error!(uid = %uid, "reference to a set of the wrong type");
                false
            }
            None => {
                tracing::error!(uid = %uid, "referenced set not found");
                false
            }
        }
    }

    fn resolve_preface(&mut self, uid: Uuid, p: &Preface) -> bool {
        if !self.resolve_ref(&p.content_storage_uid, |o| {
            matches!(o, MetadataObject::ContentStorage(_))
        }) {
            tracing::error!(uid = %p.content_storage_uid, "couldn't resolve content storage");
            return false;
        }

        let primary = p.primary_package_uid.filter(|pkg| {
            let ok = self.resolve_ref(pkg, |o| matches!(o, MetadataObject::Package(_)));
            if !ok {
                tracing::warn!(uid = %pkg, "couldn't resolve primary package");
            }
            ok
        });

        let identifications: Vec<Uuid> = p
            .identification_uids
            .iter()
            .copied()
            .filter(|id| self.resolve_ref(id, |o| matches!(o, MetadataObject::Identification(_))))
            .collect();

        if let Some(MetadataObject::Preface(p)) = self.object_mut(&uid) {
            p.content_storage = Some(p.content_storage_uid);
            p.primary_package = primary;
            p.identifications = identifications;
        }
        true
    }

    fn resolve_content_storage(&mut self, uid: Uuid, c: &ContentStorage) -> bool {
        let packages: Vec<Uuid> = c
            .package_uids
            .iter()
            .copied()
            .filter(|pkg| self.resolve_ref(pkg, |o| matches!(o, MetadataObject::Package(_))))
            .collect();
        let ecds: Vec<Uuid> = c
            .essence_container_data_uids
            .iter()
            .copied()
            .filter(|e| {
                self.resolve_ref(e, |o| matches!(o, MetadataObject::EssenceContainerData(_)))
            })
            .collect();

        if packages.is_empty() {
            tracing::error!("couldn't resolve any package");
            return false;
        }
        if ecds.is_empty() {
            tracing::error!("couldn't resolve any essence container data");
            return false;
        }

        if let Some(MetadataObject::ContentStorage(c)) = self.object_mut(&uid) {
            c.packages = packages;
            c.essence_container_data = ecds;
        }
        true
    }

    fn resolve_ecd(&mut self, uid: Uuid, e: &EssenceContainerData) -> bool {
        let Some(pkg_uid) = self.find_source_package(&e.linked_package_uid) else {
            tracing::error!(umid = %e.linked_package_uid, "linked source package not found");
            return false;
        };
        if !self.resolve_uid(pkg_uid) {
            tracing::error!(umid = %e.linked_package_uid, "couldn't resolve linked source package");
            return false;
        }
        if let Some(MetadataObject::EssenceContainerData(e)) = self.object_mut(&uid) {
            e.linked_package = Some(pkg_uid);
        }
        true
    }

    fn find_source_package(&self, umid: &Umid) -> Option<Uuid> {
        let mut matches: Vec<Uuid> = self
            .objects
            .iter()
            .filter(|(_, e)| {
                matches!(&e.object, MetadataObject::Package(p) if p.is_source() && p.package_uid == *umid)
            })
            .map(|(uid, _)| *uid)
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Resolve the tracks of a package; at least one must survive.
    fn resolve_package_tracks(&mut self, uid: Uuid, p: &Package) -> Option<Vec<Uuid>> {
        let mut tracks = Vec::new();
        let (mut timecode, mut metadata, mut essence) = (0, 0, 0);
        for t in &p.track_uids {
            if !self.resolve_ref(t, |o| matches!(o, MetadataObject::Track(_))) {
                tracing::error!(uid = %t, "track couldn't be resolved");
                continue;
            }
            if let Some(track) = self.track(t) {
                if track.track_type.is_timecode() {
                    timecode += 1;
                } else if track.track_type.is_metadata() {
                    metadata += 1;
                } else if track.track_type.is_essence() {
                    essence += 1;
                }
            }
            tracks.push(*t);
        }
        if tracks.is_empty() {
            tracing::error!(uid = %uid, "couldn't resolve a track");
            return None;
        }

        if let Some(MetadataObject::Package(p)) = self.object_mut(&uid) {
            p.tracks = tracks.clone();
            p.n_timecode_tracks = timecode;
            p.n_metadata_tracks = metadata;
            p.n_essence_tracks = essence;
        }
        Some(tracks)
    }

    fn resolve_material_package(&mut self, uid: Uuid, p: &Package) -> bool {
        let Some(tracks) = self.resolve_package_tracks(uid, p) else {
            return false;
        };

        let mut kept = Vec::with_capacity(tracks.len());
        'tracks: for (i, t) in tracks.iter().enumerate() {
            let clips: Vec<(Option<Uuid>, u32)> = self
                .track(t)
                .and_then(|track| track.sequence)
                .and_then(|s| self.sequence(&s))
                .map(|s| {
                    s.components
                        .iter()
                        .filter_map(|c| self.component(c))
                        .filter_map(|c| c.source_clip())
                        .map(|clip| (clip.source_package, clip.source_track_id))
                        .collect()
                })
                .unwrap_or_default();

            for (source_package, source_track_id) in clips {
                let Some(pkg) = source_package else {
                    tracing::error!(track = i, "material package track without resolved source package");
                    continue 'tracks;
                };
                if !self.resolve_uid(pkg) {
                    tracing::error!(track = i, "couldn't resolve source package");
                    continue 'tracks;
                }
                if let Some(MetadataObject::Package(src)) = self.object_mut(&pkg) {
                    src.top_level = true;
                }
                let has_source_track = self.package(&pkg).is_some_and(|src| {
                    src.tracks.iter().filter_map(|st| self.track(st)).any(|st| {
                        st.is_timeline() && st.track_id == source_track_id
                    })
                });
                if !has_source_track {
                    tracing::error!(track = i, "material package track without resolved source track");
                    continue 'tracks;
                }
            }
            kept.push(*t);
        }

        if kept.is_empty() {
            tracing::error!(uid = %uid, "material package without valid tracks");
            return false;
        }
        if let Some(MetadataObject::Package(p)) = self.object_mut(&uid) {
            p.tracks = kept;
        }
        true
    }

    fn resolve_source_package(&mut self, uid: Uuid, p: &Package) -> bool {
        if p.descriptor_uid.is_zero() {
            return self.resolve_package_tracks(uid, p).is_some();
        }

        if !self.resolve_ref(&p.descriptor_uid, |o| {
            matches!(o, MetadataObject::Descriptor(_))
        }) {
            tracing::error!(uid = %p.descriptor_uid, "couldn't resolve descriptor");
            return false;
        }
        let Some(tracks) = self.resolve_package_tracks(uid, p) else {
            return false;
        };
        let Some(descriptor) = self.descriptor(&p.descriptor_uid).cloned() else {
            return false;
        };
        let n_essence_tracks = self.package(&uid).map_or(0, |p| p.n_essence_tracks);

        let matches_track = |d: &Descriptor, track: &Track| {
            d.linked_track_id == track.track_id
                || (d.linked_track_id == 0
                    && n_essence_tracks == 1
                    && track.track_type.is_essence())
        };

        let mut links: Vec<(Uuid, Vec<Uuid>)> = Vec::new();
        if descriptor.is_multiple() {
            for t in &tracks {
                let Some(track) = self.track(t) else { continue };
                let subs = descriptor
                    .sub_descriptors()
                    .iter()
                    .copied()
                    .filter(|sub| self.descriptor(sub).is_some_and(|d| matches_track(d, track)))
                    .collect();
                links.push((*t, subs));
            }
        } else if let Some(t) = tracks
            .iter()
            .find(|t| self.track(t).is_some_and(|track| matches_track(&descriptor, track)))
        {
            links.push((*t, vec![p.descriptor_uid]));
        }

        for (t, descriptors) in links {
            if let Some(MetadataObject::Track(track)) = self.object_mut(&t) {
                track.descriptors = descriptors;
            }
        }
        if let Some(MetadataObject::Package(pkg)) = self.object_mut(&uid) {
            pkg.descriptor = Some(p.descriptor_uid);
            pkg.is_interleaved = descriptor.is_multiple();
        }
        true
    }

    fn resolve_track(&mut self, uid: Uuid, t: &Track) -> bool {
        if !self.resolve_ref(&t.sequence_uid, |o| matches!(o, MetadataObject::Sequence(_))) {
            tracing::error!(uid = %t.sequence_uid, "couldn't resolve sequence");
            return false;
        }

        let track_type = self.sequence(&t.sequence_uid).map_or(TrackType::Unknown, |s| {
            let from_sequence = TrackType::from_data_definition(&s.data_definition);
            if from_sequence != TrackType::Unknown {
                return from_sequence;
            }
            s.components
                .iter()
                .filter_map(|c| self.component(c))
                .map(|c| TrackType::from_data_definition(&c.data_definition))
                .find(|tt| *tt != TrackType::Unknown)
                .unwrap_or(TrackType::Unknown)
        });

        if let Some(MetadataObject::Track(track)) = self.object_mut(&uid) {
            track.sequence = Some(t.sequence_uid);
            track.track_type = track_type;
        }
        true
    }

    fn resolve_sequence(&mut self, uid: Uuid, s: &Sequence) -> bool {
        for c in &s.component_uids {
            if !self.resolve_ref(c, |o| matches!(o, MetadataObject::Component(_))) {
                tracing::error!(uid = %c, "couldn't resolve structural component");
                return false;
            }
        }
        if let Some(MetadataObject::Sequence(seq)) = self.object_mut(&uid) {
            seq.components = s.component_uids.clone();
        }
        true
    }

    fn resolve_component(&mut self, uid: Uuid, c: &Component) -> bool {
        let ComponentKind::SourceClip(clip) = &c.kind else {
            return true;
        };
        if clip.source_package_id.is_zero() {
            // terminates the source reference chain
            return true;
        }
        // The package itself is resolved by whoever follows the link
        let found = self.find_source_package(&clip.source_package_id);
        if found.is_none() {
            tracing::error!(umid = %clip.source_package_id, "couldn't find source package");
        }
        if let Some(MetadataObject::Component(Component {
            kind: ComponentKind::SourceClip(clip),
            ..
        })) = self.object_mut(&uid)
        {
            clip.source_package = found;
        }
        true
    }

    fn resolve_descriptor(&mut self, uid: Uuid, d: &Descriptor) -> bool {
        let locators: Vec<Uuid> = d
            .locator_uids
            .iter()
            .copied()
            .filter(|l| {
                let ok = self.resolve_ref(l, |o| matches!(o, MetadataObject::Locator(_)));
                if !ok {
                    tracing::warn!(uid = %l, "couldn't resolve locator");
                }
                ok
            })
            .collect();

        let mut subs = Vec::new();
        if let DescriptorKind::Multiple {
            sub_descriptor_uids,
            ..
        } = &d.kind
        {
            for sub in sub_descriptor_uids {
                if !matches!(self.object(sub), Some(MetadataObject::Descriptor(_))) {
                    tracing::error!(uid = %sub, "sub-descriptor not found");
                    continue;
                }
                if !self.resolve_uid(*sub) {
                    tracing::error!(uid = %sub, "couldn't resolve sub-descriptor");
                    return false;
                }
                subs.push(*sub);
            }
        }

        if let Some(MetadataObject::Descriptor(desc)) = self.object_mut(&uid) {
            desc.locators = locators;
            if let DescriptorKind::Multiple {
                sub_descriptors, ..
            } = &mut desc.kind
            {
                *sub_descriptors = subs;
            }
        }
        true
    }

    // Typed accessors. They return resolved sets only.

    fn resolved(&self, uid: &Uuid) -> Option<&MetadataObject> {
        self.objects
            .get(uid)
            .filter(|e| e.state == ResolveState::Resolved)
            .map(|e| &e.object)
    }

    pub fn preface_uid(&self) -> Option<Uuid> {
        self.preface_uid
    }

    /// The resolved Preface.
    pub fn preface(&self) -> Option<&Preface> {
        match self.resolved(&self.preface_uid?) {
            Some(MetadataObject::Preface(p)) => Some(p),
            _ => None,
        }
    }

    pub fn content_storage(&self) -> Option<&ContentStorage> {
        match self.resolved(&self.preface()?.content_storage?) {
            Some(MetadataObject::ContentStorage(c)) => Some(c),
            _ => None,
        }
    }

    pub fn identification(&self, uid: &Uuid) -> Option<&Identification> {
        match self.resolved(uid) {
            Some(MetadataObject::Identification(i)) => Some(i),
            _ => None,
        }
    }

    pub fn essence_container_data(&self, uid: &Uuid) -> Option<&EssenceContainerData> {
        match self.resolved(uid) {
            Some(MetadataObject::EssenceContainerData(e)) => Some(e),
            _ => None,
        }
    }

    pub fn package(&self, uid: &Uuid) -> Option<&Package> {
        match self.resolved(uid) {
            Some(MetadataObject::Package(p)) => Some(p),
            _ => None,
        }
    }

    pub fn track(&self, uid: &Uuid) -> Option<&Track> {
        match self.resolved(uid) {
            Some(MetadataObject::Track(t)) => Some(t),
            _ => None,
        }
    }

    pub fn sequence(&self, uid: &Uuid) -> Option<&Sequence> {
        match self.resolved(uid) {
            Some(MetadataObject::Sequence(s)) => Some(s),
            _ => None,
        }
    }

    pub fn component(&self, uid: &Uuid) -> Option<&Component> {
        match self.resolved(uid) {
            Some(MetadataObject::Component(c)) => Some(c),
            _ => None,
        }
    }

    pub fn descriptor(&self, uid: &Uuid) -> Option<&Descriptor> {
        match self.resolved(uid) {
            Some(MetadataObject::Descriptor(d)) => Some(d),
            _ => None,
        }
    }

    pub fn locator(&self, uid: &Uuid) -> Option<&Locator> {
        match self.resolved(uid) {
            Some(MetadataObject::Locator(l)) => Some(l),
            _ => None,
        }
    }

    /// Resolved packages of the content storage, in declaration order.
    pub fn packages(&self) -> impl Iterator<Item = (Uuid, &Package)> + '_ {
        self.content_storage()
            .map(|c| c.packages.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|uid| self.package(uid).map(|p| (*uid, p)))
    }

    /// Resolved package with the given package UID.
    pub fn package_by_umid(&self, umid: &Umid) -> Option<(Uuid, &Package)> {
        self.packages().find(|(_, p)| p.package_uid == *umid)
    }

    /// Resolved tracks of a package, in declaration order.
    pub fn package_tracks<'a>(&'a self, package: &'a Package) -> impl Iterator<Item = (Uuid, &'a Track)> + 'a {
        package
            .tracks
            .iter()
            .filter_map(|uid| self.track(uid).map(|t| (*uid, t)))
    }

    /// Resolved components of a track's sequence, in order.
    pub fn track_components<'a>(&'a self, track: &'a Track) -> Vec<&'a Component> {
        track
            .sequence
            .and_then(|s| self.sequence(&s))
            .map(|s| s.components.iter().filter_map(|c| self.component(c)).collect())
            .unwrap_or_default()
    }

    /// Resolved essence container data, in declaration order.
    pub fn essence_containers(&self) -> impl Iterator<Item = &EssenceContainerData> + '_ {
        self.content_storage()
            .map(|c| c.essence_container_data.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|uid| self.essence_container_data(uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MetadataBuilder;

    #[test]
    fn test_resolve_minimal_graph() {
        let mut store = MetadataBuilder::new().single_track_file().build_store();
        let preface = store.resolve().unwrap();
        assert_eq!(store.preface_uid(), Some(preface));
        assert!(store.is_resolved());

        let packages: Vec<_> = store.packages().collect();
        assert_eq!(packages.len(), 2);
        let (_, source) = packages.iter().find(|(_, p)| p.is_source()).unwrap();
        assert!(source.top_level);
        assert!(!source.is_interleaved);
        assert_eq!(source.n_essence_tracks, 1);

        let (_, track) = store.package_tracks(source).next().unwrap();
        assert_eq!(track.track_type, TrackType::Picture);
        assert_eq!(track.descriptors.len(), 1);
        assert_eq!(store.essence_containers().count(), 1);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut store = MetadataBuilder::new().single_track_file().build_store();
        store.resolve().unwrap();
        let before: Vec<_> = store.packages().map(|(u, p)| (u, p.tracks.clone())).collect();
        store.resolve().unwrap();
        let after: Vec<_> = store.packages().map(|(u, p)| (u, p.tracks.clone())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_content_storage_fails_preface() {
        let mut builder = MetadataBuilder::new().single_track_file();
        builder.remove_content_storage();
        let mut store = builder.build_store();
        assert!(matches!(store.resolve(), Err(Error::PrefaceUnresolved)));
        assert!(store.preface().is_none());
    }

    #[test]
    fn test_no_preface() {
        let mut store = MetadataStore::new();
        assert!(matches!(store.resolve(), Err(Error::PrefaceUnresolved)));
    }

    #[test]
    fn test_insert_keeps_newest_copy() {
        let builder = MetadataBuilder::new().single_track_file();
        let mut store = builder.build_store();
        let mut entry = store
            .objects
            .values()
            .find(|e| matches!(e.object, MetadataObject::Sequence(_)))
            .cloned()
            .unwrap();

        entry.offset = 0;
        assert_eq!(store.insert(entry.clone()).unwrap(), InsertOutcome::Ignored);
        entry.offset = 1_000_000;
        assert_eq!(store.insert(entry.clone()).unwrap(), InsertOutcome::Replaced);
        assert!(!store.is_resolved());

        entry.set_type = 0x0111;
        entry.offset = 2_000_000;
        assert!(store.insert(entry).is_err());
    }

    #[test]
    fn test_temporal_order_quirk_is_sticky() {
        let mut builder = MetadataBuilder::new().single_track_file();
        builder.identification("OpenCube", "MXFTk Advanced", 2, 0);
        let mut store = builder.build_store();
        assert!(!store.temporal_order_misuse());
        store.resolve().unwrap();
        assert!(store.temporal_order_misuse());
        store.resolve().unwrap();
        assert!(store.temporal_order_misuse());
    }

    #[test]
    fn test_cycle_does_not_hang() {
        let mut builder = MetadataBuilder::new().single_track_file();
        // the descriptor lists itself as a sub-descriptor
        builder.self_referencing_descriptor();
        let mut store = builder.build_store();
        assert!(store.resolve().is_err());
    }
}
