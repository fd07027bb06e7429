//! Synthetic MXF files for tests.
//!
//! [`MetadataBuilder`] produces the structural metadata of small but
//! complete files: a material package referencing a top level source
//! package, with a timecode track and one essence container. [`MxfBuilder`]
//! lays that metadata out together with partitions, essence elements,
//! index table segments and a random index pack.
//!
//! Real files can be dropped into `tests/fixtures/` or a directory named by
//! the `MXF_TEST_FIXTURES` environment variable; see [`fixture_path`].
//!
//! ```no_run
//! use mxf_demux::test_utils::MxfBuilder;
//! use mxf_demux::{DemuxConfig, Demuxer, Event, MemorySource};
//!
//! # fn main() -> mxf_demux::Result<()> {
//! let file = MxfBuilder::single_track(5).with_index().build();
//! let source = MemorySource::new(file.data);
//! let mut demuxer = Demuxer::with_registry(source, DemuxConfig::new(), MxfBuilder::registry());
//! while let Some(event) = demuxer.next_event()? {
//!     if let Event::Buffer(buffer) = event {
//!         println!("{} bytes at {:?}", buffer.data.len(), buffer.pts);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use bytes::{BufMut, Bytes};

use crate::essence::{
    CapsValue, EssenceHandler, EssenceMapping, HandlerRegistry, MediaCaps, TrackDescription,
    Wrapping,
};
use crate::klv::KlvPacket;
use crate::metadata::{parse_metadata_set, MetadataStore, SetType};
use crate::primer::PrimerPack;
use crate::time::Rational;
use crate::ul::{TrackType, Ul, Umid, Uuid};
use crate::Result;

/// Track number of the picture element in generated files
pub const PICTURE_TRACK_NUMBER: u32 = 0x1501_0101;
/// Track number of the sound element in generated interleaved files
pub const SOUND_TRACK_NUMBER: u32 = 0x1601_0101;

/// Material package track ids
pub const PICTURE_TRACK_ID: u32 = 1;
pub const SOUND_TRACK_ID: u32 = 2;
pub const TIMECODE_TRACK_ID: u32 = 10;

/// First timecode of generated files, one hour at 25 fps
pub const START_TIMECODE: i64 = 90_000;

/// Generic container label of the picture essence understood by
/// [`TestPictureHandler`]; byte 14 selects the wrapping
const TEST_CONTAINER: [u8; 14] = [
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x60,
];
const TEST_FRAME_WRAPPED: u8 = 0x01;
const TEST_CLIP_WRAPPED: u8 = 0x02;

const BWF_FRAME_CONTAINER: Ul = Ul([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x06, 0x01, 0x00,
]);
const MULTIPLE_WRAPPINGS_CONTAINER: Ul = Ul([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x03, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x7f, 0x01, 0x00,
]);
const OP1A: Ul = Ul([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x01, 0x09, 0x00,
]);
const TEST_PICTURE_CODING: Ul = Ul([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x04, 0x01, 0x02, 0x01, 0x7f, 0x00, 0x00, 0x00,
]);

const PARTITION_KEY: [u8; 13] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01,
];
const METADATA_KEY: [u8; 13] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01,
];
const INDEX_SEGMENT_KEY: [u8; 16] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x10, 0x01, 0x00,
];
const FILL_KEY: [u8; 16] = [
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00, 0x00, 0x00,
];
const ESSENCE_KEY: [u8; 12] = [
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01,
];
const INSTANCE_UID_LABEL: Ul = Ul([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x15, 0x02, 0x00, 0x00, 0x00, 0x00,
]);

const HEADER: u8 = 0x02;
const BODY: u8 = 0x03;
const FOOTER: u8 = 0x04;
const OPEN_INCOMPLETE: u8 = 0x01;
const CLOSED_COMPLETE: u8 = 0x04;

const BODY_SID: u32 = 1;
const INDEX_SID: u32 = 2;
const SOUND_BODY_SID: u32 = 3;
const SOUND_INDEX_SID: u32 = 4;

const EDIT_RATE: Rational = Rational::new(25, 1);
const AUDIO_SAMPLES_PER_FRAME: usize = 48_000 / 25;
/// Picture element size of clip wrapped and interleaved files
const CONSTANT_PICTURE_SIZE: usize = 120;
const METADATA_PADDING: usize = 64;
/// Every n-th edit unit is a keyframe in generated index tables
const GOP: u64 = 3;

fn test_container(wrapping: u8) -> Ul {
    let mut ul = [0u8; 16];
    ul[..14].copy_from_slice(&TEST_CONTAINER);
    ul[14] = wrapping;
    Ul(ul)
}

/// Deterministic instance UID
fn uid(n: u8) -> Uuid {
    let mut b = [0u8; 16];
    b[..4].copy_from_slice(&[0x4d, 0x58, 0x46, 0x2d]);
    b[15] = n;
    Uuid(b)
}

fn umid(n: u8) -> Umid {
    let mut b = [0u8; 32];
    b[..16].copy_from_slice(&[
        0x06, 0x0a, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x01, 0x01, 0x0d, 0x20, 0x13, 0x00, 0x00,
        0x00,
    ]);
    b[16..20].copy_from_slice(&[0x6d, 0x78, 0x66, 0x74]);
    b[31] = n;
    Umid(b)
}

const PREFACE: u8 = 1;
const IDENTIFICATION: u8 = 2;
const CONTENT_STORAGE: u8 = 3;
const ESSENCE_CONTAINER_DATA: u8 = 4;
const SOUND_ESSENCE_CONTAINER_DATA: u8 = 5;
const MATERIAL_PACKAGE: u8 = 10;
const MP_PICTURE_TRACK: u8 = 11;
const MP_PICTURE_SEQUENCE: u8 = 12;
const MP_PICTURE_CLIP: u8 = 13;
const MP_SOUND_TRACK: u8 = 14;
const MP_SOUND_SEQUENCE: u8 = 15;
const MP_SOUND_CLIP: u8 = 16;
const MP_TIMECODE_TRACK: u8 = 17;
const MP_TIMECODE_SEQUENCE: u8 = 18;
const MP_TIMECODE: u8 = 19;
const SOURCE_PACKAGE: u8 = 30;
const SP_PICTURE_TRACK: u8 = 31;
const SP_PICTURE_SEQUENCE: u8 = 32;
const SP_PICTURE_CLIP: u8 = 33;
const SP_SOUND_TRACK: u8 = 34;
const SP_SOUND_SEQUENCE: u8 = 35;
const SP_SOUND_CLIP: u8 = 36;
const SOUND_SOURCE_PACKAGE: u8 = 37;
const DESCRIPTOR: u8 = 40;
const PICTURE_SUB_DESCRIPTOR: u8 = 41;
const SOUND_SUB_DESCRIPTOR: u8 = 42;
const SOUND_DESCRIPTOR: u8 = 43;
const INDEX_SEGMENT: u8 = 50;
const SOUND_INDEX_SEGMENT: u8 = 51;

const MATERIAL_UMID: u8 = 1;
const SOURCE_UMID: u8 = 2;
const SOUND_SOURCE_UMID: u8 = 3;

fn be_u8(v: u8) -> Vec<u8> {
    vec![v]
}

fn be_u16(v: u16) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn be_u32(v: u32) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn be_i64(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn rational(r: Rational) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.put_i32(r.n);
    out.put_i32(r.d);
    out
}

fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_be_bytes()).collect()
}

/// Batch of fixed size items: count, item length, items
fn batch(items: &[&[u8]], item_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + items.len() * item_len);
    out.put_u32(items.len() as u32);
    out.put_u32(item_len as u32);
    for item in items {
        out.put_slice(item);
    }
    out
}

fn uid_batch(uids: &[u8]) -> Vec<u8> {
    let uids: Vec<Uuid> = uids.iter().map(|n| uid(*n)).collect();
    let items: Vec<&[u8]> = uids.iter().map(|u| &u.0[..]).collect();
    batch(&items, 16)
}

/// KLV with a four byte BER length
fn klv(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + payload.len());
    out.put_slice(key);
    out.put_u8(0x83);
    out.put_uint(payload.len() as u64, 3);
    out.put_slice(payload);
    out
}

#[derive(Debug, Clone)]
struct LocalSet {
    set_type: u16,
    uid: Uuid,
    items: Vec<(u16, Vec<u8>)>,
}

impl LocalSet {
    fn new(set_type: SetType, n: u8) -> Self {
        Self {
            set_type: set_type.into(),
            uid: uid(n),
            items: Vec::new(),
        }
    }

    fn with(mut self, tag: u16, value: Vec<u8>) -> Self {
        self.set(tag, value);
        self
    }

    fn set(&mut self, tag: u16, value: Vec<u8>) {
        match self.items.iter_mut().find(|(t, _)| *t == tag) {
            Some(item) => item.1 = value,
            None => self.items.push((tag, value)),
        }
    }

    fn key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..13].copy_from_slice(&METADATA_KEY);
        key[13..15].copy_from_slice(&self.set_type.to_be_bytes());
        key
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(0x3c0a);
        out.put_u16(16);
        out.put_slice(&self.uid.0);
        for (tag, value) in &self.items {
            out.put_u16(*tag);
            out.put_u16(value.len() as u16);
            out.put_slice(value);
        }
        out
    }

    fn encode(&self) -> Vec<u8> {
        klv(&self.key(), &self.payload())
    }
}

/// Structural metadata of a generated file
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    sets: Vec<LocalSet>,
    duration: i64,
    wrapping: u8,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self {
            sets: Vec::new(),
            duration: 10,
            wrapping: TEST_FRAME_WRAPPED,
        }
    }
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration in edit units of every track. Call before adding a layout.
    pub fn duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    /// Clip wrap the picture essence. Call before adding a layout.
    pub fn clip_wrapped(mut self) -> Self {
        self.wrapping = TEST_CLIP_WRAPPED;
        self
    }

    /// One frame wrapped picture track at 25 fps plus a material timecode
    /// track starting at [`START_TIMECODE`].
    pub fn single_track_file(mut self) -> Self {
        self.common_sets(&[MP_PICTURE_TRACK, MP_TIMECODE_TRACK]);
        self.material_track(
            (MP_PICTURE_TRACK, MP_PICTURE_SEQUENCE, MP_PICTURE_CLIP),
            PICTURE_TRACK_ID,
            TrackType::Picture,
            EDIT_RATE,
            SOURCE_UMID,
        );
        self.source_package((SOURCE_PACKAGE, SOURCE_UMID, DESCRIPTOR), &[SP_PICTURE_TRACK]);
        self.source_track(
            (SP_PICTURE_TRACK, SP_PICTURE_SEQUENCE, SP_PICTURE_CLIP),
            PICTURE_TRACK_ID,
            PICTURE_TRACK_NUMBER,
            TrackType::Picture,
            EDIT_RATE,
        );
        let descriptor = self.picture_descriptor(DESCRIPTOR, PICTURE_TRACK_ID);
        self.sets.push(descriptor);
        self
    }

    /// Picture and sound interleaved in one container, described by a
    /// multiple descriptor.
    pub fn interleaved_file(mut self, video_rate: Rational, audio_rate: Rational) -> Self {
        self.common_sets(&[MP_PICTURE_TRACK, MP_SOUND_TRACK, MP_TIMECODE_TRACK]);
        self.material_track(
            (MP_PICTURE_TRACK, MP_PICTURE_SEQUENCE, MP_PICTURE_CLIP),
            PICTURE_TRACK_ID,
            TrackType::Picture,
            video_rate,
            SOURCE_UMID,
        );
        self.material_track(
            (MP_SOUND_TRACK, MP_SOUND_SEQUENCE, MP_SOUND_CLIP),
            SOUND_TRACK_ID,
            TrackType::Sound,
            audio_rate,
            SOURCE_UMID,
        );
        self.source_package(
            (SOURCE_PACKAGE, SOURCE_UMID, DESCRIPTOR),
            &[SP_PICTURE_TRACK, SP_SOUND_TRACK],
        );
        self.source_track(
            (SP_PICTURE_TRACK, SP_PICTURE_SEQUENCE, SP_PICTURE_CLIP),
            PICTURE_TRACK_ID,
            PICTURE_TRACK_NUMBER,
            TrackType::Picture,
            video_rate,
        );
        self.source_track(
            (SP_SOUND_TRACK, SP_SOUND_SEQUENCE, SP_SOUND_CLIP),
            SOUND_TRACK_ID,
            SOUND_TRACK_NUMBER,
            TrackType::Sound,
            audio_rate,
        );

        let multiple = LocalSet::new(SetType::MultipleDescriptor, DESCRIPTOR)
            .with(0x3001, rational(video_rate))
            .with(0x3002, be_i64(self.duration))
            .with(0x3004, MULTIPLE_WRAPPINGS_CONTAINER.0.to_vec())
            .with(0x3f01, uid_batch(&[PICTURE_SUB_DESCRIPTOR, SOUND_SUB_DESCRIPTOR]));
        let picture = self.picture_descriptor(PICTURE_SUB_DESCRIPTOR, PICTURE_TRACK_ID);
        let sound = self.sound_descriptor(SOUND_SUB_DESCRIPTOR, audio_rate);
        self.sets.extend([multiple, picture, sound]);
        self
    }

    /// Picture and sound in two essence containers, each with its own file
    /// package, BodySID and IndexSID.
    pub fn separate_files(mut self, video_rate: Rational, audio_rate: Rational) -> Self {
        self.common_sets(&[MP_PICTURE_TRACK, MP_SOUND_TRACK, MP_TIMECODE_TRACK]);
        self.material_track(
            (MP_PICTURE_TRACK, MP_PICTURE_SEQUENCE, MP_PICTURE_CLIP),
            PICTURE_TRACK_ID,
            TrackType::Picture,
            video_rate,
            SOURCE_UMID,
        );
        self.material_track(
            (MP_SOUND_TRACK, MP_SOUND_SEQUENCE, MP_SOUND_CLIP),
            SOUND_TRACK_ID,
            TrackType::Sound,
            audio_rate,
            SOUND_SOURCE_UMID,
        );
        self.source_package((SOURCE_PACKAGE, SOURCE_UMID, DESCRIPTOR), &[SP_PICTURE_TRACK]);
        self.source_track(
            (SP_PICTURE_TRACK, SP_PICTURE_SEQUENCE, SP_PICTURE_CLIP),
            PICTURE_TRACK_ID,
            PICTURE_TRACK_NUMBER,
            TrackType::Picture,
            video_rate,
        );
        self.source_package(
            (SOUND_SOURCE_PACKAGE, SOUND_SOURCE_UMID, SOUND_DESCRIPTOR),
            &[SP_SOUND_TRACK],
        );
        self.source_track(
            (SP_SOUND_TRACK, SP_SOUND_SEQUENCE, SP_SOUND_CLIP),
            SOUND_TRACK_ID,
            SOUND_TRACK_NUMBER,
            TrackType::Sound,
            audio_rate,
        );
        let picture = self.picture_descriptor(DESCRIPTOR, PICTURE_TRACK_ID);
        let sound = self.sound_descriptor(SOUND_DESCRIPTOR, audio_rate);
        self.sets.extend([picture, sound]);

        if let Some(storage) = self.set_mut(CONTENT_STORAGE) {
            storage.set(
                0x1901,
                uid_batch(&[MATERIAL_PACKAGE, SOURCE_PACKAGE, SOUND_SOURCE_PACKAGE]),
            );
            storage.set(
                0x1902,
                uid_batch(&[ESSENCE_CONTAINER_DATA, SOUND_ESSENCE_CONTAINER_DATA]),
            );
        }
        self.sets.push(
            LocalSet::new(SetType::EssenceContainerData, SOUND_ESSENCE_CONTAINER_DATA)
                .with(0x2701, umid(SOUND_SOURCE_UMID).0.to_vec())
                .with(0x3f06, be_u32(SOUND_INDEX_SID))
                .with(0x3f07, be_u32(SOUND_BODY_SID)),
        );
        self
    }

    /// Rewrite the identification set.
    pub fn identification(&mut self, company: &str, product: &str, major: u16, minor: u16) {
        let mut version = Vec::with_capacity(10);
        for v in [major, minor, 0, 0, 0] {
            version.put_u16(v);
        }
        if let Some(set) = self.set_mut(IDENTIFICATION) {
            set.set(0x3c01, utf16(company));
            set.set(0x3c02, utf16(product));
            set.set(0x3c03, version);
        }
    }

    pub fn remove_content_storage(&mut self) {
        let storage = uid(CONTENT_STORAGE);
        self.sets.retain(|s| s.uid != storage);
    }

    /// Turn the file descriptor into a multiple descriptor listing itself.
    pub fn self_referencing_descriptor(&mut self) {
        if let Some(set) = self.set_mut(DESCRIPTOR) {
            set.set_type = SetType::MultipleDescriptor.into();
            set.set(0x3f01, uid_batch(&[DESCRIPTOR]));
        }
    }

    pub fn source_package_umid(&self) -> Umid {
        umid(SOURCE_UMID)
    }

    pub fn material_package_umid(&self) -> Umid {
        umid(MATERIAL_UMID)
    }

    /// Decode every set into a fresh store, as the demuxer would.
    pub fn build_store(&self) -> MetadataStore {
        let primer = PrimerPack::default();
        let mut store = MetadataStore::new();
        let mut offset = 1000;
        for set in &self.sets {
            let payload = set.payload();
            let klv = KlvPacket {
                key: Ul(set.key()),
                offset,
                length: payload.len() as u64,
                data_offset: 20,
                payload: Some(Bytes::from(payload)),
                consumed: 0,
            };
            offset += klv.total_size();
            if let Some(entry) = parse_metadata_set(set.set_type, &primer, &klv)
                .expect("generated metadata set decodes")
            {
                store.insert(entry).expect("generated metadata set inserts");
            }
        }
        store
    }

    /// Every set as KLV packets.
    fn encode(&self) -> Vec<u8> {
        self.sets.iter().flat_map(|s| s.encode()).collect()
    }

    fn set_mut(&mut self, n: u8) -> Option<&mut LocalSet> {
        let uid = uid(n);
        self.sets.iter_mut().find(|s| s.uid == uid)
    }

    fn common_sets(&mut self, material_tracks: &[u8]) {
        let mut version = Vec::with_capacity(10);
        for v in [1u16, 2, 0, 0, 0] {
            version.put_u16(v);
        }
        self.sets.push(
            LocalSet::new(SetType::Preface, PREFACE)
                .with(0x3b05, be_u16(259))
                .with(0x3b03, uid(CONTENT_STORAGE).0.to_vec())
                .with(0x3b06, uid_batch(&[IDENTIFICATION]))
                .with(0x3b09, OP1A.0.to_vec()),
        );
        self.sets.push(
            LocalSet::new(SetType::Identification, IDENTIFICATION)
                .with(0x3c09, uid(60).0.to_vec())
                .with(0x3c01, utf16("mxf-demux"))
                .with(0x3c02, utf16("test writer"))
                .with(0x3c03, version),
        );
        self.sets.push(
            LocalSet::new(SetType::ContentStorage, CONTENT_STORAGE)
                .with(0x1901, uid_batch(&[MATERIAL_PACKAGE, SOURCE_PACKAGE]))
                .with(0x1902, uid_batch(&[ESSENCE_CONTAINER_DATA])),
        );
        self.sets.push(
            LocalSet::new(SetType::EssenceContainerData, ESSENCE_CONTAINER_DATA)
                .with(0x2701, umid(SOURCE_UMID).0.to_vec())
                .with(0x3f06, be_u32(INDEX_SID))
                .with(0x3f07, be_u32(BODY_SID)),
        );
        self.sets.push(
            LocalSet::new(SetType::MaterialPackage, MATERIAL_PACKAGE)
                .with(0x4401, umid(MATERIAL_UMID).0.to_vec())
                .with(0x4402, utf16("material"))
                .with(0x4403, uid_batch(material_tracks)),
        );

        let timecode = TrackType::Timecode12mInactive.data_definition().unwrap_or_default();
        self.sets.push(
            LocalSet::new(SetType::TimelineTrack, MP_TIMECODE_TRACK)
                .with(0x4801, be_u32(TIMECODE_TRACK_ID))
                .with(0x4804, be_u32(0))
                .with(0x4803, uid(MP_TIMECODE_SEQUENCE).0.to_vec())
                .with(0x4b01, rational(EDIT_RATE))
                .with(0x4b02, be_i64(0)),
        );
        self.sets.push(
            LocalSet::new(SetType::Sequence, MP_TIMECODE_SEQUENCE)
                .with(0x0201, timecode.0.to_vec())
                .with(0x0202, be_i64(self.duration))
                .with(0x1001, uid_batch(&[MP_TIMECODE])),
        );
        self.sets.push(
            LocalSet::new(SetType::TimecodeComponent, MP_TIMECODE)
                .with(0x0201, timecode.0.to_vec())
                .with(0x0202, be_i64(self.duration))
                .with(0x1502, be_u16(25))
                .with(0x1501, be_i64(START_TIMECODE))
                .with(0x1503, be_u8(0)),
        );
    }

    fn material_track(
        &mut self,
        (track, sequence, clip): (u8, u8, u8),
        track_id: u32,
        track_type: TrackType,
        rate: Rational,
        source: u8,
    ) {
        let dd = track_type.data_definition().unwrap_or_default();
        self.sets.push(
            LocalSet::new(SetType::TimelineTrack, track)
                .with(0x4801, be_u32(track_id))
                .with(0x4804, be_u32(0))
                .with(0x4802, utf16(track_type.as_str()))
                .with(0x4803, uid(sequence).0.to_vec())
                .with(0x4b01, rational(rate))
                .with(0x4b02, be_i64(0)),
        );
        self.sets.push(
            LocalSet::new(SetType::Sequence, sequence)
                .with(0x0201, dd.0.to_vec())
                .with(0x0202, be_i64(self.duration))
                .with(0x1001, uid_batch(&[clip])),
        );
        self.sets.push(
            LocalSet::new(SetType::SourceClip, clip)
                .with(0x0201, dd.0.to_vec())
                .with(0x0202, be_i64(self.duration))
                .with(0x1201, be_i64(0))
                .with(0x1101, umid(source).0.to_vec())
                .with(0x1102, be_u32(track_id)),
        );
    }

    fn source_package(&mut self, (set, package, descriptor): (u8, u8, u8), tracks: &[u8]) {
        self.sets.push(
            LocalSet::new(SetType::SourcePackage, set)
                .with(0x4401, umid(package).0.to_vec())
                .with(0x4403, uid_batch(tracks))
                .with(0x4701, uid(descriptor).0.to_vec()),
        );
    }

    fn source_track(
        &mut self,
        (track, sequence, clip): (u8, u8, u8),
        track_id: u32,
        track_number: u32,
        track_type: TrackType,
        rate: Rational,
    ) {
        let dd = track_type.data_definition().unwrap_or_default();
        self.sets.push(
            LocalSet::new(SetType::TimelineTrack, track)
                .with(0x4801, be_u32(track_id))
                .with(0x4804, be_u32(track_number))
                .with(0x4803, uid(sequence).0.to_vec())
                .with(0x4b01, rational(rate))
                .with(0x4b02, be_i64(0)),
        );
        self.sets.push(
            LocalSet::new(SetType::Sequence, sequence)
                .with(0x0201, dd.0.to_vec())
                .with(0x0202, be_i64(self.duration))
                .with(0x1001, uid_batch(&[clip])),
        );
        self.sets.push(
            LocalSet::new(SetType::SourceClip, clip)
                .with(0x0201, dd.0.to_vec())
                .with(0x0202, be_i64(self.duration))
                .with(0x1201, be_i64(0))
                .with(0x1101, Umid::default().0.to_vec())
                .with(0x1102, be_u32(0)),
        );
    }

    /// 48 kHz mono 16 bit wave audio.
    fn sound_descriptor(&self, n: u8, rate: Rational) -> LocalSet {
        LocalSet::new(SetType::WaveAudioDescriptor, n)
            .with(0x3006, be_u32(SOUND_TRACK_ID))
            .with(0x3001, rational(rate))
            .with(0x3002, be_i64(self.duration))
            .with(0x3004, BWF_FRAME_CONTAINER.0.to_vec())
            .with(0x3d03, rational(Rational::new(48_000, 1)))
            .with(0x3d07, be_u32(1))
            .with(0x3d01, be_u32(16))
            .with(0x3d0a, be_u16(2))
            .with(0x3d09, be_u32(96_000))
    }

    fn picture_descriptor(&self, n: u8, linked_track_id: u32) -> LocalSet {
        LocalSet::new(SetType::CdciDescriptor, n)
            .with(0x3006, be_u32(linked_track_id))
            .with(0x3001, rational(EDIT_RATE))
            .with(0x3002, be_i64(self.duration))
            .with(0x3004, test_container(self.wrapping).0.to_vec())
            .with(0x3201, TEST_PICTURE_CODING.0.to_vec())
            .with(0x3203, be_u32(16))
            .with(0x3202, be_u32(16))
            .with(0x320c, be_u8(0))
            .with(0x320e, rational(Rational::new(4, 3)))
    }
}

/// A generated file and where its parts are
///
/// Offsets are relative to the header partition pack, run-in excluded.
#[derive(Debug, Clone)]
pub struct MxfFile {
    pub data: Vec<u8>,
    pub run_in: u64,
    pub rip_offset: Option<u64>,
    /// Header first, footer last
    pub partition_offsets: Vec<u64>,
    pub first_metadata_offset: u64,
    /// Essence element KLVs; for interleaved files, the picture element
    /// starting each content package
    pub essence_offsets: Vec<u64>,
    /// Sound element KLVs of files with separate containers
    pub sound_offsets: Vec<u64>,
}

impl MxfFile {
    /// Payload of picture frame `i`.
    pub fn frame(&self, i: usize) -> Vec<u8> {
        vec![i as u8; picture_size(i, false)]
    }
}

fn picture_size(i: usize, constant: bool) -> usize {
    if constant {
        CONSTANT_PICTURE_SIZE
    } else {
        100 + 7 * i
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexPlacement {
    None,
    Header,
    Footer,
}

/// Lays out a complete MXF file
#[derive(Debug, Clone)]
pub struct MxfBuilder {
    frames: usize,
    interleaved: bool,
    separate: bool,
    clip: bool,
    body_partitions: bool,
    index: IndexPlacement,
    corrupt_entry: Option<usize>,
    run_in: usize,
    footer_metadata: bool,
    rip: bool,
    product_name: Option<String>,
}

impl MxfBuilder {
    /// Frame wrapped picture track of `frames` edit units, essence in the
    /// header partition.
    pub fn single_track(frames: usize) -> Self {
        Self {
            frames,
            interleaved: false,
            separate: false,
            clip: false,
            body_partitions: false,
            index: IndexPlacement::None,
            corrupt_entry: None,
            run_in: 0,
            footer_metadata: false,
            rip: true,
            product_name: None,
        }
    }

    /// Picture and 48 kHz mono sound interleaved frame by frame.
    pub fn interleaved(frames: usize) -> Self {
        Self {
            interleaved: true,
            ..Self::single_track(frames)
        }
    }

    /// Picture and 48 kHz mono sound in separate containers: a body
    /// partition holding every picture frame, then one holding every sound
    /// frame, both indexed in the footer.
    pub fn separate_containers(frames: usize) -> Self {
        Self {
            separate: true,
            index: IndexPlacement::Footer,
            ..Self::single_track(frames)
        }
    }

    /// All frames in a single clip wrapped element. Clip wrapping can only
    /// be read with an index, so this implies [`with_index`](Self::with_index).
    pub fn clip_wrapped(frames: usize) -> Self {
        Self {
            clip: true,
            index: IndexPlacement::Footer,
            ..Self::single_track(frames)
        }
    }

    /// Move the essence into body partitions of two frames each.
    pub fn with_body_partitions(mut self) -> Self {
        self.body_partitions = true;
        self
    }

    /// Index table segment in the footer partition.
    pub fn with_index(mut self) -> Self {
        self.index = IndexPlacement::Footer;
        self
    }

    /// Index table segment in the header partition, after the metadata.
    pub fn with_index_in_header(mut self) -> Self {
        self.index = IndexPlacement::Header;
        self
    }

    /// Shift the stream offset of index entry `i` by one byte.
    pub fn corrupt_index_entry(mut self, i: usize) -> Self {
        self.corrupt_entry = Some(i);
        self
    }

    /// Prefix the file with `bytes` bytes of run-in.
    pub fn with_run_in(mut self, bytes: usize) -> Self {
        self.run_in = bytes;
        self
    }

    /// Mark the header open and incomplete and repeat the metadata in the
    /// footer, where the identification names `product`.
    pub fn with_footer_metadata(mut self, product: &str) -> Self {
        self.footer_metadata = true;
        self.product_name = Some(product.to_string());
        self
    }

    /// Leave out the random index pack.
    pub fn without_rip(mut self) -> Self {
        self.rip = false;
        self
    }

    /// Handlers able to read generated files.
    pub fn registry() -> HandlerRegistry {
        HandlerRegistry::with_builtin().with_handler(TestPictureHandler)
    }

    fn metadata(&self) -> MetadataBuilder {
        let builder = MetadataBuilder::new().duration(self.frames as i64);
        let builder = if self.clip { builder.clip_wrapped() } else { builder };
        if self.interleaved {
            builder.interleaved_file(EDIT_RATE, EDIT_RATE)
        } else if self.separate {
            builder.separate_files(EDIT_RATE, EDIT_RATE)
        } else {
            builder.single_track_file()
        }
    }

    /// Essence KLVs in stream order, one entry per edit unit (one for a
    /// clip), plus the size of the picture element of each.
    fn essence(&self) -> Vec<(Vec<u8>, u64)> {
        let picture_key = essence_key(PICTURE_TRACK_NUMBER);
        if self.clip {
            let data: Vec<u8> = (0..self.frames)
                .flat_map(|i| vec![i as u8; CONSTANT_PICTURE_SIZE])
                .collect();
            let element = klv(&picture_key, &data);
            let size = element.len() as u64;
            return vec![(element, size)];
        }

        (0..self.frames)
            .map(|i| {
                let picture = klv(&picture_key, &vec![i as u8; picture_size(i, self.interleaved)]);
                let picture_len = picture.len() as u64;
                let mut package = picture;
                if self.interleaved {
                    package.extend(sound_element(i));
                }
                (package, picture_len)
            })
            .collect()
    }

    /// Sound KLVs of the second container, one per edit unit.
    fn sound_essence(&self) -> Vec<(Vec<u8>, u64)> {
        if !self.separate {
            return Vec::new();
        }
        (0..self.frames)
            .map(|i| {
                let element = sound_element(i);
                let len = element.len() as u64;
                (element, len)
            })
            .collect()
    }

    fn index_segment(
        &self,
        essence: &[(Vec<u8>, u64)],
        (instance, index_sid, body_sid): (u8, u32, u32),
    ) -> Vec<u8> {
        let mut set = LocalSet::new(SetType::Unknown(0x0110), instance)
            .with(0x3f0b, rational(EDIT_RATE))
            .with(0x3f0c, be_i64(0))
            .with(0x3f0d, be_i64(self.frames as i64))
            .with(0x3f06, be_u32(index_sid))
            .with(0x3f07, be_u32(body_sid));

        if self.clip {
            set.set(0x3f05, be_u32(CONSTANT_PICTURE_SIZE as u32));
            return klv(&INDEX_SEGMENT_KEY, &set.payload());
        }

        set.set(0x3f05, be_u32(0));
        set.set(0x3f08, be_u8(0));
        set.set(0x3f0e, be_u8(0));

        let mut deltas: Vec<Vec<u8>> = vec![vec![0, 0, 0, 0, 0, 0]];
        if self.interleaved {
            let mut sound = vec![0, 0];
            sound.put_u32(essence.first().map_or(0, |(_, picture)| *picture as u32));
            deltas.push(sound);
        }
        let items: Vec<&[u8]> = deltas.iter().map(|d| d.as_slice()).collect();
        set.set(0x3f09, batch(&items, 6));

        let mut stream_offset = 0u64;
        let mut entries = Vec::with_capacity(essence.len());
        for (i, (element, _)) in essence.iter().enumerate() {
            let mut entry = Vec::with_capacity(11);
            let gop_position = i as u64 % GOP;
            entry.put_i8(0);
            entry.put_i8(-(gop_position as i8));
            entry.put_u8(if gop_position == 0 { 0x80 } else { 0 });
            let corrupt = u64::from(self.corrupt_entry == Some(i));
            entry.put_u64(stream_offset + corrupt);
            entries.push(entry);
            stream_offset += element.len() as u64;
        }
        let items: Vec<&[u8]> = entries.iter().map(|e| e.as_slice()).collect();
        set.set(0x3f0a, batch(&items, 11));

        klv(&INDEX_SEGMENT_KEY, &set.payload())
    }

    pub fn build(&self) -> MxfFile {
        let metadata = self.metadata();
        let essence = self.essence();
        let sound = self.sound_essence();
        let index = match self.index {
            IndexPlacement::None => Vec::new(),
            _ => {
                let mut index = self.index_segment(&essence, (INDEX_SEGMENT, INDEX_SID, BODY_SID));
                if self.separate {
                    index.extend(self.index_segment(
                        &sound,
                        (SOUND_INDEX_SEGMENT, SOUND_INDEX_SID, SOUND_BODY_SID),
                    ));
                }
                index
            }
        };
        let header_metadata = header_metadata_blob(&metadata);

        let mut data = Vec::new();
        let mut partitions: Vec<(u64, u32)> = Vec::new();
        let mut footer_fields = Vec::new();

        // header
        let essence_in_header = !self.body_partitions && !self.separate;
        let header_index = if self.index == IndexPlacement::Header {
            index.as_slice()
        } else {
            &[]
        };
        let header_status = if self.footer_metadata {
            OPEN_INCOMPLETE
        } else {
            CLOSED_COMPLETE
        };
        let header_body_sid = if essence_in_header { BODY_SID } else { 0 };
        let pack = PackFields {
            this: 0,
            prev: 0,
            footer: 0,
            hbc: header_metadata.len() as u64,
            ibc: header_index.len() as u64,
            index_sid: if header_index.is_empty() { 0 } else { INDEX_SID },
            body_offset: 0,
            body_sid: header_body_sid,
            wrapping: self.wrapping(),
        };
        footer_fields.push(data.len() + FOOTER_FIELD);
        data.extend(partition_pack(HEADER, header_status, &pack));
        partitions.push((0, header_body_sid));
        let first_metadata_offset = (data.len() + primer_len()) as u64;
        data.extend(&header_metadata);
        data.extend(header_index);

        let mut essence_offsets = Vec::new();
        let mut sound_offsets = Vec::new();
        let mut stream_offset = 0u64;
        if self.separate {
            for (body_sid, elements) in [(BODY_SID, &essence), (SOUND_BODY_SID, &sound)] {
                let this = data.len() as u64;
                let pack = PackFields {
                    this,
                    prev: partitions.last().map_or(0, |p| p.0),
                    footer: 0,
                    hbc: 0,
                    ibc: 0,
                    index_sid: 0,
                    body_offset: 0,
                    body_sid,
                    wrapping: self.wrapping(),
                };
                footer_fields.push(data.len() + FOOTER_FIELD);
                data.extend(partition_pack(BODY, CLOSED_COMPLETE, &pack));
                partitions.push((this, body_sid));
                let offsets = if body_sid == BODY_SID {
                    &mut essence_offsets
                } else {
                    &mut sound_offsets
                };
                for (element, _) in elements {
                    offsets.push(data.len() as u64);
                    data.extend(element);
                }
            }
        } else if essence_in_header {
            for (element, _) in &essence {
                essence_offsets.push(data.len() as u64);
                data.extend(element);
                stream_offset += element.len() as u64;
            }
        } else {
            for chunk in essence.chunks(2) {
                let this = data.len() as u64;
                let pack = PackFields {
                    this,
                    prev: partitions.last().map_or(0, |p| p.0),
                    footer: 0,
                    hbc: 0,
                    ibc: 0,
                    index_sid: 0,
                    body_offset: stream_offset,
                    body_sid: BODY_SID,
                    wrapping: self.wrapping(),
                };
                footer_fields.push(data.len() + FOOTER_FIELD);
                data.extend(partition_pack(BODY, CLOSED_COMPLETE, &pack));
                partitions.push((this, BODY_SID));
                for (element, _) in chunk {
                    essence_offsets.push(data.len() as u64);
                    data.extend(element);
                    stream_offset += element.len() as u64;
                }
            }
        }

        // footer
        let footer_offset = data.len() as u64;
        let footer_metadata = if self.footer_metadata {
            let mut metadata = metadata.clone();
            if let Some(product) = &self.product_name {
                metadata.identification("mxf-demux", product, 1, 2);
            }
            header_metadata_blob(&metadata)
        } else {
            Vec::new()
        };
        let footer_index = if self.index == IndexPlacement::Footer {
            index.as_slice()
        } else {
            &[]
        };
        let pack = PackFields {
            this: footer_offset,
            prev: partitions.last().map_or(0, |p| p.0),
            footer: footer_offset,
            hbc: footer_metadata.len() as u64,
            ibc: footer_index.len() as u64,
            index_sid: if footer_index.is_empty() { 0 } else { INDEX_SID },
            body_offset: 0,
            body_sid: 0,
            wrapping: self.wrapping(),
        };
        data.extend(partition_pack(FOOTER, CLOSED_COMPLETE, &pack));
        partitions.push((footer_offset, 0));
        data.extend(&footer_metadata);
        data.extend(footer_index);

        for field in footer_fields {
            data[field..field + 8].copy_from_slice(&footer_offset.to_be_bytes());
        }

        let rip_offset = self.rip.then(|| {
            let offset = data.len() as u64;
            let mut payload = Vec::with_capacity(partitions.len() * 12 + 4);
            for (this, body_sid) in &partitions {
                payload.put_u32(*body_sid);
                payload.put_u64(this + self.run_in as u64);
            }
            let total = 20 + payload.len() + 4;
            payload.put_u32(total as u32);
            let mut key = [0u8; 16];
            key[..13].copy_from_slice(&PARTITION_KEY);
            key[13] = 0x11;
            key[14] = 0x01;
            data.extend(klv(&key, &payload));
            offset
        });

        let mut file = vec![0u8; self.run_in];
        for (i, b) in file.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        file.extend(data);

        MxfFile {
            data: file,
            run_in: self.run_in as u64,
            rip_offset,
            partition_offsets: partitions.iter().map(|p| p.0).collect(),
            first_metadata_offset,
            essence_offsets,
            sound_offsets,
        }
    }

    fn wrapping(&self) -> u8 {
        if self.clip {
            TEST_CLIP_WRAPPED
        } else {
            TEST_FRAME_WRAPPED
        }
    }
}

/// One edit unit of 16 bit sound for frame `i`.
fn sound_element(i: usize) -> Vec<u8> {
    let samples: Vec<u8> = (0..AUDIO_SAMPLES_PER_FRAME)
        .flat_map(|s| ((s as i16).wrapping_mul(i as i16 + 1)).to_le_bytes())
        .collect();
    klv(&essence_key(SOUND_TRACK_NUMBER), &samples)
}

fn essence_key(track_number: u32) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..12].copy_from_slice(&ESSENCE_KEY);
    key[12..].copy_from_slice(&track_number.to_be_bytes());
    key
}

struct PackFields {
    this: u64,
    prev: u64,
    footer: u64,
    hbc: u64,
    ibc: u64,
    index_sid: u32,
    body_offset: u64,
    body_sid: u32,
    wrapping: u8,
}

/// Position of the footer partition field from the start of a pack
const FOOTER_FIELD: usize = 20 + 24;

fn partition_pack(kind: u8, status: u8, fields: &PackFields) -> Vec<u8> {
    let mut payload = Vec::with_capacity(112);
    payload.put_u16(1);
    payload.put_u16(3);
    payload.put_u32(1);
    payload.put_u64(fields.this);
    payload.put_u64(fields.prev);
    payload.put_u64(fields.footer);
    payload.put_u64(fields.hbc);
    payload.put_u64(fields.ibc);
    payload.put_u32(fields.index_sid);
    payload.put_u64(fields.body_offset);
    payload.put_u32(fields.body_sid);
    payload.put_slice(&OP1A.0);
    let container = test_container(fields.wrapping);
    payload.extend(batch(&[&container.0[..]], 16));

    let mut key = [0u8; 16];
    key[..13].copy_from_slice(&PARTITION_KEY);
    key[13] = kind;
    key[14] = status;
    klv(&key, &payload)
}

fn primer() -> Vec<u8> {
    let mut item = Vec::with_capacity(18);
    item.put_u16(0x3c0a);
    item.put_slice(&INSTANCE_UID_LABEL.0);
    let mut key = [0u8; 16];
    key[..13].copy_from_slice(&PARTITION_KEY);
    key[13] = 0x05;
    key[14] = 0x01;
    klv(&key, &batch(&[&item], 18))
}

fn primer_len() -> usize {
    primer().len()
}

/// Primer pack followed by every metadata set
/// Primer and metadata sets, padded with a fill item the way writers
/// reserve room for later metadata updates.
fn header_metadata_blob(metadata: &MetadataBuilder) -> Vec<u8> {
    let mut out = primer();
    out.extend(metadata.encode());
    out.extend(klv(&FILL_KEY, &[0u8; METADATA_PADDING]));
    out
}

/// Passes picture frames of the test container through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPictureHandler;

impl TestPictureHandler {
    fn wrapping_byte(track: &TrackDescription) -> Option<u8> {
        let ul = track.essence_container()?;
        (ul.0[..14] == TEST_CONTAINER).then_some(ul.0[14])
    }
}

impl EssenceHandler for TestPictureHandler {
    fn name(&self) -> &'static str {
        "test-picture"
    }

    fn recognizes(&self, track: &TrackDescription) -> bool {
        track.track_type == TrackType::Picture && Self::wrapping_byte(track).is_some()
    }

    fn classify_wrapping(&self, track: &TrackDescription) -> Wrapping {
        match Self::wrapping_byte(track) {
            Some(TEST_FRAME_WRAPPED) => Wrapping::Frame,
            Some(TEST_CLIP_WRAPPED) => Wrapping::Clip,
            Some(_) => Wrapping::Custom,
            None => Wrapping::Unknown,
        }
    }

    fn build_caps(&self, track: &TrackDescription) -> Option<EssenceMapping> {
        let picture = track.picture()?;
        let caps = MediaCaps::new("video/x-test")
            .with("width", CapsValue::Int(i64::from(picture.stored_width)))
            .with("height", CapsValue::Int(i64::from(picture.stored_height)))
            .with("framerate", CapsValue::Fraction(track.edit_rate));
        Some(
            EssenceMapping::new(caps)
                .intra_only(true)
                .tag("video-codec", "test picture"),
        )
    }

    fn transform(
        &self,
        _key: &Ul,
        buffer: Bytes,
        _track: &TrackDescription,
        _mapping: &EssenceMapping,
    ) -> Result<Bytes> {
        Ok(buffer)
    }
}

/// Get path to a fixture file
///
/// Search order:
/// 1. MXF_TEST_FIXTURES env var (for extended test sets)
/// 2. Default tests/fixtures directory
pub fn fixture_path(file_name: &str) -> PathBuf {
    if let Ok(custom_dir) = std::env::var("MXF_TEST_FIXTURES") {
        let path = PathBuf::from(custom_dir).join(file_name);
        if path.exists() {
            return path;
        }
    }

    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(file_name);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klv::parse_header;
    use crate::partition::PartitionPack;

    fn packet(data: &[u8], offset: u64) -> KlvPacket {
        let mut klv = parse_header(&data[offset as usize..], offset).unwrap();
        let start = (offset + klv.data_offset) as usize;
        klv.payload = Some(Bytes::copy_from_slice(&data[start..start + klv.length as usize]));
        klv
    }

    #[test]
    fn test_partitions_link_to_footer() {
        let file = MxfBuilder::single_track(5).with_body_partitions().build();
        assert_eq!(file.partition_offsets.len(), 5);
        let footer = *file.partition_offsets.last().unwrap();
        for offset in &file.partition_offsets {
            let pack = PartitionPack::parse(&packet(&file.data, *offset)).unwrap();
            assert_eq!(pack.this_partition, *offset);
            assert_eq!(pack.footer_partition, footer);
        }
    }

    #[test]
    fn test_body_offsets_follow_essence() {
        let file = MxfBuilder::single_track(4).with_body_partitions().build();
        let second = PartitionPack::parse(&packet(&file.data, file.partition_offsets[2])).unwrap();
        let first_two = file.essence_offsets[1] - file.essence_offsets[0]
            + packet(&file.data, file.essence_offsets[1]).total_size();
        assert_eq!(second.body_offset, first_two);
    }

    #[test]
    fn test_essence_payloads() {
        let file = MxfBuilder::single_track(3).with_run_in(16).build();
        let base = file.run_in;
        let klv = packet(&file.data[base as usize..], file.essence_offsets[2]);
        assert_eq!(klv.key.essence_track_number(), PICTURE_TRACK_NUMBER);
        assert_eq!(klv.data(), file.frame(2).as_slice());
    }

    #[test]
    fn test_separate_containers_layout() {
        let file = MxfBuilder::separate_containers(3).build();
        // header, picture body, sound body, footer
        assert_eq!(file.partition_offsets.len(), 4);
        let picture = PartitionPack::parse(&packet(&file.data, file.partition_offsets[1])).unwrap();
        let sound = PartitionPack::parse(&packet(&file.data, file.partition_offsets[2])).unwrap();
        assert_eq!((picture.body_sid, picture.body_offset), (BODY_SID, 0));
        assert_eq!((sound.body_sid, sound.body_offset), (SOUND_BODY_SID, 0));

        assert_eq!(file.sound_offsets.len(), 3);
        assert!(file.essence_offsets.iter().all(|o| *o < file.partition_offsets[2]));
        assert!(file.sound_offsets.iter().all(|o| *o > file.partition_offsets[2]));
        let klv = packet(&file.data, file.sound_offsets[1]);
        assert_eq!(klv.key.essence_track_number(), SOUND_TRACK_NUMBER);
        assert_eq!(klv.length as usize, AUDIO_SAMPLES_PER_FRAME * 2);
    }

    #[test]
    fn test_separate_files_metadata() {
        let mut store = MetadataBuilder::new().separate_files(EDIT_RATE, EDIT_RATE).build_store();
        store.resolve().unwrap();
        let containers: Vec<(u32, u32)> = store
            .essence_containers()
            .map(|e| (e.body_sid, e.index_sid))
            .collect();
        assert_eq!(containers, vec![(BODY_SID, INDEX_SID), (SOUND_BODY_SID, SOUND_INDEX_SID)]);
        assert_eq!(store.packages().count(), 3);
    }

    #[test]
    fn test_fixture_path() {
        let path = fixture_path("sample.mxf");
        assert!(path.to_string_lossy().contains("sample.mxf"));
    }
}
