//! Typed structural metadata sets.
//!
//! Each set keeps the strong references it declares (`*_uids`) separately
//! from the links established by resolution, so that a resolve pass can be
//! thrown away and redone without reparsing.

use std::fmt;

use crate::error::Result;
use crate::klv::{utf16_string, FieldReader, LocalTag};
use crate::time::Rational;
use crate::ul::{TrackType, Ul, Umid, Uuid};

macro_rules! settype {
    ($( $name:ident => $value:expr ),*) => {
        /// Structural metadata set type, bytes 13-14 of the set key
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum SetType {
            $( $name, )*
            Unknown(u16),
        }

        impl From<u16> for SetType {
            fn from(t: u16) -> SetType {
                match t {
                    $( $value => SetType::$name, )*
                    _ => SetType::Unknown(t),
                }
            }
        }

        impl From<SetType> for u16 {
            fn from(t: SetType) -> u16 {
                match t {
                    $( SetType::$name => $value, )*
                    SetType::Unknown(t) => t,
                }
            }
        }
    }
}

settype! {
    Sequence => 0x010f,
    SourceClip => 0x0111,
    TimecodeComponent => 0x0114,
    ContentStorage => 0x0118,
    EssenceContainerData => 0x0123,
    FileDescriptor => 0x0125,
    GenericPictureDescriptor => 0x0127,
    CdciDescriptor => 0x0128,
    RgbaDescriptor => 0x0129,
    Preface => 0x012f,
    Identification => 0x0130,
    NetworkLocator => 0x0132,
    TextLocator => 0x0133,
    MaterialPackage => 0x0136,
    SourcePackage => 0x0137,
    EventTrack => 0x0139,
    StaticTrack => 0x013a,
    TimelineTrack => 0x013b,
    GenericSoundDescriptor => 0x0142,
    GenericDataDescriptor => 0x0143,
    MultipleDescriptor => 0x0144,
    Aes3AudioDescriptor => 0x0147,
    WaveAudioDescriptor => 0x0148
}

/// Date and time as stored in MXF: year, month, day, hour, minute,
/// second and quarter milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub msecond: u16,
}

impl Timestamp {
    pub(crate) fn read(r: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            year: r.u16()?,
            month: r.u8()?,
            day: r.u8()?,
            hour: r.u8()?,
            minute: r.u8()?,
            second: r.u8()?,
            msecond: u16::from(r.u8()?) * 4,
        })
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.msecond
        )
    }
}

/// Five-part product version of an Identification set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProductVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
    pub release: u16,
}

impl ProductVersion {
    fn read(r: &mut FieldReader<'_>) -> Result<Self> {
        let major = r.u16()?;
        let minor = r.u16()?;
        let patch = r.u16()?;
        let build = r.u16()?;
        // some writers drop the release field
        let release = if r.remaining() >= 2 { r.u16()? } else { 0 };
        Ok(Self {
            major,
            minor,
            patch,
            build,
            release,
        })
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build, self.release
        )
    }
}

fn read_rational(r: &mut FieldReader<'_>) -> Result<Rational> {
    Ok(Rational::new(r.i32()?, r.i32()?))
}

fn uuid_batch(tag: &LocalTag<'_>) -> Result<Vec<Uuid>> {
    Ok(tag
        .reader()
        .batch(16)?
        .into_iter()
        .filter_map(Uuid::from_slice)
        .collect())
}

fn ul_batch(tag: &LocalTag<'_>) -> Result<Vec<Ul>> {
    Ok(tag
        .reader()
        .batch(16)?
        .into_iter()
        .filter_map(Ul::from_slice)
        .collect())
}

fn string(tag: &LocalTag<'_>) -> Option<String> {
    let s = utf16_string(tag.value);
    (!s.is_empty()).then_some(s)
}

#[derive(Debug, Clone, Default)]
pub struct Preface {
    pub last_modified_date: Timestamp,
    pub version: u16,
    pub object_model_version: u32,
    pub primary_package_uid: Option<Uuid>,
    pub identification_uids: Vec<Uuid>,
    pub content_storage_uid: Uuid,
    pub operational_pattern: Ul,
    pub essence_containers: Vec<Ul>,
    pub dm_schemes: Vec<Ul>,

    // resolved
    pub primary_package: Option<Uuid>,
    pub identifications: Vec<Uuid>,
    pub content_storage: Option<Uuid>,
}

impl Preface {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x3b02 => self.last_modified_date = Timestamp::read(&mut r)?,
            0x3b05 => self.version = r.u16()?,
            0x3b07 => self.object_model_version = r.u32()?,
            0x3b08 => self.primary_package_uid = Some(r.uuid()?),
            0x3b06 => self.identification_uids = uuid_batch(tag)?,
            0x3b03 => self.content_storage_uid = r.uuid()?,
            0x3b09 => self.operational_pattern = r.ul()?,
            0x3b0a => self.essence_containers = ul_batch(tag)?,
            0x3b0b => self.dm_schemes = ul_batch(tag)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Identification {
    pub this_generation_uid: Uuid,
    pub company_name: Option<String>,
    pub product_name: Option<String>,
    pub product_version: ProductVersion,
    pub version_string: Option<String>,
    pub product_uid: Uuid,
    pub modification_date: Timestamp,
    pub toolkit_version: ProductVersion,
    pub platform: Option<String>,
}

impl Identification {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x3c09 => self.this_generation_uid = r.uuid()?,
            0x3c01 => self.company_name = string(tag),
            0x3c02 => self.product_name = string(tag),
            0x3c03 => self.product_version = ProductVersion::read(&mut r)?,
            0x3c04 => self.version_string = string(tag),
            0x3c05 => self.product_uid = r.uuid()?,
            0x3c06 => self.modification_date = Timestamp::read(&mut r)?,
            0x3c07 => self.toolkit_version = ProductVersion::read(&mut r)?,
            0x3c08 => self.platform = string(tag),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Writers known to store presentation offsets in the temporal offset
    /// field of index entries.
    pub fn misuses_temporal_order(&self) -> bool {
        self.product_name.as_deref() == Some("MXFTk Advanced")
            && self.company_name.as_deref() == Some("OpenCube")
            && self.product_version.major <= 2
            && self.product_version.minor == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentStorage {
    pub package_uids: Vec<Uuid>,
    pub essence_container_data_uids: Vec<Uuid>,

    // resolved
    pub packages: Vec<Uuid>,
    pub essence_container_data: Vec<Uuid>,
}

impl ContentStorage {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        match tag.tag {
            0x1901 => self.package_uids = uuid_batch(tag)?,
            0x1902 => self.essence_container_data_uids = uuid_batch(tag)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Links a source package to the essence container stored under a BodySID
#[derive(Debug, Clone, Default)]
pub struct EssenceContainerData {
    pub linked_package_uid: Umid,
    pub index_sid: u32,
    pub body_sid: u32,

    // resolved
    pub linked_package: Option<Uuid>,
}

impl EssenceContainerData {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x2701 => self.linked_package_uid = r.umid()?,
            0x3f06 => self.index_sid = r.u32()?,
            0x3f07 => self.body_sid = r.u32()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageKind {
    #[default]
    Material,
    Source,
}

#[derive(Debug, Clone, Default)]
pub struct Package {
    pub kind: PackageKind,
    pub package_uid: Umid,
    pub name: Option<String>,
    pub creation_date: Timestamp,
    pub modified_date: Timestamp,
    pub track_uids: Vec<Uuid>,
    /// Source packages only, zero when absent
    pub descriptor_uid: Uuid,

    // resolved
    pub tracks: Vec<Uuid>,
    pub descriptor: Option<Uuid>,
    /// Referenced by a material package SourceClip
    pub top_level: bool,
    /// Described by a MultipleDescriptor
    pub is_interleaved: bool,
    pub n_timecode_tracks: u32,
    pub n_metadata_tracks: u32,
    pub n_essence_tracks: u32,
}

impl Package {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x4401 => self.package_uid = r.umid()?,
            0x4402 => self.name = string(tag),
            0x4405 => self.creation_date = Timestamp::read(&mut r)?,
            0x4404 => self.modified_date = Timestamp::read(&mut r)?,
            0x4403 => self.track_uids = uuid_batch(tag)?,
            0x4701 if self.kind == PackageKind::Source => self.descriptor_uid = r.uuid()?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn is_material(&self) -> bool {
        self.kind == PackageKind::Material
    }

    pub fn is_source(&self) -> bool {
        self.kind == PackageKind::Source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackKind {
    #[default]
    Timeline,
    Event,
    Static,
}

#[derive(Debug, Clone, Default)]
pub struct Track {
    pub kind: TrackKind,
    pub track_id: u32,
    pub track_number: u32,
    pub name: Option<String>,
    pub sequence_uid: Uuid,
    /// Edit rate of timeline and event tracks
    pub edit_rate: Rational,
    pub origin: i64,

    // resolved
    pub sequence: Option<Uuid>,
    pub track_type: TrackType,
    /// File descriptors describing this track's essence
    pub descriptors: Vec<Uuid>,
}

impl Track {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match (tag.tag, self.kind) {
            (0x4801, _) => self.track_id = r.u32()?,
            (0x4804, _) => self.track_number = r.u32()?,
            (0x4802, _) => self.name = string(tag),
            (0x4803, _) => self.sequence_uid = r.uuid()?,
            (0x4b01, TrackKind::Timeline) | (0x4901, TrackKind::Event) => {
                self.edit_rate = read_rational(&mut r)?
            }
            (0x4b02, TrackKind::Timeline) | (0x4902, TrackKind::Event) => self.origin = r.i64()?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn is_timeline(&self) -> bool {
        self.kind == TrackKind::Timeline
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub data_definition: Ul,
    /// -1 when unknown
    pub duration: i64,
    pub component_uids: Vec<Uuid>,

    // resolved
    pub components: Vec<Uuid>,
}

impl Sequence {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x0201 => self.data_definition = r.ul()?,
            0x0202 => self.duration = r.i64()?,
            0x1001 => self.component_uids = uuid_batch(tag)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceClip {
    pub start_position: i64,
    /// All zero terminates the source reference chain
    pub source_package_id: Umid,
    pub source_track_id: u32,

    // resolved
    pub source_package: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimecodeComponent {
    pub rounded_timecode_base: u16,
    pub start_timecode: i64,
    pub drop_frame: bool,
}

#[derive(Debug, Clone)]
pub enum ComponentKind {
    SourceClip(SourceClip),
    Timecode(TimecodeComponent),
}

#[derive(Debug, Clone)]
pub struct Component {
    pub data_definition: Ul,
    /// -1 when unknown
    pub duration: i64,
    pub kind: ComponentKind,
}

impl Component {
    fn new(kind: ComponentKind) -> Self {
        Self {
            data_definition: Ul::default(),
            duration: -1,
            kind,
        }
    }

    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match (tag.tag, &mut self.kind) {
            (0x0201, _) => self.data_definition = r.ul()?,
            (0x0202, _) => self.duration = r.i64()?,
            (0x1201, ComponentKind::SourceClip(c)) => c.start_position = r.i64()?,
            (0x1101, ComponentKind::SourceClip(c)) => c.source_package_id = r.umid()?,
            (0x1102, ComponentKind::SourceClip(c)) => c.source_track_id = r.u32()?,
            (0x1502, ComponentKind::Timecode(t)) => t.rounded_timecode_base = r.u16()?,
            (0x1501, ComponentKind::Timecode(t)) => t.start_timecode = r.i64()?,
            (0x1503, ComponentKind::Timecode(t)) => t.drop_frame = r.u8()? != 0,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn source_clip(&self) -> Option<&SourceClip> {
        match &self.kind {
            ComponentKind::SourceClip(c) => Some(c),
            ComponentKind::Timecode(_) => None,
        }
    }

    pub fn timecode(&self) -> Option<&TimecodeComponent> {
        match &self.kind {
            ComponentKind::Timecode(t) => Some(t),
            ComponentKind::SourceClip(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureKind {
    #[default]
    Generic,
    Cdci,
    Rgba,
}

#[derive(Debug, Clone, Default)]
pub struct PictureDescriptor {
    pub kind: PictureKind,
    pub frame_layout: u8,
    pub stored_width: u32,
    pub stored_height: u32,
    pub aspect_ratio: Rational,
    pub picture_essence_coding: Ul,
    pub component_depth: u32,
    pub horizontal_subsampling: u32,
    pub vertical_subsampling: u32,
}

impl PictureDescriptor {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x320c => self.frame_layout = r.u8()?,
            0x3203 => self.stored_width = r.u32()?,
            0x3202 => self.stored_height = r.u32()?,
            0x320e => self.aspect_ratio = read_rational(&mut r)?,
            0x3201 => self.picture_essence_coding = r.ul()?,
            0x3301 if self.kind == PictureKind::Cdci => self.component_depth = r.u32()?,
            0x3302 if self.kind == PictureKind::Cdci => self.horizontal_subsampling = r.u32()?,
            0x3308 if self.kind == PictureKind::Cdci => self.vertical_subsampling = r.u32()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoundKind {
    #[default]
    Generic,
    Wave,
    Aes3,
}

#[derive(Debug, Clone, Default)]
pub struct SoundDescriptor {
    pub kind: SoundKind,
    pub audio_sampling_rate: Rational,
    pub locked: bool,
    pub channel_count: u32,
    pub quantization_bits: u32,
    pub sound_essence_compression: Ul,
    /// Wave and AES3 only
    pub block_align: u16,
    pub avg_bps: u32,
}

impl SoundDescriptor {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        let pcm = matches!(self.kind, SoundKind::Wave | SoundKind::Aes3);
        match tag.tag {
            0x3d03 => self.audio_sampling_rate = read_rational(&mut r)?,
            0x3d02 => self.locked = r.u8()? != 0,
            0x3d07 => self.channel_count = r.u32()?,
            0x3d01 => self.quantization_bits = r.u32()?,
            0x3d06 => self.sound_essence_compression = r.ul()?,
            0x3d0a if pcm => self.block_align = r.u16()?,
            0x3d09 if pcm => self.avg_bps = r.u32()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub enum DescriptorKind {
    File,
    Multiple {
        sub_descriptor_uids: Vec<Uuid>,
        /// resolved
        sub_descriptors: Vec<Uuid>,
    },
    Picture(PictureDescriptor),
    Sound(SoundDescriptor),
    Data {
        data_essence_coding: Ul,
    },
}

/// File descriptor and its specializations
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub locator_uids: Vec<Uuid>,
    pub linked_track_id: u32,
    pub sample_rate: Rational,
    pub container_duration: i64,
    pub essence_container: Ul,
    pub codec: Ul,

    // resolved
    pub locators: Vec<Uuid>,
}

impl Descriptor {
    fn new(kind: DescriptorKind) -> Self {
        Self {
            kind,
            locator_uids: Vec::new(),
            linked_track_id: 0,
            sample_rate: Rational::default(),
            container_duration: -1,
            essence_container: Ul::default(),
            codec: Ul::default(),
            locators: Vec::new(),
        }
    }

    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        let mut r = tag.reader();
        match tag.tag {
            0x2f01 => self.locator_uids = uuid_batch(tag)?,
            0x3006 => self.linked_track_id = r.u32()?,
            0x3001 => self.sample_rate = read_rational(&mut r)?,
            0x3002 => self.container_duration = r.i64()?,
            0x3004 => self.essence_container = r.ul()?,
            0x3005 => self.codec = r.ul()?,
            _ => {
                return match &mut self.kind {
                    DescriptorKind::File => Ok(false),
                    DescriptorKind::Multiple {
                        sub_descriptor_uids,
                        ..
                    } => {
                        if tag.tag != 0x3f01 {
                            return Ok(false);
                        }
                        *sub_descriptor_uids = uuid_batch(tag)?;
                        Ok(true)
                    }
                    DescriptorKind::Picture(p) => p.read_tag(tag),
                    DescriptorKind::Sound(s) => s.read_tag(tag),
                    DescriptorKind::Data {
                        data_essence_coding,
                    } => {
                        if tag.tag != 0x3e01 {
                            return Ok(false);
                        }
                        *data_essence_coding = r.ul()?;
                        Ok(true)
                    }
                }
            }
        }
        Ok(true)
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self.kind, DescriptorKind::Multiple { .. })
    }

    pub fn picture(&self) -> Option<&PictureDescriptor> {
        match &self.kind {
            DescriptorKind::Picture(p) => Some(p),
            _ => None,
        }
    }

    pub fn sound(&self) -> Option<&SoundDescriptor> {
        match &self.kind {
            DescriptorKind::Sound(s) => Some(s),
            _ => None,
        }
    }

    /// Resolved sub-descriptors of a MultipleDescriptor.
    pub fn sub_descriptors(&self) -> &[Uuid] {
        match &self.kind {
            DescriptorKind::Multiple {
                sub_descriptors, ..
            } => sub_descriptors,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Network,
    Text,
}

#[derive(Debug, Clone)]
pub struct Locator {
    pub kind: LocatorKind,
    pub value: String,
}

impl Locator {
    fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        match (tag.tag, self.kind) {
            (0x4001, LocatorKind::Network) | (0x4101, LocatorKind::Text) => {
                self.value = utf16_string(tag.value)
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Any decoded structural metadata set
#[derive(Debug, Clone)]
pub enum MetadataObject {
    Preface(Preface),
    Identification(Identification),
    ContentStorage(ContentStorage),
    EssenceContainerData(EssenceContainerData),
    Package(Package),
    Track(Track),
    Sequence(Sequence),
    Component(Component),
    Descriptor(Descriptor),
    Locator(Locator),
}

impl MetadataObject {
    /// Empty object for a set type, `None` for types this crate does not
    /// decode.
    pub fn for_set_type(set_type: SetType) -> Option<Self> {
        let picture = |kind| {
            Self::Descriptor(Descriptor::new(DescriptorKind::Picture(PictureDescriptor {
                kind,
                ..Default::default()
            })))
        };
        let sound = |kind| {
            Self::Descriptor(Descriptor::new(DescriptorKind::Sound(SoundDescriptor {
                kind,
                ..Default::default()
            })))
        };
        let package = |kind| {
            Self::Package(Package {
                kind,
                ..Default::default()
            })
        };
        let track = |kind| {
            Self::Track(Track {
                kind,
                ..Default::default()
            })
        };

        let object = match set_type {
            SetType::Preface => Self::Preface(Preface::default()),
            SetType::Identification => Self::Identification(Identification::default()),
            SetType::ContentStorage => Self::ContentStorage(ContentStorage::default()),
            SetType::EssenceContainerData => {
                Self::EssenceContainerData(EssenceContainerData::default())
            }
            SetType::MaterialPackage => package(PackageKind::Material),
            SetType::SourcePackage => package(PackageKind::Source),
            SetType::TimelineTrack => track(TrackKind::Timeline),
            SetType::EventTrack => track(TrackKind::Event),
            SetType::StaticTrack => track(TrackKind::Static),
            SetType::Sequence => Self::Sequence(Sequence {
                duration: -1,
                ..Default::default()
            }),
            SetType::SourceClip => {
                Self::Component(Component::new(ComponentKind::SourceClip(SourceClip::default())))
            }
            SetType::TimecodeComponent => Self::Component(Component::new(
                ComponentKind::Timecode(TimecodeComponent::default()),
            )),
            SetType::FileDescriptor => Self::Descriptor(Descriptor::new(DescriptorKind::File)),
            SetType::MultipleDescriptor => {
                Self::Descriptor(Descriptor::new(DescriptorKind::Multiple {
                    sub_descriptor_uids: Vec::new(),
                    sub_descriptors: Vec::new(),
                }))
            }
            SetType::GenericPictureDescriptor => picture(PictureKind::Generic),
            SetType::CdciDescriptor => picture(PictureKind::Cdci),
            SetType::RgbaDescriptor => picture(PictureKind::Rgba),
            SetType::GenericSoundDescriptor => sound(SoundKind::Generic),
            SetType::WaveAudioDescriptor => sound(SoundKind::Wave),
            SetType::Aes3AudioDescriptor => sound(SoundKind::Aes3),
            SetType::GenericDataDescriptor => Self::Descriptor(Descriptor::new(
                DescriptorKind::Data {
                    data_essence_coding: Ul::default(),
                },
            )),
            SetType::NetworkLocator => Self::Locator(Locator {
                kind: LocatorKind::Network,
                value: String::new(),
            }),
            SetType::TextLocator => Self::Locator(Locator {
                kind: LocatorKind::Text,
                value: String::new(),
            }),
            SetType::Unknown(_) => return None,
        };
        Some(object)
    }

    /// Decode one set-specific local tag. Returns false for tags this set
    /// does not know.
    pub(crate) fn read_tag(&mut self, tag: &LocalTag<'_>) -> Result<bool> {
        match self {
            Self::Preface(p) => p.read_tag(tag),
            Self::Identification(i) => i.read_tag(tag),
            Self::ContentStorage(c) => c.read_tag(tag),
            Self::EssenceContainerData(e) => e.read_tag(tag),
            Self::Package(p) => p.read_tag(tag),
            Self::Track(t) => t.read_tag(tag),
            Self::Sequence(s) => s.read_tag(tag),
            Self::Component(c) => c.read_tag(tag),
            Self::Descriptor(d) => d.read_tag(tag),
            Self::Locator(l) => l.read_tag(tag),
        }
    }

    /// Drop every link established by a previous resolve pass.
    pub(crate) fn reset_links(&mut self) {
        match self {
            Self::Preface(p) => {
                p.primary_package = None;
                p.identifications.clear();
                p.content_storage = None;
            }
            Self::ContentStorage(c) => {
                c.packages.clear();
                c.essence_container_data.clear();
            }
            Self::EssenceContainerData(e) => e.linked_package = None,
            Self::Package(p) => {
                p.tracks.clear();
                p.descriptor = None;
                p.top_level = false;
                p.is_interleaved = false;
                p.n_timecode_tracks = 0;
                p.n_metadata_tracks = 0;
                p.n_essence_tracks = 0;
            }
            Self::Track(t) => {
                t.sequence = None;
                t.track_type = TrackType::Unknown;
                t.descriptors.clear();
            }
            Self::Sequence(s) => s.components.clear(),
            Self::Component(c) => {
                if let ComponentKind::SourceClip(clip) = &mut c.kind {
                    clip.source_package = None;
                }
            }
            Self::Descriptor(d) => {
                d.locators.clear();
                if let DescriptorKind::Multiple {
                    sub_descriptors, ..
                } = &mut d.kind
                {
                    sub_descriptors.clear();
                }
            }
            Self::Identification(_) | Self::Locator(_) => {}
        }
    }

    /// Human readable set name, as used in the structure snapshot.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preface(_) => "Preface",
            Self::Identification(_) => "Identification",
            Self::ContentStorage(_) => "ContentStorage",
            Self::EssenceContainerData(_) => "EssenceContainerData",
            Self::Package(p) if p.is_material() => "MaterialPackage",
            Self::Package(_) => "SourcePackage",
            Self::Track(t) => match t.kind {
                TrackKind::Timeline => "TimelineTrack",
                TrackKind::Event => "EventTrack",
                TrackKind::Static => "StaticTrack",
            },
            Self::Sequence(_) => "Sequence",
            Self::Component(c) => match c.kind {
                ComponentKind::SourceClip(_) => "SourceClip",
                ComponentKind::Timecode(_) => "TimecodeComponent",
            },
            Self::Descriptor(d) => match &d.kind {
                DescriptorKind::File => "FileDescriptor",
                DescriptorKind::Multiple { .. } => "MultipleDescriptor",
                DescriptorKind::Picture(p) => match p.kind {
                    PictureKind::Generic => "GenericPictureEssenceDescriptor",
                    PictureKind::Cdci => "CDCIPictureEssenceDescriptor",
                    PictureKind::Rgba => "RGBAPictureEssenceDescriptor",
                },
                DescriptorKind::Sound(s) => match s.kind {
                    SoundKind::Generic => "GenericSoundEssenceDescriptor",
                    SoundKind::Wave => "WaveAudioDescriptor",
                    SoundKind::Aes3 => "AES3AudioDescriptor",
                },
                DescriptorKind::Data { .. } => "GenericDataEssenceDescriptor",
            },
            Self::Locator(l) => match l.kind {
                LocatorKind::Network => "NetworkLocator",
                LocatorKind::Text => "TextLocator",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_type_conversion() {
        assert_eq!(SetType::from(0x012f), SetType::Preface);
        assert_eq!(SetType::from(0x0148), SetType::WaveAudioDescriptor);
        assert_eq!(SetType::from(0x7777), SetType::Unknown(0x7777));
        assert_eq!(u16::from(SetType::TimelineTrack), 0x013b);
        assert!(MetadataObject::for_set_type(SetType::Unknown(1)).is_none());
    }

    #[test]
    fn test_timestamp_and_version() {
        let data = [0x07, 0xe8, 3, 14, 15, 9, 26, 125];
        let ts = Timestamp::read(&mut FieldReader::new(&data, 0)).unwrap();
        assert_eq!(ts.to_string(), "2024-03-14T15:09:26.500Z");

        let data = [0, 2, 0, 0, 0, 1, 0, 7];
        let v = ProductVersion::read(&mut FieldReader::new(&data, 0)).unwrap();
        assert_eq!(v.to_string(), "2.0.1.7.0");
    }

    #[test]
    fn test_temporal_order_quirk_signature() {
        let mut ident = Identification {
            company_name: Some("OpenCube".into()),
            product_name: Some("MXFTk Advanced".into()),
            product_version: ProductVersion {
                major: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ident.misuses_temporal_order());
        ident.product_version.minor = 1;
        assert!(!ident.misuses_temporal_order());
        ident.product_version.minor = 0;
        ident.company_name = Some("Other".into());
        assert!(!ident.misuses_temporal_order());
    }

    #[test]
    fn test_component_tags_by_kind() {
        let mut obj = MetadataObject::for_set_type(SetType::SourceClip).unwrap();
        let value = 7u32.to_be_bytes();
        let tag = LocalTag {
            tag: 0x1102,
            value: &value,
            offset: 0,
        };
        assert!(obj.read_tag(&tag).unwrap());
        // timecode tags are not part of a source clip
        let tag = LocalTag {
            tag: 0x1502,
            value: &[0, 25],
            offset: 0,
        };
        assert!(!obj.read_tag(&tag).unwrap());
        match obj {
            MetadataObject::Component(c) => {
                assert_eq!(c.source_clip().unwrap().source_track_id, 7)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
