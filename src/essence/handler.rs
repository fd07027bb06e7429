//! Codec capability seam
//!
//! The demuxer itself does not understand any essence format. For each
//! essence track it asks the [`HandlerRegistry`] for a handler that
//! recognizes the track, and uses it to classify the wrapping, describe the
//! stream and transform each element before it is output.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::Wrapping;
use crate::error::Result;
use crate::metadata::{Descriptor, PictureDescriptor, SoundDescriptor};
use crate::time::Rational;
use crate::ul::{TrackType, Ul};

/// A typed caps field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsValue {
    Int(i64),
    Fraction(Rational),
    Str(String),
    Bool(bool),
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Fraction(r) => write!(f, "{r}"),
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Media type plus named fields describing one output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCaps {
    pub media_type: String,
    pub fields: BTreeMap<String, CapsValue>,
}

impl MediaCaps {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: CapsValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CapsValue> {
        self.fields.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(CapsValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn is_raw_audio(&self) -> bool {
        self.media_type.starts_with("audio/x-raw")
    }

    pub fn is_video(&self) -> bool {
        self.media_type.starts_with("video/") || self.media_type.starts_with("image/")
    }
}

impl fmt::Display for MediaCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}={value}")?;
        }
        Ok(())
    }
}

/// Free-form stream tags, such as codec names
pub type Tags = BTreeMap<String, String>;

/// Everything a handler derives for one track
#[derive(Debug, Clone)]
pub struct EssenceMapping {
    pub caps: MediaCaps,
    pub tags: Tags,
    /// Every edit unit decodes on its own
    pub intra_only: bool,
    /// Handler private state, passed back to [`EssenceHandler::transform`]
    pub state: Option<Arc<dyn Any + Send + Sync>>,
}

impl EssenceMapping {
    pub fn new(caps: MediaCaps) -> Self {
        Self {
            caps,
            tags: Tags::new(),
            intra_only: false,
            state: None,
        }
    }

    pub fn intra_only(mut self, intra_only: bool) -> Self {
        self.intra_only = intra_only;
        self
    }

    pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.tags.insert(name.to_string(), value.into());
        self
    }

    pub fn state<T: Any + Send + Sync>(mut self, state: T) -> Self {
        self.state = Some(Arc::new(state));
        self
    }

    /// Handler state of type `T`, if that is what the handler stored.
    pub fn state_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.state.as_deref().and_then(|s| s.downcast_ref::<T>())
    }
}

/// What a handler sees of a source track
#[derive(Debug, Clone, Default)]
pub struct TrackDescription {
    pub track_id: u32,
    pub track_number: u32,
    pub track_type: TrackType,
    pub edit_rate: Rational,
    pub name: Option<String>,
    /// File descriptors linked to the track, first one primary
    pub descriptors: Vec<Descriptor>,
}

impl TrackDescription {
    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptors.first()
    }

    pub fn essence_container(&self) -> Option<Ul> {
        self.descriptor().map(|d| d.essence_container)
    }

    pub fn sound(&self) -> Option<&SoundDescriptor> {
        self.descriptors.iter().find_map(|d| d.sound())
    }

    pub fn picture(&self) -> Option<&PictureDescriptor> {
        self.descriptors.iter().find_map(|d| d.picture())
    }
}

/// One essence format
pub trait EssenceHandler: fmt::Debug + Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// True if this handler can map the track.
    fn recognizes(&self, track: &TrackDescription) -> bool;

    fn classify_wrapping(&self, track: &TrackDescription) -> Wrapping;

    /// Describe the output stream, `None` if the track can't be mapped
    /// after all.
    fn build_caps(&self, track: &TrackDescription) -> Option<EssenceMapping>;

    /// Turn one essence element into an output buffer. An empty result is
    /// output as a gap.
    fn transform(
        &self,
        key: &Ul,
        buffer: Bytes,
        track: &TrackDescription,
        mapping: &EssenceMapping,
    ) -> Result<Bytes>;
}

/// The handlers available to a demuxer, tried in registration order
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn EssenceHandler>>,
}

impl HandlerRegistry {
    /// Registry without any handler; every track gets generic caps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers shipped in this crate.
    pub fn with_builtin() -> Self {
        Self::new().with_handler(super::raw_audio::RawAudioHandler)
    }

    pub fn with_handler(mut self, handler: impl EssenceHandler + 'static) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: impl EssenceHandler + 'static) {
        self.handlers.push(Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// First handler recognizing the track.
    pub fn find(&self, track: &TrackDescription) -> Option<Arc<dyn EssenceHandler>> {
        self.handlers
            .iter()
            .find(|h| h.recognizes(track))
            .cloned()
    }
}

/// Caps for a track no handler recognized:
/// `video|audio|application/x-mxf-<container>-<coding>`.
pub(crate) fn fallback_caps(track: &TrackDescription) -> Option<MediaCaps> {
    let descriptor = track.descriptor()?;
    let container = descriptor.essence_container;
    let (kind, coding) = match track.track_type {
        TrackType::Picture => ("video", track.picture().map(|p| p.picture_essence_coding)),
        TrackType::Sound => ("audio", track.sound().map(|s| s.sound_essence_compression)),
        TrackType::Data => (
            "application",
            track.descriptors.iter().find_map(|d| match d.kind {
                crate::metadata::DescriptorKind::Data {
                    data_essence_coding,
                } => Some(data_essence_coding),
                _ => None,
            }),
        ),
        _ => return None,
    };
    Some(MediaCaps::new(format!(
        "{kind}/x-mxf-{container}-{}",
        coding.unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Passthrough;

    impl EssenceHandler for Passthrough {
        fn name(&self) -> &'static str {
            "passthrough"
        }

        fn recognizes(&self, track: &TrackDescription) -> bool {
            track.track_type == TrackType::Data
        }

        fn classify_wrapping(&self, _track: &TrackDescription) -> Wrapping {
            Wrapping::Frame
        }

        fn build_caps(&self, _track: &TrackDescription) -> Option<EssenceMapping> {
            Some(EssenceMapping::new(MediaCaps::new("application/octet-stream")).state(7u32))
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

    #[test]
    fn test_registry_order_and_state() {
        let registry = HandlerRegistry::with_builtin().with_handler(Passthrough);
        assert_eq!(registry.len(), 2);

        let track = TrackDescription {
            track_type: TrackType::Data,
            ..Default::default()
        };
        let handler = registry.find(&track).unwrap();
        assert_eq!(handler.name(), "passthrough");
        let mapping = handler.build_caps(&track).unwrap();
        assert_eq!(mapping.state_ref::<u32>(), Some(&7));
        assert!(mapping.state_ref::<u64>().is_none());
    }

    #[test]
    fn test_caps_display() {
        let caps = MediaCaps::new("audio/x-raw")
            .with("rate", CapsValue::Int(48000))
            .with("channels", CapsValue::Int(2));
        assert_eq!(caps.to_string(), "audio/x-raw, channels=2, rate=48000");
        assert!(caps.is_raw_audio());
        assert_eq!(caps.get_int("rate"), Some(48000));
    }
}
