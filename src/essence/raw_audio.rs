//! Uncompressed audio in the BWF and AES3 generic container mappings

use bytes::{BufMut, Bytes, BytesMut};

use super::handler::{CapsValue, EssenceHandler, EssenceMapping, MediaCaps, TrackDescription};
use super::Wrapping;
use crate::error::{Error, Result};
use crate::metadata::SoundKind;
use crate::ul::{TrackType, Ul};

/// Generic container label for BWF and AES3 audio, byte 14 selects the
/// variant
const AES_BWF_CONTAINER: [u8; 14] = [
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x06,
];

const BWF_FRAME_WRAPPED: u8 = 0x01;
const BWF_CLIP_WRAPPED: u8 = 0x02;
const AES3_FRAME_WRAPPED: u8 = 0x03;
const AES3_CLIP_WRAPPED: u8 = 0x04;

/// AES3 elements always carry eight 4-byte subframes per sample
const AES3_CHANNELS: usize = 8;

fn container_variant(ul: &Ul) -> Option<u8> {
    let b = ul.as_bytes();
    if b[..7] != AES_BWF_CONTAINER[..7] || b[8..14] != AES_BWF_CONTAINER[8..] {
        return None;
    }
    matches!(b[14], BWF_FRAME_WRAPPED..=AES3_CLIP_WRAPPED).then_some(b[14])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcmLayout {
    aes3: bool,
    channels: usize,
    width: usize,
}

/// BWF and AES3 PCM audio
#[derive(Debug, Clone, Copy, Default)]
pub struct RawAudioHandler;

impl RawAudioHandler {
    fn variant(track: &TrackDescription) -> Option<u8> {
        track
            .descriptors
            .iter()
            .find_map(|d| container_variant(&d.essence_container))
    }
}

impl EssenceHandler for RawAudioHandler {
    fn name(&self) -> &'static str {
        "raw-audio"
    }

    fn recognizes(&self, track: &TrackDescription) -> bool {
        track.track_type == TrackType::Sound && Self::variant(track).is_some()
    }

    fn classify_wrapping(&self, track: &TrackDescription) -> Wrapping {
        match Self::variant(track) {
            Some(BWF_FRAME_WRAPPED | AES3_FRAME_WRAPPED) => Wrapping::Frame,
            Some(BWF_CLIP_WRAPPED | AES3_CLIP_WRAPPED) => Wrapping::Clip,
            _ => Wrapping::Unknown,
        }
    }

    fn build_caps(&self, track: &TrackDescription) -> Option<EssenceMapping> {
        let sound = track.sound()?;
        let variant = Self::variant(track)?;
        let aes3 = matches!(variant, AES3_FRAME_WRAPPED | AES3_CLIP_WRAPPED)
            || sound.kind == SoundKind::Aes3;

        let rate = sound.audio_sampling_rate;
        if !rate.is_valid() || sound.channel_count == 0 {
            tracing::warn!(track_id = track.track_id, "invalid sampling rate or channel count");
            return None;
        }
        let width = match sound.quantization_bits {
            0 if sound.block_align > 0 => {
                (sound.block_align as usize / sound.channel_count as usize) * 8
            }
            bits => bits as usize,
        };
        let format = match (width, aes3) {
            (8, false) => "U8",
            (16, _) => "S16LE",
            (24, _) => "S24LE",
            (32, false) => "S32LE",
            _ => {
                tracing::warn!(track_id = track.track_id, width, "unsupported sample width");
                return None;
            }
        };

        let caps = MediaCaps::new("audio/x-raw")
            .with("format", CapsValue::Str(format.into()))
            .with("rate", CapsValue::Int(i64::from(rate.n / rate.d.max(1))))
            .with("channels", CapsValue::Int(i64::from(sound.channel_count)))
            .with("layout", CapsValue::Str("interleaved".into()));
        let codec = if aes3 { "AES3 audio" } else { "Uncompressed audio" };

        Some(
            EssenceMapping::new(caps)
                .intra_only(true)
                .tag("audio-codec", codec)
                .state(PcmLayout {
                    aes3,
                    channels: sound.channel_count as usize,
                    width: width / 8,
                }),
        )
    }

    fn transform(
        &self,
        key: &Ul,
        buffer: Bytes,
        track: &TrackDescription,
        mapping: &EssenceMapping,
    ) -> Result<Bytes> {
        let layout = mapping
            .state_ref::<PcmLayout>()
            .copied()
            .ok_or_else(|| Error::InvalidState("raw audio mapping without layout".into()))?;
        if !layout.aes3 {
            return Ok(buffer);
        }
        aes3_to_pcm(&buffer, layout, key, track.track_id)
    }
}

/// Convert an AES3 element (SMPTE 331M) into interleaved little-endian PCM.
fn aes3_to_pcm(data: &[u8], layout: PcmLayout, key: &Ul, track_id: u32) -> Result<Bytes> {
    if data.len() < 4 || (data.len() - 4) % (AES3_CHANNELS * 4) != 0 {
        return Err(Error::malformed(
            0,
            format!("invalid AES3 element size {} for track {track_id} ({key})", data.len()),
        ));
    }
    let samples = u16::from_be_bytes([data[1], data[2]]) as usize;
    let available = (data.len() - 4) / (AES3_CHANNELS * 4);
    if samples > available {
        return Err(Error::malformed(
            0,
            format!("AES3 element claims {samples} samples, holds {available}"),
        ));
    }
    let channels = layout.channels.min(AES3_CHANNELS);

    let mut out = BytesMut::with_capacity(samples * channels * layout.width);
    for frame in data[4..].chunks_exact(AES3_CHANNELS * 4).take(samples) {
        for sub in frame.chunks_exact(4).take(channels) {
            let d = u32::from_le_bytes([sub[0], sub[1], sub[2], sub[3]]);
            match layout.width {
                2 => out.put_u16_le(((d >> 12) & 0xffff) as u16),
                _ => {
                    let s = (d >> 4) & 0x00ff_ffff;
                    out.put_slice(&s.to_le_bytes()[..3]);
                }
            }
        }
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataObject, SetType};
    use crate::time::Rational;

    fn sound_track(variant: u8, kind: SetType) -> TrackDescription {
        let Some(MetadataObject::Descriptor(mut d)) = MetadataObject::for_set_type(kind) else {
            panic!("not a descriptor");
        };
        let mut ec = [0u8; 16];
        ec[..14].copy_from_slice(&AES_BWF_CONTAINER);
        ec[14] = variant;
        d.essence_container = Ul(ec);
        if let crate::metadata::DescriptorKind::Sound(s) = &mut d.kind {
            s.audio_sampling_rate = Rational::new(48000, 1);
            s.channel_count = 2;
            s.quantization_bits = 16;
        }
        TrackDescription {
            track_id: 2,
            track_type: TrackType::Sound,
            edit_rate: Rational::new(48000, 1),
            descriptors: vec![d],
            ..Default::default()
        }
    }

    #[test]
    fn test_bwf_caps_and_wrapping() {
        let track = sound_track(BWF_CLIP_WRAPPED, SetType::WaveAudioDescriptor);
        let handler = RawAudioHandler;
        assert!(handler.recognizes(&track));
        assert_eq!(handler.classify_wrapping(&track), Wrapping::Clip);

        let mapping = handler.build_caps(&track).unwrap();
        assert!(mapping.intra_only);
        assert!(mapping.caps.is_raw_audio());
        assert_eq!(mapping.caps.get_int("rate"), Some(48000));
        assert_eq!(mapping.caps.get("format"), Some(&CapsValue::Str("S16LE".into())));

        let data = Bytes::from_static(&[1, 2, 3, 4]);
        let out = handler
            .transform(&Ul::default(), data.clone(), &track, &mapping)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_aes3_conversion() {
        let track = sound_track(AES3_FRAME_WRAPPED, SetType::Aes3AudioDescriptor);
        let handler = RawAudioHandler;
        assert_eq!(handler.classify_wrapping(&track), Wrapping::Frame);
        let mapping = handler.build_caps(&track).unwrap();

        // one sample, channel 0 = 0x1234, channel 1 = 0xabcd
        let mut element = vec![0u8, 0, 1, 0];
        for ch in 0..AES3_CHANNELS {
            let value: u32 = match ch {
                0 => 0x1234 << 12,
                1 => 0xabcd << 12,
                _ => 0,
            };
            element.extend_from_slice(&value.to_le_bytes());
        }
        let out = handler
            .transform(&Ul::default(), element.into(), &track, &mapping)
            .unwrap();
        assert_eq!(&out[..], &[0x34, 0x12, 0xcd, 0xab]);
    }

    #[test]
    fn test_aes3_bad_size() {
        let layout = PcmLayout {
            aes3: true,
            channels: 2,
            width: 2,
        };
        assert!(aes3_to_pcm(&[0, 0, 1, 0, 1, 2], layout, &Ul::default(), 1).is_err());
    }

    #[test]
    fn test_other_containers_not_recognized() {
        let mut track = sound_track(BWF_FRAME_WRAPPED, SetType::WaveAudioDescriptor);
        track.descriptors[0].essence_container = Ul([0x06; 16]);
        assert!(!RawAudioHandler.recognizes(&track));
    }
}
