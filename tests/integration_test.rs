//! Integration tests driving the demuxer over generated MXF files
//!
//! These exercise the public API end to end: stream creation, timestamps,
//! interleaving, push delivery, seeking and metadata queries.

use mxf_demux::{
    test_utils::{MetadataBuilder, MxfBuilder, PICTURE_TRACK_ID, SOUND_TRACK_ID},
    CapsValue, DemuxConfig, Demuxer, Event, Format, MemorySource, OutputBuffer, SeekRequest,
};

const FRAME: u64 = 40_000_000;

/// Route demuxer diagnostics to the test output, filtered by `RUST_LOG`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pull(data: Vec<u8>) -> Demuxer<MemorySource> {
    init_logging();
    Demuxer::with_registry(MemorySource::new(data), DemuxConfig::new(), MxfBuilder::registry())
}

fn drain<S: mxf_demux::ByteSource>(demuxer: &mut Demuxer<S>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = demuxer.next_event().expect("demuxing failed") {
        events.push(event);
    }
    events
}

fn buffers(events: &[Event], track_id: u32) -> Vec<&OutputBuffer> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Buffer(b) if b.track_id == track_id => Some(b),
            _ => None,
        })
        .collect()
}

#[test]
fn test_single_track_pull() {
    let file = MxfBuilder::single_track(5).build();
    let mut demuxer = pull(file.data.clone());
    let events = drain(&mut demuxer);

    let caps = events.iter().find_map(|e| match e {
        Event::StreamStart { track_id, caps } if *track_id == PICTURE_TRACK_ID => Some(caps),
        _ => None,
    });
    let caps = caps.expect("no stream was started for the picture track");
    assert_eq!(caps.media_type, "video/x-test");
    assert!(caps.is_video());
    assert_eq!(caps.get_int("width"), Some(16));

    let out = buffers(&events, PICTURE_TRACK_ID);
    assert_eq!(out.len(), 5, "one buffer per frame");
    for (i, b) in out.iter().enumerate() {
        assert_eq!(b.data.as_ref(), file.frame(i).as_slice(), "payload of frame {i}");
        assert_eq!(b.dts, Some(i as u64 * FRAME), "dts of frame {i}");
        assert_eq!(b.pts, Some(i as u64 * FRAME), "intra-only pts of frame {i}");
        assert_eq!(b.offset, i as u64);
    }
    assert!(out[0].discont);
    assert!(!out[1].discont);

    assert!(events.iter().any(|e| matches!(e, Event::NoMoreStreams)));
    assert!(matches!(events.last(), Some(Event::Eos { track_id }) if *track_id == PICTURE_TRACK_ID));
}

#[test]
fn test_stream_events_come_before_buffers() {
    let file = MxfBuilder::single_track(2).build();
    let events = drain(&mut pull(file.data));
    let first_buffer = events
        .iter()
        .position(|e| matches!(e, Event::Buffer(_)))
        .expect("no buffers");
    let start = events
        .iter()
        .position(|e| matches!(e, Event::StreamStart { .. }))
        .expect("no stream start");
    let segment = events
        .iter()
        .position(|e| matches!(e, Event::Segment { .. }))
        .expect("no segment");
    assert!(start < segment && segment < first_buffer);
}

#[test]
fn test_interleaved_streams() {
    let file = MxfBuilder::interleaved(4).build();
    let events = drain(&mut pull(file.data));

    let starts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            Event::StreamStart { track_id, .. } => Some(*track_id),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 2, "picture and sound streams");
    assert!(starts.contains(&PICTURE_TRACK_ID));
    assert!(starts.contains(&SOUND_TRACK_ID));

    let audio_caps = events.iter().find_map(|e| match e {
        Event::StreamStart { track_id, caps } if *track_id == SOUND_TRACK_ID => Some(caps),
        _ => None,
    });
    let audio_caps = audio_caps.expect("sound stream");
    assert_eq!(audio_caps.media_type, "audio/x-raw");
    assert_eq!(audio_caps.get("format"), Some(&CapsValue::Str("S16LE".into())));
    assert_eq!(audio_caps.get_int("rate"), Some(48_000));
    assert_eq!(audio_caps.get_int("channels"), Some(1));

    assert_eq!(buffers(&events, PICTURE_TRACK_ID).len(), 4);
    let sound = buffers(&events, SOUND_TRACK_ID);
    assert_eq!(sound.len(), 4);
    assert_eq!(sound[0].data.len(), 1920 * 2);
    assert_eq!(sound[2].dts, Some(2 * FRAME));

    let eos = events
        .iter()
        .filter(|e| matches!(e, Event::Eos { .. }))
        .count();
    assert_eq!(eos, 2);
}

#[test]
fn test_clip_wrapped_split_into_edit_units() {
    let file = MxfBuilder::clip_wrapped(4).build();
    let events = drain(&mut pull(file.data));
    let out = buffers(&events, PICTURE_TRACK_ID);
    assert_eq!(out.len(), 4);
    assert!(out.iter().all(|b| b.data.len() == 120));
    assert_eq!(out[3].dts, Some(3 * FRAME));
}

#[test]
fn test_drift_between_separate_containers() {
    let max_drift = 100_000_000;
    let file = MxfBuilder::separate_containers(8).build();
    init_logging();
    let mut demuxer = Demuxer::with_registry(
        MemorySource::new(file.data.clone()),
        DemuxConfig::new().max_drift(max_drift),
        MxfBuilder::registry(),
    );
    let events = drain(&mut demuxer);

    let picture = buffers(&events, PICTURE_TRACK_ID);
    let sound = buffers(&events, SOUND_TRACK_ID);
    assert_eq!(picture.len(), 8);
    assert_eq!(sound.len(), 8);
    for (i, b) in picture.iter().enumerate() {
        assert_eq!(b.data.as_ref(), file.frame(i).as_slice(), "payload of frame {i}");
        assert_eq!(b.dts, Some(i as u64 * FRAME), "dts of frame {i}");
    }
    for (i, b) in sound.iter().enumerate() {
        assert_eq!(b.data.len(), 1920 * 2);
        assert_eq!(b.dts, Some(i as u64 * FRAME), "dts of sound frame {i}");
    }

    // A buffer never starts more than max_drift past where the other stream is
    let mut reached = [0u64; 2];
    for b in events.iter().filter_map(|e| match e {
        Event::Buffer(b) => Some(b),
        _ => None,
    }) {
        let (this, other) = if b.track_id == PICTURE_TRACK_ID { (0, 1) } else { (1, 0) };
        let dts = b.dts.expect("buffers carry a dts");
        assert!(
            dts.saturating_sub(reached[other]) <= max_drift,
            "track {} at {dts} ran ahead of {}",
            b.track_id,
            reached[other]
        );
        reached[this] = dts + b.duration.unwrap_or(0);
    }

    // Sound lives after every picture frame; reaching it early, and coming
    // back for the rest of the pictures, takes a jump each way
    let order = |track_id: u32, n: usize| {
        events
            .iter()
            .position(|e| {
                matches!(e, Event::Buffer(b) if b.track_id == track_id && b.offset == n as u64)
            })
            .expect("buffer was output")
    };
    assert!(order(SOUND_TRACK_ID, 0) < order(PICTURE_TRACK_ID, 3));
    assert!(order(PICTURE_TRACK_ID, 3) < order(SOUND_TRACK_ID, 7));

    let eos = events
        .iter()
        .filter(|e| matches!(e, Event::Eos { .. }))
        .count();
    assert_eq!(eos, 2);
}

#[test]
fn test_body_partitions_with_index() {
    let file = MxfBuilder::single_track(6)
        .with_body_partitions()
        .with_index()
        .build();
    let events = drain(&mut pull(file.data.clone()));
    let out = buffers(&events, PICTURE_TRACK_ID);
    assert_eq!(out.len(), 6);
    for (i, b) in out.iter().enumerate() {
        assert_eq!(b.data.as_ref(), file.frame(i).as_slice(), "payload of frame {i}");
    }
    // intra-only essence never produces delta units
    assert!(out.iter().all(|b| !b.delta_unit));
}

#[test]
fn test_file_without_rip() {
    let file = MxfBuilder::single_track(4)
        .with_body_partitions()
        .without_rip()
        .build();
    assert!(file.rip_offset.is_none());
    let events = drain(&mut pull(file.data));
    assert_eq!(buffers(&events, PICTURE_TRACK_ID).len(), 4);
}

#[test]
fn test_footer_metadata_replaces_header() {
    let file = MxfBuilder::single_track(3)
        .with_footer_metadata("footer writer")
        .build();
    let events = drain(&mut pull(file.data));

    let tags = events.iter().find_map(|e| match e {
        Event::Tags { tags, .. } => Some(tags),
        _ => None,
    });
    let tags = tags.expect("no tags were sent");
    assert_eq!(tags.get("application-name").map(String::as_str), Some("footer writer"));
    assert_eq!(tags.get("container-format").map(String::as_str), Some("MXF"));
    assert_eq!(buffers(&events, PICTURE_TRACK_ID).len(), 3);
}

#[test]
fn test_footer_metadata_can_be_disabled() {
    let file = MxfBuilder::single_track(3)
        .with_footer_metadata("footer writer")
        .build();
    let mut demuxer = Demuxer::with_registry(
        MemorySource::new(file.data),
        DemuxConfig::new().pull_footer_metadata(false),
        MxfBuilder::registry(),
    );
    let events = drain(&mut demuxer);
    let name = events.iter().find_map(|e| match e {
        Event::Tags { tags, .. } => tags.get("application-name").cloned(),
        _ => None,
    });
    assert_eq!(name.as_deref(), Some("test writer"));
}

#[test]
fn test_push_mode_in_chunks() {
    let file = MxfBuilder::single_track(4)
        .with_index_in_header()
        .with_run_in(16)
        .build();
    let mut demuxer = Demuxer::push_mode(DemuxConfig::new(), MxfBuilder::registry());

    let mut events = Vec::new();
    for chunk in file.data.chunks(333) {
        demuxer.push(chunk).expect("push failed");
        events.extend(drain(&mut demuxer));
    }
    demuxer.push_eos().expect("eos failed");
    events.extend(drain(&mut demuxer));

    let out = buffers(&events, PICTURE_TRACK_ID);
    assert_eq!(out.len(), 4);
    assert_eq!(out[3].data.as_ref(), file.frame(3).as_slice());
    assert!(!events.iter().any(|e| matches!(e, Event::UpstreamSeek { .. })));
}

#[test]
fn test_seek_with_key_unit_snaps_to_keyframe() {
    let file = MxfBuilder::single_track(9).with_index().build();
    let mut demuxer = pull(file.data);
    while demuxer.stream_count() == 0 {
        demuxer.next_event().expect("demuxing failed");
    }

    // frames 0, 3 and 6 are keyframes
    demuxer
        .seek(SeekRequest::new(5 * FRAME).key_unit(true))
        .expect("seek failed");
    let events = drain(&mut demuxer);
    let out = buffers(&events, PICTURE_TRACK_ID);
    assert_eq!(out.first().map(|b| b.offset), Some(3));
    assert!(out[0].discont);
    assert_eq!(out.len(), 6);
}

#[test]
fn test_duration_and_position() {
    let file = MxfBuilder::single_track(5).build();
    let mut demuxer = pull(file.data);
    assert_eq!(demuxer.duration(), None, "nothing is known before reading");

    while demuxer.stream_count() == 0 {
        demuxer.next_event().expect("demuxing failed");
    }
    assert_eq!(demuxer.duration(), Some(5 * FRAME));

    let mut seen = 0;
    while let Some(event) = demuxer.next_event().expect("demuxing failed") {
        if matches!(event, Event::Buffer(_)) {
            seen += 1;
            if seen == 2 {
                break;
            }
        }
    }
    assert_eq!(demuxer.position(Format::Time), Some(2 * FRAME));
    assert_eq!(demuxer.position(Format::EditUnits), Some(2));
}

#[test]
fn test_play_source_package() {
    let file = MxfBuilder::single_track(3).build();
    let umid = MetadataBuilder::new()
        .single_track_file()
        .source_package_umid()
        .to_string();

    let mut demuxer = Demuxer::with_registry(
        MemorySource::new(file.data),
        DemuxConfig::new().package(umid.clone()),
        MxfBuilder::registry(),
    );
    let events = drain(&mut demuxer);
    assert_eq!(demuxer.package(), Some(umid));
    let started = events
        .iter()
        .filter(|e| matches!(e, Event::StreamStart { .. }))
        .count();
    assert_eq!(started, 1);
    let total: usize = events
        .iter()
        .filter(|e| matches!(e, Event::Buffer(_)))
        .count();
    assert_eq!(total, 3);
}

#[test]
fn test_material_package_played_by_default() {
    let file = MxfBuilder::single_track(1).build();
    let mut demuxer = pull(file.data);
    assert_eq!(demuxer.package(), None);
    drain(&mut demuxer);

    let umid = MetadataBuilder::new().single_track_file().material_package_umid();
    assert_eq!(demuxer.package(), Some(umid.to_string()));
}

#[test]
fn test_structure_snapshot() {
    let file = MxfBuilder::single_track(1).build();
    let mut demuxer = pull(file.data);
    assert!(demuxer.structure().is_none());
    drain(&mut demuxer);

    let root = demuxer.structure().expect("metadata should be resolved");
    assert_eq!(root.name, "Preface");
    fn names(node: &mxf_demux::StructureNode, out: &mut Vec<&'static str>) {
        out.push(node.name);
        for child in &node.children {
            names(child, out);
        }
    }
    let mut all = Vec::new();
    names(&root, &mut all);
    assert!(all.contains(&"MaterialPackage"));
    assert!(all.contains(&"SourcePackage"));
    assert!(all.contains(&"CDCIPictureEssenceDescriptor"));
}

#[test]
fn test_metadata_is_shared() {
    let file = MxfBuilder::single_track(1).build();
    let mut demuxer = pull(file.data);
    let metadata = demuxer.metadata();
    drain(&mut demuxer);
    let store = metadata.read();
    assert!(store.is_resolved());
    assert_eq!(store.packages().count(), 2);
}
