#![no_main]

use libfuzzer_sys::fuzz_target;
use mxf_demux::{DemuxConfig, Demuxer, MemorySource};

fuzz_target!(|data: &[u8]| {
    // Demux arbitrary bytes in pull mode
    // This should NEVER panic, only return errors
    let source = MemorySource::new(data.to_vec());
    let mut demuxer = Demuxer::new(source, DemuxConfig::new().max_run_in(4096));

    // Bounded so that pathological inputs can't loop forever
    for _ in 0..10_000 {
        match demuxer.next_event() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }

    let _ = demuxer.structure();
    let _ = demuxer.duration();
});
