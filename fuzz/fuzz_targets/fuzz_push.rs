#![no_main]

use libfuzzer_sys::fuzz_target;
use mxf_demux::{DemuxConfig, Demuxer, HandlerRegistry};

fuzz_target!(|data: &[u8]| {
    // Deliver arbitrary bytes in uneven chunks, as a network source would
    let mut demuxer = Demuxer::push_mode(DemuxConfig::new(), HandlerRegistry::with_builtin());

    let chunk = data.first().map_or(1, |b| usize::from(*b).max(1));
    for part in data.chunks(chunk) {
        if demuxer.push(part).is_err() {
            return;
        }
        while let Ok(Some(_)) = demuxer.next_event() {}
    }
    let _ = demuxer.push_eos();
    while let Ok(Some(_)) = demuxer.next_event() {}
});
