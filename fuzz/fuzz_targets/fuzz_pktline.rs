//! Fuzz target for pkt-line framing and side-band demultiplexing.
//!
//! Tests that the pkt-line reader and demuxer handle arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plumb_protocol::{Demuxer, PktLineReader, Step};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input cannot loop forever
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }

    for side_band in [true, false] {
        let mut demux = Demuxer::new(Cursor::new(data), side_band);
        let mut sink = Vec::new();
        for _ in 0..8 {
            match demux.step(&mut sink) {
                Ok(Step::Control(_)) => continue,
                Ok(Step::Dispatched) => continue,
                Ok(Step::End) | Err(_) => break,
            }
        }
        let _ = demux.drain(&mut sink);
    }
});
