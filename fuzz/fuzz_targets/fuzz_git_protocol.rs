//! Fuzz target for smart HTTP protocol parsing.
//!
//! Tests that the ref advertisement and upload-pack parsers handle arbitrary
//! input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plumb_protocol::{
    parse_refs_ad_response, parse_upload_pack_request, parse_upload_pack_response, Demuxer,
    RemoteUrl,
};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let _ = parse_refs_ad_response(Cursor::new(data), "git-upload-pack");
    let _ = parse_upload_pack_request(Cursor::new(data));

    let mut demux = Demuxer::new(Cursor::new(data), true);
    let _ = parse_upload_pack_response(&mut demux, &mut Vec::new());

    if let Ok(url) = std::str::from_utf8(data) {
        let _ = RemoteUrl::parse(url);
    }
});
