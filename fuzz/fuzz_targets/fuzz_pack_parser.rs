//! Fuzz target for pack file parsing.
//!
//! Tests that pack resolution handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plumb_odb::pack::{read_entry, resolve_pack};
use plumb_odb::NoExternalBases;

fuzz_target!(|data: &[u8]| {
    let _ = resolve_pack(data, &NoExternalBases);

    // Entry decoding at the first entry, ignoring the trailer checksum
    if data.len() > 12 {
        let _ = read_entry(data, 12, data.len());
    }
});
