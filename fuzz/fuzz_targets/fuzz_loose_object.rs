//! Fuzz target for loose object decoding.
//!
//! Tests that inflating and unframing arbitrary bytes never panics.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plumb_odb::codec;

fuzz_target!(|data: &[u8]| {
    // Compressed input, as read from objects/xx/...
    let _ = codec::decode(data, None);

    // Already inflated input
    let _ = codec::unframe(data);
});
