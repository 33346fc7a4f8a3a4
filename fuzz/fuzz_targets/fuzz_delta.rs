//! Fuzz target for delta application.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plumb_odb::{apply_delta, create_delta, Delta};

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |b| *b as usize).min(data.len());
    let (base, delta) = data.split_at(split);

    let _ = Delta::parse(delta);
    let _ = apply_delta(base, delta);

    // Generated deltas must reproduce their target
    let generated = create_delta(base, delta);
    assert_eq!(apply_delta(base, &generated).ok().as_deref(), Some(delta));
});
