//! Fuzz target for pack index parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plumb_odb::{ObjectId, OidPrefix, PackIndex};

fuzz_target!(|data: &[u8]| {
    let Ok(index) = PackIndex::parse(data) else {
        return;
    };

    // A parsed index must answer lookups for its own entries
    for entry in index.entries().take(64) {
        assert_eq!(index.lookup(&entry.id), Some(entry.offset));
    }
    let _ = index.lookup(&ObjectId::zero());
    if let Ok(prefix) = OidPrefix::parse("ab") {
        let _ = index.expand_prefix(&prefix);
    }
});
