#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16384 { return; }
    let store = resourcekit::MemoryStore::new();
    let _ = resourcekit::store::ndjson::import(&store, "fuzz", data, true);
});
