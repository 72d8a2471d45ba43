#![no_main]
use libfuzzer_sys::fuzz_target;
use resourcekit::schema::{CollectionSchema, FieldSchema, IndexKind};

fuzz_target!(|params: Vec<(String, String)>| {
    if params.len() > 64 || params.iter().any(|(k, v)| k.len() + v.len() > 4096) {
        return;
    }
    let schema = CollectionSchema::new("fuzz").with_field(FieldSchema::new("loc").indexed(IndexKind::Sphere2d));
    // Must never panic; errors are fine.
    let _ = resourcekit::query::compile(&schema, params);
});
