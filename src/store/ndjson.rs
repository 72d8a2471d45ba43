//! Newline-delimited JSON import and export for [`MemoryStore`] collections.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use super::{DocumentStore, MemoryStore};
use crate::errors::StoreError;
use crate::query::{bson_to_json, json_object_to_document};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: u64,
    pub skipped: u64,
}

/// Loads one JSON object per line into `collection`.
///
/// Blank lines are ignored. Lines that are not JSON objects, or that collide with an
/// existing `_id`, are skipped and counted when `skip_errors` is set; otherwise the
/// first such line aborts the import.
///
/// # Errors
/// I/O failures, and the first bad record when `skip_errors` is false.
pub fn import<R: Read>(
    store: &MemoryStore,
    collection: &str,
    reader: R,
    skip_errors: bool,
) -> Result<ImportReport, StoreError> {
    let mut report = ImportReport::default();
    let reader = BufReader::new(reader);
    store.create_collection(collection);
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(map)) => {
                store.insert(collection, json_object_to_document(&map)).map(|_| ())
            }
            Ok(_) => Err(StoreError::InvalidDocument(format!("line {}: expected a JSON object", idx + 1))),
            Err(e) => Err(StoreError::InvalidDocument(format!("line {}: {e}", idx + 1))),
        };
        match outcome {
            Ok(()) => report.inserted += 1,
            Err(e) if skip_errors => {
                log::warn!("{collection}: skipping record: {e}");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    log::info!(
        "imported {} records into {collection} ({} skipped)",
        report.inserted,
        report.skipped
    );
    Ok(report)
}

/// Writes every document of `collection` as relaxed extended JSON, one per line.
///
/// # Errors
/// `NoSuchCollection` when the store has never seen `collection`, or an I/O failure.
pub fn export<W: Write>(store: &MemoryStore, collection: &str, writer: W) -> Result<u64, StoreError> {
    if !store.collection_names().iter().any(|c| c == collection) {
        return Err(StoreError::NoSuchCollection(collection.to_string()));
    }
    let mut w = BufWriter::new(writer);
    let mut written = 0u64;
    for doc in store.all(collection) {
        let value = bson_to_json(&bson::Bson::Document(doc));
        serde_json::to_writer(&mut w, &value).map_err(io::Error::from)?;
        w.write_all(b"\n")?;
        written += 1;
    }
    w.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompiledQuery;

    #[test]
    fn import_skips_bad_lines_and_keeps_ids() {
        let store = MemoryStore::new();
        let input = concat!(
            "{\"_id\": {\"$oid\": \"64b7f9a2c3d4e5f601234567\"}, \"name\": \"ann\"}\n",
            "\n",
            "not json\n",
            "[1, 2]\n",
            "{\"name\": \"bob\", \"age\": 3}\n",
        );
        let report = import(&store, "people", input.as_bytes(), true).unwrap();
        assert_eq!(report, ImportReport { inserted: 2, skipped: 2 });
        let docs = store.find("people", &CompiledQuery::default()).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().any(|d| d.get_object_id("_id").unwrap().to_hex() == "64b7f9a2c3d4e5f601234567"));
    }

    #[test]
    fn strict_import_fails_fast() {
        let store = MemoryStore::new();
        let err = import(&store, "t", "{}\nnope\n".as_bytes(), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn export_writes_one_line_per_document() {
        let store = MemoryStore::new();
        import(&store, "t", "{\"a\": 1}\n{\"a\": 2}\n".as_bytes(), false).unwrap();
        let mut out = Vec::new();
        assert_eq!(export(&store, "t", &mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"$oid\""));
        assert!(matches!(export(&store, "missing", Vec::new()), Err(StoreError::NoSuchCollection(_))));

        let reloaded = MemoryStore::new();
        let report = import(&reloaded, "t", text.as_bytes(), false).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(reloaded.all("t"), store.all("t"));
    }
}
