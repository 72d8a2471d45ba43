use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::command::Command;
use crate::cascade::CascadeHandle;
use crate::config::AppConfig;
use crate::errors::{ResourceError, StoreError};
use crate::query::bson_to_json;
use crate::resource::{CreateOptions, DeleteOptions, ResourceService};
use crate::schema::{SchemaProvider, SchemaRegistry};
use crate::store::{MemoryStore, ndjson};
use crate::telemetry;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    Json,
    Pretty,
}

#[must_use]
pub fn render(value: &Value, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => value.to_string(),
        OutputMode::Pretty => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    }
}

/// A schema registry and a memory store mirrored to `<data_dir>/<collection>.ndjson`.
pub struct Workspace {
    service: ResourceService,
    store: Arc<MemoryStore>,
    schemas: Arc<SchemaRegistry>,
    data_dir: PathBuf,
    default_relate: bool,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("data_dir", &self.data_dir)
            .field("default_relate", &self.default_relate)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Loads the schema file named by `cfg` and every collection file already on disk.
    ///
    /// # Errors
    /// Schema file or data file failures.
    pub fn open(cfg: &AppConfig, runtime: Handle) -> Result<Self, Box<dyn std::error::Error>> {
        let schemas = SchemaRegistry::from_file(&cfg.schema_path())?;
        let ws = Self::new(schemas, cfg.data_dir(), cfg.default_relate(), runtime);
        ws.load()?;
        Ok(ws)
    }

    #[must_use]
    pub fn new(schemas: SchemaRegistry, data_dir: PathBuf, default_relate: bool, runtime: Handle) -> Self {
        let schemas = Arc::new(schemas);
        let store = Arc::new(MemoryStore::with_schemas(schemas.clone()));
        let service = ResourceService::new(store.clone(), schemas.clone(), runtime);
        Self { service, store, schemas, data_dir, default_relate }
    }

    #[must_use]
    pub fn service(&self) -> &ResourceService {
        &self.service
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn data_file(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.ndjson"))
    }

    fn load(&self) -> Result<(), StoreError> {
        for collection in self.schemas.collection_names() {
            let path = self.data_file(&collection);
            if path.exists() {
                ndjson::import(&self.store, &collection, File::open(&path)?, true)?;
            }
        }
        Ok(())
    }

    /// Rewrites every collection file atomically.
    ///
    /// # Errors
    /// I/O failures creating the directory or replacing a file.
    pub fn persist(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.data_dir)?;
        for collection in self.store.collection_names() {
            write_atomic(&self.data_dir, &self.data_file(&collection), |f| {
                ndjson::export(&self.store, &collection, f).map(|_| ())
            })?;
        }
        Ok(())
    }

    fn require(&self, collection: &str) -> Result<(), ResourceError> {
        match self.schemas.schema(collection) {
            Some(_) => Ok(()),
            None => Err(ResourceError::UnknownCollection(collection.to_string())),
        }
    }
}

fn write_atomic(
    dir: &Path,
    target: &Path,
    write: impl FnOnce(&mut File) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

fn parse_payload(raw: &str) -> Result<Value, ResourceError> {
    serde_json::from_str(raw).map_err(|e| ResourceError::InvalidPayload(e.to_string()))
}

fn document_json(doc: bson::Document) -> Value {
    bson_to_json(&bson::Bson::Document(doc))
}

/// Runs `cmd`, awaits any cascade it started, and writes the store back after mutations.
///
/// # Errors
/// The failing operation's error; cascade failures are only logged.
pub async fn run(ws: &Workspace, cmd: Command) -> Result<Value, ResourceError> {
    let mutates = cmd.mutates();
    let svc = &ws.service;
    let (value, cascade): (Value, Option<CascadeHandle>) = match cmd {
        Command::Search { collection, params } => (svc.search(&collection, params)?.to_json(), None),
        Command::Create { collection, payload, relate } => {
            let relate = relate.unwrap_or(ws.default_relate);
            let created = svc.create(&collection, &parse_payload(&payload)?, CreateOptions { relate })?;
            (document_json(created.document), created.cascade)
        }
        Command::Read { collection, id, populate } => {
            (document_json(svc.read(&collection, Some(&id), populate.as_deref())?), None)
        }
        Command::Update { collection, id, payload } => {
            let doc = svc.update(&collection, [("_id", id.as_str())], &parse_payload(&payload)?)?;
            (document_json(doc), None)
        }
        Command::Delete { collection, id, relate } => {
            let relate = relate.unwrap_or(ws.default_relate);
            let deleted = svc.delete(&collection, Some(&id), DeleteOptions { relate })?;
            (deleted.to_json(), deleted.cascade)
        }
        Command::Relationships { collection } => {
            (serde_json::to_value(svc.relationships(&collection)?).unwrap_or_default(), None)
        }
        Command::Import { collection, file } => {
            ws.require(&collection)?;
            let f = File::open(&file).map_err(StoreError::from)?;
            let report = ndjson::import(&ws.store, &collection, f, true)?;
            (serde_json::json!({ "inserted": report.inserted, "skipped": report.skipped }), None)
        }
        Command::Export { collection, file } => {
            ws.require(&collection)?;
            let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let mut written = 0;
            write_atomic(dir, &file, |f| {
                written = ndjson::export(&ws.store, &collection, f)?;
                Ok(())
            })?;
            (serde_json::json!({ "written": written }), None)
        }
        Command::Collections => (serde_json::json!(ws.schemas.collection_names()), None),
        Command::Metrics => (serde_json::to_value(telemetry::snapshot()).unwrap_or_default(), None),
    };
    if let Some(handle) = cascade {
        let report = handle.wait().await;
        log::info!(
            "cascade: {} applied, {} missing, {} failed",
            report.applied,
            report.missing,
            report.failed
        );
    }
    if mutates {
        ws.persist()?;
    }
    Ok(value)
}
