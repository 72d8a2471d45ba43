//! Resource operations: search, create, delete, plus the read and update passthroughs.

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::cascade::{self, CascadeHandle, CascadeMode};
use crate::errors::ResourceError;
use crate::query::{CompiledQuery, bson_to_json, compile, json_object_to_document};
use crate::relationships::{Relationship, discover};
use crate::schema::{CollectionSchema, SchemaProvider};
use crate::store::DocumentStore;
use crate::telemetry::{self, Counter};

pub const DELETED_STATUS: u16 = 204;
pub const DELETED_MESSAGE: &str = "Resource deleted.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Propagate the new document's id to mutually related documents.
    pub relate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub relate: bool,
}

/// Result of [`ResourceService::search`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    /// Count mode; serialises as a one-element array.
    Count(u64),
    Documents { count: usize, results: Vec<Document> },
    /// Distinct values of a field.
    Values { count: usize, results: Vec<Bson> },
}

impl SearchResult {
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Count(n) => serde_json::json!([n]),
            Self::Documents { count, results } => serde_json::json!({
                "count": count,
                "results": results.iter().map(|d| bson_to_json(&Bson::Document(d.clone()))).collect::<Vec<_>>(),
            }),
            Self::Values { count, results } => serde_json::json!({
                "count": count,
                "results": results.iter().map(bson_to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// Number of results, or the count itself in count mode.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Count(n) => *n,
            Self::Documents { count, .. } | Self::Values { count, .. } => *count as u64,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for SearchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// A persisted document and, when relationships were propagated, the handle on that work.
#[derive(Debug)]
pub struct Created {
    pub document: Document,
    pub cascade: Option<CascadeHandle>,
}

#[derive(Debug)]
pub struct Deleted {
    pub status: u16,
    pub message: &'static str,
    pub cascade: Option<CascadeHandle>,
}

impl Deleted {
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "status": self.status, "message": self.message })
    }
}

/// Generic access to every collection the schema provider knows about.
#[derive(Clone)]
pub struct ResourceService {
    store: Arc<dyn DocumentStore>,
    schemas: Arc<dyn SchemaProvider>,
    runtime: Handle,
}

impl std::fmt::Debug for ResourceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceService")
            .field("collections", &self.schemas.collection_names())
            .finish_non_exhaustive()
    }
}

impl ResourceService {
    /// Cascades are spawned on `runtime`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, schemas: Arc<dyn SchemaProvider>, runtime: Handle) -> Self {
        Self { store, schemas, runtime }
    }

    /// Binds to the tokio runtime of the calling context.
    ///
    /// # Errors
    /// `NoRuntime` when called outside a tokio runtime.
    pub fn current(store: Arc<dyn DocumentStore>, schemas: Arc<dyn SchemaProvider>) -> Result<Self, ResourceError> {
        let runtime = Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;
        Ok(Self::new(store, schemas, runtime))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn schema(&self, collection: &str) -> Result<Arc<CollectionSchema>, ResourceError> {
        self.schemas
            .schema(collection)
            .ok_or_else(|| ResourceError::UnknownCollection(collection.to_string()))
    }

    /// Mutual relationships of `collection`.
    ///
    /// # Errors
    /// See [`discover`].
    pub fn relationships(&self, collection: &str) -> Result<Vec<Relationship>, ResourceError> {
        discover(self.schemas.as_ref(), collection)
    }

    /// Compiles `params` and runs the query. Compile errors return before the store is touched.
    ///
    /// # Errors
    /// `UnknownCollection`, any `QueryError`, or a store failure.
    pub fn search<I, K, V>(&self, collection: &str, params: I) -> Result<SearchResult, ResourceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let schema = self.schema(collection)?;
        let query = compile(&schema, params).inspect_err(|e| {
            log::debug!("{collection}: rejected search: {e}");
        })?;
        telemetry::incr(Counter::Search, 1);
        self.execute(collection, &query)
    }

    fn execute(&self, collection: &str, query: &CompiledQuery) -> Result<SearchResult, ResourceError> {
        if query.count {
            return Ok(SearchResult::Count(self.store.count(collection, query)?));
        }
        if let Some(field) = &query.distinct {
            let results = self.store.distinct(collection, field, query)?;
            return Ok(SearchResult::Values { count: results.len(), results });
        }
        let results = match &query.aggregate {
            Some(pipeline) => self.store.aggregate(collection, query, pipeline)?,
            None => self.store.find(collection, query)?,
        };
        Ok(SearchResult::Documents { count: results.len(), results })
    }

    /// Creates a document from a JSON object payload.
    ///
    /// # Errors
    /// `InvalidPayload` for non-object payloads, otherwise as [`Self::create_document`].
    pub fn create(&self, collection: &str, payload: &Value, opts: CreateOptions) -> Result<Created, ResourceError> {
        let Value::Object(map) = payload else {
            return Err(ResourceError::InvalidPayload("expected a JSON object".into()));
        };
        self.create_document(collection, json_object_to_document(map), opts)
    }

    /// Persists `doc`, casting a hex `_id` and hex reference values to object ids.
    ///
    /// Relationships are discovered before the insert, so schema errors leave the store
    /// untouched. Cascades run detached; the returned handle may be ignored.
    ///
    /// # Errors
    /// `UnknownCollection`, `UnknownRelatedCollection`, `InvalidPayload` for a malformed
    /// `_id`, or a store failure.
    pub fn create_document(
        &self,
        collection: &str,
        mut doc: Document,
        opts: CreateOptions,
    ) -> Result<Created, ResourceError> {
        let schema = self.schema(collection)?;
        let relationships = if opts.relate { self.relationships(collection)? } else { Vec::new() };
        cast_id(&mut doc)?;
        schema.cast_references(&mut doc);
        let document = self.store.insert(collection, doc)?;
        telemetry::incr(Counter::Create, 1);
        telemetry::log_audit("create", collection, id_hex(&document).as_deref());
        let cascade = self.dispatch(&relationships, &document, CascadeMode::Create);
        Ok(Created { document, cascade })
    }

    /// Removes the document with `id`.
    ///
    /// # Errors
    /// `NotFound` for a missing, empty or malformed id (no store call is made) and for an
    /// id matching nothing; schema errors when `relate` is set; store failures.
    pub fn delete(&self, collection: &str, id: Option<&str>, opts: DeleteOptions) -> Result<Deleted, ResourceError> {
        let Some(id) = parse_id(id) else { return Err(ResourceError::NotFound) };
        self.schema(collection)?;
        let relationships = if opts.relate { self.relationships(collection)? } else { Vec::new() };
        let removed = self
            .store
            .find_by_id_and_remove(collection, &id)?
            .ok_or(ResourceError::NotFound)?;
        telemetry::incr(Counter::Delete, 1);
        telemetry::log_audit("delete", collection, Some(&id.to_hex()));
        let cascade = self.dispatch(&relationships, &removed, CascadeMode::Delete);
        Ok(Deleted { status: DELETED_STATUS, message: DELETED_MESSAGE, cascade })
    }

    /// Looks a document up by id, populating the comma separated `populate` paths.
    ///
    /// # Errors
    /// `NotFound` under the same rules as [`Self::delete`].
    pub fn read(&self, collection: &str, id: Option<&str>, populate: Option<&str>) -> Result<Document, ResourceError> {
        let Some(id) = parse_id(id) else { return Err(ResourceError::NotFound) };
        self.schema(collection)?;
        let populate: Vec<String> = populate
            .into_iter()
            .flat_map(|p| p.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        self.store.find_by_id(collection, &id, &populate)?.ok_or(ResourceError::NotFound)
    }

    /// Shallow-merges `payload` into the first document matching `conditions` and saves it.
    ///
    /// # Errors
    /// `NotFound` when nothing matches, `InvalidPayload` for non-object payloads, compile
    /// errors for bad conditions, store failures.
    pub fn update<I, K, V>(&self, collection: &str, conditions: I, payload: &Value) -> Result<Document, ResourceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let Value::Object(map) = payload else {
            return Err(ResourceError::InvalidPayload("expected a JSON object".into()));
        };
        let schema = self.schema(collection)?;
        let query = compile(&schema, conditions)?;
        let mut doc = self.store.find_one(collection, &query.filter)?.ok_or(ResourceError::NotFound)?;
        for (k, v) in json_object_to_document(map) {
            if k != "_id" {
                doc.insert(k, v);
            }
        }
        schema.cast_references(&mut doc);
        let saved = self.store.save(collection, doc)?;
        telemetry::incr(Counter::Update, 1);
        telemetry::log_audit("update", collection, id_hex(&saved).as_deref());
        Ok(saved)
    }

    fn dispatch(&self, relationships: &[Relationship], doc: &Document, mode: CascadeMode) -> Option<CascadeHandle> {
        let updates = cascade::plan(relationships, doc, mode);
        if updates.is_empty() {
            return None;
        }
        log::debug!("dispatching {} cascade update(s) ({mode:?})", updates.len());
        Some(cascade::propagate(Arc::clone(&self.store), updates, &self.runtime))
    }
}

fn parse_id(id: Option<&str>) -> Option<ObjectId> {
    id.map(str::trim).filter(|s| !s.is_empty()).and_then(|s| ObjectId::parse_str(s).ok())
}

fn id_hex(doc: &Document) -> Option<String> {
    doc.get_object_id("_id").ok().map(|o| o.to_hex())
}

fn cast_id(doc: &mut Document) -> Result<(), ResourceError> {
    if let Some(Bson::String(s)) = doc.get("_id") {
        let id = ObjectId::parse_str(s)
            .map_err(|_| ResourceError::InvalidPayload(format!("`_id` `{s}` is not an object id")))?;
        doc.insert("_id", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_result_shapes() {
        assert_eq!(SearchResult::Count(3).to_json(), serde_json::json!([3]));
        let v = SearchResult::Values { count: 1, results: vec![Bson::from("x")] };
        assert_eq!(serde_json::to_value(&v).unwrap(), serde_json::json!({"count": 1, "results": ["x"]}));
    }

    #[test]
    fn ids_parse_strictly() {
        assert!(parse_id(None).is_none());
        assert!(parse_id(Some("")).is_none());
        assert!(parse_id(Some("xyz")).is_none());
        assert!(parse_id(Some(" 64b7f9a2c3d4e5f601234567 ")).is_some());
    }
}
