use bson::oid::ObjectId;
use bson::{Bson, Document};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::aggregate::run_pipeline;
use super::eval::{compare_docs, get_path, matches, matches_where, values_equal};
use super::{DocumentStore, UpdateOp};
use crate::errors::StoreError;
use crate::query::{CompiledQuery, FilterSet, Stage};
use crate::schema::SchemaProvider;

type Collection = BTreeMap<ObjectId, Document>;

/// Process-local document store keyed by collection name and `_id`.
///
/// Collections spring into existence on first insert. Reads against an unknown
/// collection see an empty one. When built [`with_schemas`](Self::with_schemas),
/// `populate` paths are resolved through the reference declared on the field.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    schemas: Option<Arc<dyn SchemaProvider>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("collections", &self.collection_names())
            .field("populates", &self.schemas.is_some())
            .finish()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_schemas(schemas: Arc<dyn SchemaProvider>) -> Self {
        Self { collections: RwLock::new(HashMap::new()), schemas: Some(schemas) }
    }

    /// Registers an empty collection; existing contents are kept.
    pub fn create_collection(&self, name: &str) {
        self.collections.write().entry(name.to_string()).or_default();
    }

    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every document of `collection` in `_id` order.
    #[must_use]
    pub fn all(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Matching documents, cloned so the lock is released before any further work.
    fn select(&self, collection: &str, query: &CompiledQuery) -> Vec<Document> {
        let guard = self.collections.read();
        let Some(docs) = guard.get(collection) else { return Vec::new() };
        docs.values()
            .filter(|d| matches(d, &query.filter))
            .filter(|d| query.where_value.as_deref().is_none_or(|w| matches_where(d, w)))
            .cloned()
            .collect()
    }

    /// Applies explicit sort, or nearest-first ordering for proximity queries.
    fn order(docs: &mut [Document], query: &CompiledQuery) {
        if !query.sort.is_empty() {
            docs.sort_by(|a, b| compare_docs(a, b, &query.sort));
        } else if let Some((field, near)) = query.filter.near() {
            docs.sort_by_key(|d| {
                OrderedFloat(get_path(d, field).and_then(|v| near.distance_to(v)).unwrap_or(f64::INFINITY))
            });
        }
    }

    fn populate(&self, collection: &str, doc: &mut Document, paths: &[String]) {
        if paths.is_empty() {
            return;
        }
        let Some(schema) = self.schemas.as_ref().and_then(|s| s.schema(collection)) else {
            log::debug!("populate on {collection} skipped: no schema");
            return;
        };
        let guard = self.collections.read();
        for path in paths {
            let Some(target) = schema.field(path).and_then(|f| f.reference.as_deref()) else {
                log::debug!("populate path `{path}` on {collection} is not a reference");
                continue;
            };
            let related = guard.get(target);
            let lookup = |v: &Bson| -> Option<Document> {
                let id = match v {
                    Bson::ObjectId(o) => *o,
                    Bson::String(s) => ObjectId::parse_str(s).ok()?,
                    _ => return None,
                };
                related.and_then(|c| c.get(&id)).cloned()
            };
            let Some(value) = doc.get_mut(path) else { continue };
            match value {
                Bson::Array(items) => {
                    *items = items.iter().filter_map(&lookup).map(Bson::Document).collect();
                }
                other => *other = lookup(other).map_or(Bson::Null, Bson::Document),
            }
        }
    }

    fn id_of(collection: &str, doc: &mut Document) -> Result<ObjectId, StoreError> {
        match doc.get("_id") {
            None | Some(Bson::Null) => {
                let id = ObjectId::new();
                let mut with_id = Document::new();
                with_id.insert("_id", id);
                for (k, v) in std::mem::take(doc) {
                    if k != "_id" {
                        with_id.insert(k, v);
                    }
                }
                *doc = with_id;
                Ok(id)
            }
            Some(Bson::ObjectId(id)) => Ok(*id),
            Some(Bson::String(s)) => {
                let id = ObjectId::parse_str(s).map_err(|_| {
                    StoreError::InvalidDocument(format!("{collection}: `_id` `{s}` is not an object id"))
                })?;
                doc.insert("_id", id);
                Ok(id)
            }
            Some(other) => Err(StoreError::InvalidDocument(format!(
                "{collection}: unsupported `_id` value {other}"
            ))),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, collection: &str, query: &CompiledQuery) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.select(collection, query);
        Self::order(&mut docs, query);
        // A zero limit means no limit.
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        let mut page: Vec<Document> = docs.into_iter().skip(query.skip).take(limit).collect();
        for d in &mut page {
            self.populate(collection, d, &query.populate);
        }
        Ok(page)
    }

    fn count(&self, collection: &str, query: &CompiledQuery) -> Result<u64, StoreError> {
        let n = self.select(collection, query).len();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }

    fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<Bson>, StoreError> {
        let mut docs = self.select(collection, query);
        Self::order(&mut docs, query);
        let mut out: Vec<Bson> = Vec::new();
        let mut push = |v: &Bson| {
            if !out.iter().any(|x| values_equal(x, v)) {
                out.push(v.clone());
            }
        };
        for d in &docs {
            match get_path(d, field) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut push),
                Some(v) => push(v),
                None => {}
            }
        }
        Ok(out)
    }

    fn aggregate(
        &self,
        collection: &str,
        query: &CompiledQuery,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.select(collection, query);
        Self::order(&mut docs, query);
        Ok(run_pipeline(docs, pipeline))
    }

    fn find_by_id(
        &self,
        collection: &str,
        id: &ObjectId,
        populate: &[String],
    ) -> Result<Option<Document>, StoreError> {
        let found = self.collections.read().get(collection).and_then(|c| c.get(id)).cloned();
        Ok(found.map(|mut d| {
            self.populate(collection, &mut d, populate);
            d
        }))
    }

    fn find_one(&self, collection: &str, filter: &FilterSet) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.read();
        Ok(guard.get(collection).and_then(|c| c.values().find(|d| matches(d, filter)).cloned()))
    }

    fn insert(&self, collection: &str, mut doc: Document) -> Result<Document, StoreError> {
        let id = Self::id_of(collection, &mut doc)?;
        let mut guard = self.collections.write();
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(StoreError::Conflict { collection: collection.to_string(), id: id.to_hex() });
        }
        docs.insert(id, doc.clone());
        Ok(doc)
    }

    fn save(&self, collection: &str, mut doc: Document) -> Result<Document, StoreError> {
        let id = Self::id_of(collection, &mut doc)?;
        self.collections.write().entry(collection.to_string()).or_default().insert(id, doc.clone());
        Ok(doc)
    }

    fn find_by_id_and_remove(
        &self,
        collection: &str,
        id: &ObjectId,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.collections.write().get_mut(collection).and_then(|c| c.remove(id)))
    }

    fn find_by_id_and_update(
        &self,
        collection: &str,
        id: &ObjectId,
        update: &UpdateOp,
    ) -> Result<Option<Document>, StoreError> {
        let mut guard = self.collections.write();
        let Some(doc) = guard.get_mut(collection).and_then(|c| c.get_mut(id)) else {
            return Ok(None);
        };
        // Apply to a copy so a rejected update leaves the stored document untouched.
        let mut next = doc.clone();
        update.apply(&mut next)?;
        *doc = next.clone();
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{NearSphere, Predicate, SortSpec, compile};
    use crate::schema::{CollectionSchema, FieldSchema, IndexKind, SchemaRegistry};
    use bson::doc;

    fn people() -> MemoryStore {
        let store = MemoryStore::new();
        for (name, age) in [("ann", 31), ("bob", 25), ("cid", 40)] {
            store.insert("people", doc! { "name": name, "age": age }).unwrap();
        }
        store
    }

    #[test]
    fn insert_assigns_id_first_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let d = store.insert("t", doc! { "a": 1 }).unwrap();
        assert_eq!(d.keys().next().map(String::as_str), Some("_id"));
        let id = d.get_object_id("_id").unwrap();
        assert!(matches!(
            store.insert("t", doc! { "_id": id }),
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store.insert("t", doc! { "_id": 5 }),
            Err(StoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn find_sorts_pages_and_counts() {
        let store = people();
        let mut q = CompiledQuery { sort: vec![SortSpec::desc("age")], limit: 2, ..Default::default() };
        let page = store.find("people", &q).unwrap();
        let names: Vec<_> = page.iter().map(|d| d.get_str("name").unwrap()).collect();
        assert_eq!(names, vec!["cid", "ann"]);
        q.skip = 2;
        assert_eq!(store.find("people", &q).unwrap().len(), 1);
        q.skip = 0;
        q.limit = 0;
        assert_eq!(store.find("people", &q).unwrap().len(), 3);
        assert_eq!(store.count("people", &q).unwrap(), 3);
        assert!(store.find("nobody", &q).unwrap().is_empty());
    }

    #[test]
    fn distinct_flattens_arrays_in_first_seen_order() {
        let store = MemoryStore::new();
        store.insert("t", doc! { "tags": ["a", "b"] }).unwrap();
        store.insert("t", doc! { "tags": "b" }).unwrap();
        store.insert("t", doc! { "tags": ["c", "a"] }).unwrap();
        let out = store.distinct("t", "tags", &CompiledQuery::default()).unwrap();
        assert_eq!(out, vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
    }

    #[test]
    fn near_orders_by_distance() {
        let store = MemoryStore::new();
        for (name, lon) in [("far", 10.0), ("near", 1.0), ("mid", 5.0)] {
            store
                .insert("spots", doc! { "name": name, "loc": { "type": "Point", "coordinates": [lon, 0.0] } })
                .unwrap();
        }
        let mut q = CompiledQuery::default();
        q.filter.insert(
            "loc",
            Predicate::Near(NearSphere { longitude: 0.0, latitude: 0.0, max_distance: Some(700_000.0) }),
        );
        let out = store.find("spots", &q).unwrap();
        let names: Vec<_> = out.iter().map(|d| d.get_str("name").unwrap()).collect();
        assert_eq!(names, vec!["near", "mid"]);
    }

    #[test]
    fn populate_replaces_references() {
        let registry = SchemaRegistry::new();
        registry.register(
            CollectionSchema::new("people")
                .with_field(FieldSchema::reference("friends", "people").array())
                .with_field(FieldSchema::reference("pet", "pets"))
                .with_field(FieldSchema::new("loc").indexed(IndexKind::Sphere2d)),
        );
        registry.register(CollectionSchema::new("pets"));
        let store = MemoryStore::with_schemas(Arc::new(registry));
        let pet = store.insert("pets", doc! { "kind": "cat" }).unwrap();
        let friend = store.insert("people", doc! { "name": "ann" }).unwrap();
        let me = store
            .insert(
                "people",
                doc! {
                    "name": "bob",
                    "friends": [friend.get_object_id("_id").unwrap(), ObjectId::new()],
                    "pet": pet.get_object_id("_id").unwrap(),
                },
            )
            .unwrap();
        let id = me.get_object_id("_id").unwrap();
        let got = store
            .find_by_id("people", &id, &["friends".to_string(), "pet".to_string()])
            .unwrap()
            .unwrap();
        let friends = got.get_array("friends").unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(got.get_document("pet").unwrap().get_str("kind").unwrap(), "cat");

        let schema = CollectionSchema::new("people");
        let q = compile(&schema, [("name", "bob"), ("__populate", "pet")]).unwrap();
        let found = store.find("people", &q).unwrap();
        assert!(found[0].get_document("pet").is_ok());
        assert!(found[0].get_array("friends").unwrap()[0].as_object_id().is_some());
    }

    #[test]
    fn rejected_update_leaves_document_unchanged() {
        let store = MemoryStore::new();
        let d = store.insert("t", doc! { "n": 1 }).unwrap();
        let id = d.get_object_id("_id").unwrap();
        let op = UpdateOp::AddToSet { field: "n".into(), value: Bson::Int32(2) };
        assert!(store.find_by_id_and_update("t", &id, &op).is_err());
        assert_eq!(store.all("t"), vec![d]);
        let op = UpdateOp::Set { field: "m".into(), value: Bson::Int32(2) };
        let updated = store.find_by_id_and_update("t", &id, &op).unwrap().unwrap();
        assert_eq!(updated.get_i32("m").unwrap(), 2);
        assert!(store.find_by_id_and_update("t", &ObjectId::new(), &op).unwrap().is_none());
    }
}
