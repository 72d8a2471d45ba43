//! Collection schema metadata: field reference declarations and index declarations.
//!
//! The core never reaches into a global registry; it is handed a `SchemaProvider`
//! at construction. `SchemaRegistry` is the in-process implementation, loadable from TOML.

use crate::errors::ConfigError;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Hash,
    BTree,
    #[serde(rename = "2dsphere")]
    Sphere2d,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDecl {
    pub field: String,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    /// Collection whose document ids this field holds.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// The field holds an array of values rather than a single one.
    #[serde(default)]
    pub array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexKind>,
}

impl FieldSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), reference: None, array: false, index: None }
    }

    #[must_use]
    pub fn reference(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { reference: Some(collection.into()), ..Self::new(name) }
    }

    #[must_use]
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    #[must_use]
    pub fn indexed(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    #[must_use]
    pub fn references(&self, collection: &str) -> bool {
        self.reference.as_deref() == Some(collection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub indexes: Vec<IndexDecl>,
}

impl CollectionSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new(), indexes: Vec::new() }
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_index(mut self, field: impl Into<String>, kind: IndexKind) -> Self {
        self.indexes.push(IndexDecl { field: field.into(), kind });
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields declaring a reference to another collection.
    pub fn reference_fields(&self) -> impl Iterator<Item = (&FieldSchema, &str)> {
        self.fields.iter().filter_map(|f| f.reference.as_deref().map(|r| (f, r)))
    }

    /// First field carrying a `2dsphere` index. Declared indexes win over field-level
    /// declarations; only one spatial field per collection is supported.
    #[must_use]
    pub fn find_spatial_field(&self) -> Option<&str> {
        self.indexes
            .iter()
            .find(|i| i.kind == IndexKind::Sphere2d)
            .map(|i| i.field.as_str())
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|f| f.index == Some(IndexKind::Sphere2d))
                    .map(|f| f.name.as_str())
            })
    }

    /// Casts 24-hex strings held by reference fields into `ObjectId`s, in place.
    pub fn cast_references(&self, doc: &mut Document) {
        for (field, _) in self.reference_fields() {
            let Some(value) = doc.get_mut(&field.name) else { continue };
            match value {
                Bson::String(s) => {
                    if let Ok(oid) = ObjectId::parse_str(s.as_str()) {
                        *value = Bson::ObjectId(oid);
                    }
                }
                Bson::Array(items) => {
                    for item in items.iter_mut() {
                        if let Bson::String(s) = item
                            && let Ok(oid) = ObjectId::parse_str(s.as_str())
                        {
                            *item = Bson::ObjectId(oid);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Source of collection schemas consumed by the core.
pub trait SchemaProvider: Send + Sync {
    fn schema(&self, collection: &str) -> Option<Arc<CollectionSchema>>;

    fn collection_names(&self) -> Vec<String>;
}

#[derive(Debug, Default, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "collection")]
    collections: Vec<CollectionSchema>,
}

/// In-memory schema registry.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<CollectionSchema>>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a collection schema.
    pub fn register(&self, schema: CollectionSchema) {
        self.schemas.write().insert(schema.name.clone(), Arc::new(schema));
    }

    /// Parses `[[collection]]` tables:
    ///
    /// ```toml
    /// [[collection]]
    /// name = "authors"
    /// fields = [{ name = "books", ref = "books", array = true }]
    /// indexes = [{ field = "location", kind = "2dsphere" }]
    /// ```
    ///
    /// # Errors
    /// Returns an error on invalid TOML or when a collection is declared twice.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: SchemaFile = toml::from_str(s)?;
        let registry = Self::new();
        {
            let mut map = registry.schemas.write();
            for schema in file.collections {
                if map.contains_key(&schema.name) {
                    return Err(ConfigError::DuplicateCollection(schema.name));
                }
                map.insert(schema.name.clone(), Arc::new(schema));
            }
        }
        Ok(registry)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml_str(&s)
    }
}

impl SchemaProvider for SchemaRegistry {
    fn schema(&self, collection: &str) -> Option<Arc<CollectionSchema>> {
        self.schemas.read().get(collection).cloned()
    }

    fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }
}
