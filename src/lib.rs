//! Generic resource access over a schema-aware document store.
//!
//! Raw string parameters compile into typed queries ([`query::compile`]); creates and
//! deletes keep mutually declared references consistent through detached cascades
//! ([`cascade`]). [`resource::ResourceService`] ties both to a [`store::DocumentStore`]
//! and a [`schema::SchemaProvider`].

pub mod cascade;
pub mod cli;
pub mod config;
pub mod errors;
pub mod logger;
pub mod query;
pub mod relationships;
pub mod resource;
pub mod schema;
pub mod store;
pub mod telemetry;

pub use cascade::{CascadeHandle, CascadeMode, CascadeReport, CascadeUpdate};
pub use errors::{ConfigError, QueryError, ResourceError, StoreError};
pub use query::{CompiledQuery, Predicate, compile, infer};
pub use relationships::{Relationship, discover};
pub use resource::{CreateOptions, Created, DeleteOptions, Deleted, ResourceService, SearchResult};
pub use schema::{CollectionSchema, FieldSchema, IndexKind, SchemaProvider, SchemaRegistry};
pub use store::{DocumentStore, MemoryStore, UpdateOp};
