//! The document store seam consumed by the resource layer, and its in-memory implementation.

mod aggregate;
pub(crate) mod eval;
mod memory;
pub mod ndjson;

pub use memory::MemoryStore;

use crate::errors::StoreError;
use crate::query::{CompiledQuery, FilterSet, Stage};
use bson::oid::ObjectId;
use bson::{Bson, Document};

/// Single-document update issued by the cascade propagator.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Append `value` to the array at `field` unless already present.
    AddToSet { field: String, value: Bson },
    /// Assign `value` to `field`.
    Set { field: String, value: Bson },
    /// Remove every occurrence of `value` from the array at `field`.
    Pull { field: String, value: Bson },
    /// Remove `field`; when `only_if` is set, only while it still holds that value.
    Unset { field: String, only_if: Option<Bson> },
}

impl UpdateOp {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::AddToSet { field, .. }
            | Self::Set { field, .. }
            | Self::Pull { field, .. }
            | Self::Unset { field, .. } => field,
        }
    }

    /// Applies the update in place and reports whether the document changed.
    ///
    /// # Errors
    /// `Rejected` when an array operator targets a non-array value.
    pub fn apply(&self, doc: &mut Document) -> Result<bool, StoreError> {
        match self {
            Self::AddToSet { field, value } => match doc.get_mut(field) {
                Some(Bson::Array(items)) => {
                    if items.iter().any(|v| eval::values_equal(v, value)) {
                        Ok(false)
                    } else {
                        items.push(value.clone());
                        Ok(true)
                    }
                }
                None | Some(Bson::Null) => {
                    doc.insert(field.clone(), Bson::Array(vec![value.clone()]));
                    Ok(true)
                }
                Some(_) => Err(StoreError::Rejected(format!(
                    "cannot apply $addToSet to non-array field `{field}`"
                ))),
            },
            Self::Set { field, value } => {
                if doc.get(field).is_some_and(|v| v == value) {
                    return Ok(false);
                }
                doc.insert(field.clone(), value.clone());
                Ok(true)
            }
            Self::Pull { field, value } => match doc.get_mut(field) {
                Some(Bson::Array(items)) => {
                    let before = items.len();
                    items.retain(|v| !eval::values_equal(v, value));
                    Ok(items.len() != before)
                }
                None | Some(Bson::Null) => Ok(false),
                Some(_) => Err(StoreError::Rejected(format!(
                    "cannot apply $pull to non-array field `{field}`"
                ))),
            },
            Self::Unset { field, only_if } => {
                let holds = match (doc.get(field), only_if) {
                    (None, _) => return Ok(false),
                    (Some(_), None) => true,
                    (Some(current), Some(expected)) => eval::values_equal(current, expected),
                };
                if holds {
                    doc.remove(field);
                }
                Ok(holds)
            }
        }
    }
}

/// Query and write primitives of the underlying document store.
///
/// Implementations must apply each write atomically per document; no multi-document
/// atomicity is expected.
pub trait DocumentStore: Send + Sync {
    /// Matching documents after sort, skip, limit and population.
    fn find(&self, collection: &str, query: &CompiledQuery) -> Result<Vec<Document>, StoreError>;

    /// Number of matching documents; pagination is ignored.
    fn count(&self, collection: &str, query: &CompiledQuery) -> Result<u64, StoreError>;

    /// Distinct values of `field` across matching documents.
    fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<Bson>, StoreError>;

    /// Runs `pipeline` over the matching documents.
    fn aggregate(
        &self,
        collection: &str,
        query: &CompiledQuery,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError>;

    fn find_by_id(
        &self,
        collection: &str,
        id: &ObjectId,
        populate: &[String],
    ) -> Result<Option<Document>, StoreError>;

    fn find_one(&self, collection: &str, filter: &FilterSet) -> Result<Option<Document>, StoreError>;

    /// Persists a new document, assigning `_id` when absent, and returns it.
    fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError>;

    /// Replaces (or inserts) the document with the same `_id`.
    fn save(&self, collection: &str, doc: Document) -> Result<Document, StoreError>;

    fn find_by_id_and_remove(
        &self,
        collection: &str,
        id: &ObjectId,
    ) -> Result<Option<Document>, StoreError>;

    /// Applies `update` to the document and returns its new state, `None` if it does not exist.
    fn find_by_id_and_update(
        &self,
        collection: &str,
        id: &ObjectId,
        update: &UpdateOp,
    ) -> Result<Option<Document>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn add_to_set_is_idempotent() {
        let id = ObjectId::new();
        let op = UpdateOp::AddToSet { field: "tags".into(), value: Bson::ObjectId(id) };
        let mut d = doc! {};
        assert!(op.apply(&mut d).unwrap());
        assert!(!op.apply(&mut d).unwrap());
        assert_eq!(d.get_array("tags").unwrap().len(), 1);
        // A hex string holding the same id counts as present.
        let mut d = doc! { "tags": [id.to_hex()] };
        assert!(!op.apply(&mut d).unwrap());
    }

    #[test]
    fn pull_and_conditional_unset() {
        let id = ObjectId::new();
        let other = ObjectId::new();
        let mut d = doc! { "tags": [id, other, id], "owner": other };
        let pull = UpdateOp::Pull { field: "tags".into(), value: Bson::ObjectId(id) };
        assert!(pull.apply(&mut d).unwrap());
        assert_eq!(d.get_array("tags").unwrap(), &vec![Bson::ObjectId(other)]);

        let unset = UpdateOp::Unset { field: "owner".into(), only_if: Some(Bson::ObjectId(id)) };
        assert!(!unset.apply(&mut d).unwrap());
        assert!(d.contains_key("owner"));
        let unset = UpdateOp::Unset { field: "owner".into(), only_if: Some(Bson::ObjectId(other)) };
        assert!(unset.apply(&mut d).unwrap());
        assert!(!d.contains_key("owner"));
    }

    #[test]
    fn array_ops_reject_scalars() {
        let mut d = doc! { "n": 1 };
        let op = UpdateOp::AddToSet { field: "n".into(), value: Bson::Int32(2) };
        assert!(matches!(op.apply(&mut d), Err(StoreError::Rejected(_))));
    }
}
