//! Mutual reference discovery between collection schemas.

use serde::Serialize;

use crate::errors::ResourceError;
use crate::schema::SchemaProvider;

/// A reference declared on both sides: `source_field` on the source collection points at
/// `target_collection`, whose `target_field` points back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub source_collection: String,
    pub source_field: String,
    pub source_is_array: bool,
    pub target_collection: String,
    pub target_field: String,
    pub target_is_array: bool,
}

/// Relationships of `collection`, computed fresh from the schemas on every call.
///
/// One-directional references produce nothing. A source field can yield several
/// relationships when the target declares more than one back reference.
///
/// # Errors
/// `UnknownCollection` when `collection` has no schema, `UnknownRelatedCollection` when a
/// reference names a collection without one.
pub fn discover(schemas: &dyn SchemaProvider, collection: &str) -> Result<Vec<Relationship>, ResourceError> {
    let source = schemas
        .schema(collection)
        .ok_or_else(|| ResourceError::UnknownCollection(collection.to_string()))?;
    let mut out = Vec::new();
    for (field, related) in source.reference_fields() {
        let target = schemas.schema(related).ok_or_else(|| ResourceError::UnknownRelatedCollection {
            collection: collection.to_string(),
            field: field.name.clone(),
            related: related.to_string(),
        })?;
        for back in target.fields.iter().filter(|f| f.references(collection)) {
            out.push(Relationship {
                source_collection: collection.to_string(),
                source_field: field.name.clone(),
                source_is_array: field.array,
                target_collection: target.name.clone(),
                target_field: back.name.clone(),
                target_is_array: back.array,
            });
        }
    }
    log::debug!("{collection}: discovered {} relationship(s)", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, FieldSchema, SchemaRegistry};

    #[test]
    fn self_reference_is_mutual() {
        let reg = SchemaRegistry::new();
        reg.register(
            CollectionSchema::new("people").with_field(FieldSchema::reference("friends", "people").array()),
        );
        let rels = discover(&reg, "people").unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].target_field, "friends");
        assert!(rels[0].source_is_array && rels[0].target_is_array);
    }

    #[test]
    fn several_back_references() {
        let reg = SchemaRegistry::new();
        reg.register(CollectionSchema::new("a").with_field(FieldSchema::reference("b", "b")));
        reg.register(
            CollectionSchema::new("b")
                .with_field(FieldSchema::reference("primary", "a"))
                .with_field(FieldSchema::reference("all", "a").array()),
        );
        let rels = discover(&reg, "a").unwrap();
        let fields: Vec<_> = rels.iter().map(|r| r.target_field.as_str()).collect();
        assert_eq!(fields, vec!["primary", "all"]);
    }
}
