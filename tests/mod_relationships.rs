use bson::oid::ObjectId;
use bson::{Bson, doc};
use resourcekit::cascade::{CascadeMode, plan};
use resourcekit::{CollectionSchema, FieldSchema, ResourceError, SchemaRegistry, UpdateOp, discover};

fn registry() -> SchemaRegistry {
    let reg = SchemaRegistry::new();
    reg.register(
        CollectionSchema::new("users")
            .with_field(FieldSchema::reference("groups", "groups").array())
            .with_field(FieldSchema::reference("avatar", "images")),
    );
    reg.register(CollectionSchema::new("groups").with_field(FieldSchema::reference("members", "users").array()));
    reg.register(CollectionSchema::new("images"));
    reg
}

#[test]
fn mutual_references_are_discovered() {
    let rels = discover(&registry(), "users").unwrap();
    assert_eq!(rels.len(), 1);
    let r = &rels[0];
    assert_eq!(
        (r.source_collection.as_str(), r.source_field.as_str(), r.target_collection.as_str(), r.target_field.as_str()),
        ("users", "groups", "groups", "members")
    );
    assert!(r.source_is_array && r.target_is_array);

    let back = discover(&registry(), "groups").unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].target_field, "groups");
}

#[test]
fn one_directional_references_are_excluded() {
    let rels = discover(&registry(), "users").unwrap();
    assert!(rels.iter().all(|r| r.source_field != "avatar"));
    assert!(discover(&registry(), "images").unwrap().is_empty());
}

#[test]
fn unresolvable_collections_are_errors() {
    let reg = registry();
    assert!(matches!(discover(&reg, "nope"), Err(ResourceError::UnknownCollection(_))));
    reg.register(CollectionSchema::new("orphans").with_field(FieldSchema::reference("parent", "missing")));
    let err = discover(&reg, "orphans").unwrap_err();
    assert!(matches!(
        err,
        ResourceError::UnknownRelatedCollection { ref collection, ref field, ref related }
            if collection == "orphans" && field == "parent" && related == "missing"
    ));
}

#[test]
fn planned_updates_follow_mode_and_cardinality() {
    let rels = discover(&registry(), "users").unwrap();
    let me = ObjectId::new();
    let (g1, g2) = (ObjectId::new(), ObjectId::new());
    let user = doc! { "_id": me, "groups": [g1, g2.to_hex()], "avatar": ObjectId::new() };

    let created = plan(&rels, &user, CascadeMode::Create);
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|u| u.target_collection == "groups"));
    assert_eq!(created[1].target_id, g2);
    assert_eq!(created[0].op, UpdateOp::AddToSet { field: "members".into(), value: Bson::ObjectId(me) });

    let deleted = plan(&rels, &user, CascadeMode::Delete);
    assert_eq!(deleted[0].op, UpdateOp::Pull { field: "members".into(), value: Bson::ObjectId(me) });

    // A scalar source value is normalised to a single target.
    let single = doc! { "_id": me, "groups": g1 };
    assert_eq!(plan(&rels, &single, CascadeMode::Create).len(), 1);
}
