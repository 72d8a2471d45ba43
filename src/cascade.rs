//! Keeps mutual references consistent after a create or delete.
//!
//! Planning is pure. Dispatch hands the planned updates to a detached tokio task so the
//! primary operation never waits on them; each update runs as its own blocking job
//! against the store and failures are logged and counted, never retried.

use bson::oid::ObjectId;
use bson::{Bson, Document};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};

use crate::relationships::Relationship;
use crate::store::{DocumentStore, UpdateOp};
use crate::telemetry::{self, Counter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    Create,
    Delete,
}

/// One update against one related document.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeUpdate {
    pub target_collection: String,
    pub target_id: ObjectId,
    pub op: UpdateOp,
}

/// Outcome counts of a dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub applied: usize,
    pub missing: usize,
    pub failed: usize,
}

impl CascadeReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.applied + self.missing + self.failed
    }
}

/// Handle on a detached cascade batch. Dropping it does not cancel the batch.
#[derive(Debug)]
pub struct CascadeHandle {
    task: JoinHandle<CascadeReport>,
}

impl CascadeHandle {
    /// Waits for every update of the batch to settle.
    pub async fn wait(self) -> CascadeReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                log::warn!("cascade batch aborted: {e}");
                CascadeReport::default()
            }
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Normalises a reference value to the ids it holds.
fn referenced_ids(collection: &str, field: &str, value: Option<&Bson>) -> Vec<ObjectId> {
    let items: Vec<&Bson> = match value {
        None | Some(Bson::Null) => return Vec::new(),
        Some(Bson::Array(items)) => items.iter().collect(),
        Some(v) => vec![v],
    };
    let mut ids: Vec<ObjectId> = Vec::with_capacity(items.len());
    for item in items {
        let id = match item {
            Bson::ObjectId(o) => Some(*o),
            Bson::String(s) => ObjectId::parse_str(s).ok(),
            _ => None,
        };
        match id {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => log::warn!("{collection}.{field}: skipping non-id reference value {item}"),
        }
    }
    ids
}

/// Builds the updates implied by `document` having been created or deleted.
///
/// Create adds the document's id to each related document (`AddToSet` on array back
/// references, `Set` otherwise). Delete removes it (`Pull`, or an `Unset` that only
/// clears the field while it still holds the deleted id).
#[must_use]
pub fn plan(relationships: &[Relationship], document: &Document, mode: CascadeMode) -> Vec<CascadeUpdate> {
    if relationships.is_empty() {
        return Vec::new();
    }
    let Some(Bson::ObjectId(source_id)) = document.get("_id") else {
        log::warn!("cascade skipped: document has no object id");
        return Vec::new();
    };
    let source = Bson::ObjectId(*source_id);
    let mut updates = Vec::new();
    for rel in relationships {
        let field = rel.target_field.clone();
        let op = match (mode, rel.target_is_array) {
            (CascadeMode::Create, true) => UpdateOp::AddToSet { field, value: source.clone() },
            (CascadeMode::Create, false) => UpdateOp::Set { field, value: source.clone() },
            (CascadeMode::Delete, true) => UpdateOp::Pull { field, value: source.clone() },
            (CascadeMode::Delete, false) => UpdateOp::Unset { field, only_if: Some(source.clone()) },
        };
        let ids = referenced_ids(&rel.source_collection, &rel.source_field, document.get(&rel.source_field));
        updates.extend(ids.into_iter().map(|target_id| CascadeUpdate {
            target_collection: rel.target_collection.clone(),
            target_id,
            op: op.clone(),
        }));
    }
    updates
}

enum Outcome {
    Applied,
    Missing,
    Failed,
}

fn apply(store: &dyn DocumentStore, update: &CascadeUpdate) -> Outcome {
    match store.find_by_id_and_update(&update.target_collection, &update.target_id, &update.op) {
        Ok(Some(_)) => Outcome::Applied,
        Ok(None) => {
            log::warn!(
                "cascade target {}/{} not found for {}",
                update.target_collection,
                update.target_id,
                update.op.field()
            );
            Outcome::Missing
        }
        Err(e) => {
            log::warn!(
                "cascade update on {}/{} ({}) failed: {e}",
                update.target_collection,
                update.target_id,
                update.op.field()
            );
            Outcome::Failed
        }
    }
}

/// Dispatches `updates` on `runtime` without waiting for them.
pub fn propagate(store: Arc<dyn DocumentStore>, updates: Vec<CascadeUpdate>, runtime: &Handle) -> CascadeHandle {
    telemetry::incr(Counter::CascadeDispatched, updates.len() as u64);
    let task = runtime.spawn(async move {
        let mut jobs = JoinSet::new();
        for update in updates {
            let store = Arc::clone(&store);
            jobs.spawn_blocking(move || apply(store.as_ref(), &update));
        }
        let mut report = CascadeReport::default();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Outcome::Applied) => report.applied += 1,
                Ok(Outcome::Missing) => report.missing += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(e) => {
                    log::warn!("cascade job panicked: {e}");
                    report.failed += 1;
                }
            }
        }
        let failures = (report.missing + report.failed) as u64;
        if failures > 0 {
            telemetry::incr(Counter::CascadeFailed, failures);
        }
        log::debug!(
            "cascade batch settled: {} applied, {} missing, {} failed",
            report.applied,
            report.missing,
            report.failed
        );
        report
    });
    CascadeHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn rel(target_is_array: bool) -> Relationship {
        Relationship {
            source_collection: "people".into(),
            source_field: "friends".into(),
            source_is_array: true,
            target_collection: "people".into(),
            target_field: "friends".into(),
            target_is_array,
        }
    }

    #[test]
    fn create_plans_one_add_per_distinct_id() {
        let me = ObjectId::new();
        let (a, b) = (ObjectId::new(), ObjectId::new());
        let d = doc! { "_id": me, "friends": [a, b.to_hex(), a, 7] };
        let ups = plan(&[rel(true)], &d, CascadeMode::Create);
        assert_eq!(ups.len(), 2);
        assert_eq!(ups[0].target_id, a);
        assert_eq!(ups[1].target_id, b);
        assert_eq!(ups[0].op, UpdateOp::AddToSet { field: "friends".into(), value: Bson::ObjectId(me) });
    }

    #[test]
    fn delete_of_scalar_back_reference_is_conditional() {
        let me = ObjectId::new();
        let a = ObjectId::new();
        let d = doc! { "_id": me, "friends": a };
        let ups = plan(&[rel(false)], &d, CascadeMode::Delete);
        assert_eq!(
            ups,
            vec![CascadeUpdate {
                target_collection: "people".into(),
                target_id: a,
                op: UpdateOp::Unset { field: "friends".into(), only_if: Some(Bson::ObjectId(me)) },
            }]
        );
    }

    #[test]
    fn empty_or_missing_values_plan_nothing() {
        let me = ObjectId::new();
        for d in [doc! { "_id": me }, doc! { "_id": me, "friends": [] }, doc! { "_id": me, "friends": null }] {
            assert!(plan(&[rel(true)], &d, CascadeMode::Create).is_empty());
        }
        assert!(plan(&[rel(true)], &doc! { "friends": [ObjectId::new()] }, CascadeMode::Create).is_empty());
    }
}
