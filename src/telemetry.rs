//! Process-wide operation counters and the audit trail.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Log target routed to `audit.log` by [`crate::logger::configure_logging`].
pub const AUDIT_TARGET: &str = "resourcekit::audit";

#[derive(Default)]
pub struct Metrics {
    pub searches_total: AtomicU64,
    pub creates_total: AtomicU64,
    pub deletes_total: AtomicU64,
    pub updates_total: AtomicU64,
    pub cascade_dispatched_total: AtomicU64,
    pub cascade_failed_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub searches_total: u64,
    pub creates_total: u64,
    pub deletes_total: u64,
    pub updates_total: u64,
    pub cascade_dispatched_total: u64,
    pub cascade_failed_total: u64,
}

#[derive(Default)]
struct Telemetry {
    metrics: Metrics,
    // Tests capture audit lines in-memory
    audit_sink: RwLock<Option<Arc<RwLock<Vec<String>>>>>,
}

static TELEMETRY: std::sync::LazyLock<Telemetry> = std::sync::LazyLock::new(Telemetry::default);

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Search,
    Create,
    Delete,
    Update,
    CascadeDispatched,
    CascadeFailed,
}

pub(crate) fn incr(counter: Counter, n: u64) {
    let m = &TELEMETRY.metrics;
    let c = match counter {
        Counter::Search => &m.searches_total,
        Counter::Create => &m.creates_total,
        Counter::Delete => &m.deletes_total,
        Counter::Update => &m.updates_total,
        Counter::CascadeDispatched => &m.cascade_dispatched_total,
        Counter::CascadeFailed => &m.cascade_failed_total,
    };
    c.fetch_add(n, Ordering::Relaxed);
}

#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    let m = &TELEMETRY.metrics;
    MetricsSnapshot {
        searches_total: m.searches_total.load(Ordering::Relaxed),
        creates_total: m.creates_total.load(Ordering::Relaxed),
        deletes_total: m.deletes_total.load(Ordering::Relaxed),
        updates_total: m.updates_total.load(Ordering::Relaxed),
        cascade_dispatched_total: m.cascade_dispatched_total.load(Ordering::Relaxed),
        cascade_failed_total: m.cascade_failed_total.load(Ordering::Relaxed),
    }
}

pub fn set_audit_sink_for_tests(sink: Arc<RwLock<Vec<String>>>) {
    *TELEMETRY.audit_sink.write() = Some(sink);
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Emits one structured audit line for a mutation.
pub fn log_audit(op: &str, collection: &str, id: Option<&str>) {
    let line = serde_json::json!({
        "ts": now_ts(), "op": op, "collection": collection, "id": id
    })
    .to_string();
    log::info!(target: AUDIT_TARGET, "{line}");
    let sink = TELEMETRY.audit_sink.read().clone();
    if let Some(sink) = sink {
        sink.write().push(line);
    }
}
