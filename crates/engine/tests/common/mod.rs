#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pagegen_core::ids::{DocumentId, UnitId};
use pagegen_core::model::{DocumentSnapshot, Unit, UnitStatus};
use pagegen_engine::{EngineConfig, EngineEvent, InMemoryBackend, OrchestratorContext};
use tokio::sync::mpsc;

pub fn unit_id(s: &str) -> UnitId {
    UnitId::from_str(s)
}

pub fn document(units: &[&str]) -> DocumentSnapshot {
    let mut snapshot = DocumentSnapshot::new(DocumentId::from_str("doc-1"), "demo doc");
    for id in units {
        snapshot.units.push(Unit::new(unit_id(id)));
    }
    snapshot
}

pub fn engine(
    units: &[&str],
) -> (
    OrchestratorContext,
    Arc<InMemoryBackend>,
    mpsc::Receiver<EngineEvent>,
) {
    engine_with(units, EngineConfig::default())
}

pub fn engine_with(
    units: &[&str],
    config: EngineConfig,
) -> (
    OrchestratorContext,
    Arc<InMemoryBackend>,
    mpsc::Receiver<EngineEvent>,
) {
    let snapshot = document(units);
    let backend = Arc::new(InMemoryBackend::new(snapshot.clone()));
    let (ctx, events) = OrchestratorContext::new(
        backend.clone(),
        DocumentId::from_str("doc-1"),
        snapshot,
        config,
    );
    (ctx, backend, events)
}

/// Lets spawned pollers, timers, and flush tasks run to their next await
/// point without moving the paused clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Moves the paused clock and lets everything it woke run. Settles first
/// so tasks spawned since the last yield register their timers before the
/// clock moves; `tokio::time::advance` skips timers that don't exist yet.
pub async fn advance(ms: u64) {
    settle().await;
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

pub fn patch(pairs: &[(&str, &str)]) -> BTreeMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
        .collect()
}

/// String content field of a unit in a snapshot, if present.
pub fn text(doc: &DocumentSnapshot, unit: &str, key: &str) -> Option<String> {
    doc.unit(&unit_id(unit))
        .and_then(|u| u.content.get(key))
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Everything queued on the event stream right now.
pub fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// A unit shows GENERATING exactly while a job owns it.
pub async fn assert_status_matches_registry(ctx: &OrchestratorContext) {
    let doc = ctx.document().await;
    for unit in &doc.units {
        let active = ctx.is_active(&unit.id).await;
        assert_eq!(
            active,
            unit.status == UnitStatus::Generating,
            "unit {} has status {:?} while active = {}",
            unit.id,
            unit.status,
            active
        );
    }
}
