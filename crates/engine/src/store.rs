use std::collections::BTreeMap;

use pagegen_core::ids::UnitId;
use pagegen_core::model::{DocumentSnapshot, UnitStatus};
use tokio::sync::watch;

/// Single source of truth for the rendered document.
///
/// Mutations go through the setters below; callers bump the revision once
/// per logical change, which notifies watch subscribers.
pub(crate) struct UnitStore {
    snapshot: DocumentSnapshot,
    revision: u64,
    revision_tx: watch::Sender<u64>,
}

impl UnitStore {
    pub(crate) fn new(snapshot: DocumentSnapshot, revision_tx: watch::Sender<u64>) -> Self {
        Self {
            snapshot,
            revision: 0,
            revision_tx,
        }
    }

    pub(crate) fn snapshot(&self) -> &DocumentSnapshot {
        &self.snapshot
    }

    /// Mutable access for the reconciler.
    pub(crate) fn snapshot_mut(&mut self) -> &mut DocumentSnapshot {
        &mut self.snapshot
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    /// Marks the snapshot changed and notifies observers.
    pub(crate) fn bump(&mut self) {
        self.revision += 1;
        let _ = self.revision_tx.send(self.revision);
    }

    pub(crate) fn unit_status(&self, unit_id: &UnitId) -> Option<UnitStatus> {
        self.snapshot.unit(unit_id).map(|u| u.status)
    }

    pub(crate) fn set_status(&mut self, unit_id: &UnitId, status: UnitStatus) {
        if let Some(unit) = self.snapshot.unit_mut(unit_id) {
            unit.status = status;
        }
    }

    pub(crate) fn set_failed(&mut self, unit_id: &UnitId, message: &str) {
        if let Some(unit) = self.snapshot.unit_mut(unit_id) {
            unit.status = UnitStatus::Failed;
            unit.error_message = Some(message.to_string());
        }
    }

    /// Completion fallback for units the last pulled snapshot still shows
    /// in flight. Keeps the existing artifact when the job reported none.
    pub(crate) fn mark_ready(&mut self, unit_id: &UnitId, artifact_ref: Option<String>) {
        if let Some(unit) = self.snapshot.unit_mut(unit_id) {
            unit.status = UnitStatus::Ready;
            unit.error_message = None;
            if artifact_ref.is_some() {
                unit.artifact_ref = artifact_ref;
            }
        }
    }

    pub(crate) fn apply_content_patch(
        &mut self,
        unit_id: &UnitId,
        patch: &BTreeMap<String, serde_json::Value>,
    ) {
        if let Some(unit) = self.snapshot.unit_mut(unit_id) {
            for (key, value) in patch {
                unit.content.insert(key.clone(), value.clone());
            }
        }
    }

    pub(crate) fn clear_artifact(&mut self, unit_id: &UnitId) {
        if let Some(unit) = self.snapshot.unit_mut(unit_id) {
            unit.artifact_ref = None;
        }
    }

    /// Moves the listed units to the front in the given order; unlisted
    /// units keep their relative order after them.
    pub(crate) fn reorder(&mut self, order: &[UnitId]) {
        let mut reordered = Vec::with_capacity(self.snapshot.units.len());
        for unit_id in order {
            if let Some(pos) = self.snapshot.units.iter().position(|u| &u.id == unit_id) {
                reordered.push(self.snapshot.units.remove(pos));
            }
        }
        reordered.append(&mut self.snapshot.units);
        self.snapshot.units = reordered;
    }
}
