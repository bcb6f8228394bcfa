use std::collections::{BTreeMap, HashMap};

use pagegen_core::ids::UnitId;
use tokio::task::JoinHandle;

/// One unit's locally buffered, not-yet-persisted field patch.
#[derive(Debug, Clone)]
pub(crate) struct EditIntent {
    pub(crate) fields: BTreeMap<String, serde_json::Value>,
    pub(crate) enqueued_at_ms: i64,
    /// Bumped on every merge, so an in-flight flush can tell whether
    /// newer edits arrived while it was on the wire.
    pub(crate) epoch: u64,
}

struct DebounceTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-unit write-behind buffer with trailing-edge debounce timers.
///
/// An intent stays pending until a flush of its exact epoch succeeds, so
/// reconciles that happen while the write is on the wire still see it.
#[derive(Default)]
pub(crate) struct EditBuffer {
    intents: HashMap<UnitId, EditIntent>,
    timers: HashMap<UnitId, DebounceTimer>,
    next_epoch: u64,
    next_generation: u64,
}

impl EditBuffer {
    /// Merges a patch into the unit's pending intent, last write wins per
    /// key. Returns the intent's new epoch.
    pub(crate) fn merge_patch(
        &mut self,
        unit_id: &UnitId,
        patch: BTreeMap<String, serde_json::Value>,
        now_ms: i64,
    ) -> u64 {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let intent = self
            .intents
            .entry(unit_id.clone())
            .or_insert_with(|| EditIntent {
                fields: BTreeMap::new(),
                enqueued_at_ms: now_ms,
                epoch,
            });
        intent.fields.extend(patch);
        intent.enqueued_at_ms = now_ms;
        intent.epoch = epoch;
        epoch
    }

    /// Snapshot of the pending fields for a flush. The intent itself
    /// stays pending until `finish_flush` confirms the write.
    pub(crate) fn begin_flush(
        &self,
        unit_id: &UnitId,
    ) -> Option<(BTreeMap<String, serde_json::Value>, u64)> {
        self.intents
            .get(unit_id)
            .map(|intent| (intent.fields.clone(), intent.epoch))
    }

    /// Destroys the intent if nothing newer arrived since `begin_flush`.
    /// Returns false when the intent was kept because its epoch advanced.
    pub(crate) fn finish_flush(&mut self, unit_id: &UnitId, flushed_epoch: u64) -> bool {
        match self.intents.get(unit_id) {
            Some(intent) if intent.epoch == flushed_epoch => {
                self.intents.remove(unit_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn pending(&self, unit_id: &UnitId) -> Option<&EditIntent> {
        self.intents.get(unit_id)
    }

    pub(crate) fn has_pending(&self, unit_id: &UnitId) -> bool {
        self.intents.contains_key(unit_id)
    }

    /// Units with pending intents, sorted for stable iteration.
    pub(crate) fn pending_units(&self) -> Vec<UnitId> {
        let mut units: Vec<UnitId> = self.intents.keys().cloned().collect();
        units.sort();
        units
    }

    pub(crate) fn remove_intent(&mut self, unit_id: &UnitId) {
        self.intents.remove(unit_id);
    }

    /// Hands out the generation for the next armed timer. A fire whose
    /// generation no longer matches lost a cancel/replace race.
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Installs the unit's timer task, cancelling any previous one.
    pub(crate) fn arm_timer(&mut self, unit_id: &UnitId, generation: u64, handle: JoinHandle<()>) {
        if let Some(old) = self
            .timers
            .insert(unit_id.clone(), DebounceTimer { generation, handle })
        {
            old.handle.abort();
        }
    }

    /// Cancels the unit's timer, if armed.
    pub(crate) fn disarm_timer(&mut self, unit_id: &UnitId) {
        if let Some(timer) = self.timers.remove(unit_id) {
            timer.handle.abort();
        }
    }

    /// Called by a firing timer task: claims the slot iff the generation
    /// still matches. The handle is dropped without abort because the
    /// caller is that very task.
    pub(crate) fn claim_fire(&mut self, unit_id: &UnitId, generation: u64) -> bool {
        match self.timers.get(unit_id) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(unit_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn abort_all_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}
