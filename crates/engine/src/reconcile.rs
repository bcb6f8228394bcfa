//! Server-wins merge with two local carve-outs: content fields covered by
//! a pending edit intent, and the GENERATING status of units owned by an
//! active job.

use pagegen_core::ids::UnitId;
use pagegen_core::model::{DocumentSnapshot, Unit, UnitStatus};

use crate::buffer::EditBuffer;
use crate::registry::JobRegistry;

/// What a merge did, for logs and callers that render sync results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Units present on the server but not locally.
    pub units_added: usize,
    /// Local units the server no longer has.
    pub units_removed: usize,
    /// Field values kept local because an edit intent covers them.
    pub fields_preserved: usize,
    /// Whether the merge changed the local snapshot at all.
    pub changed: bool,
}

/// Merges a full server snapshot into the local one. Server wins on unit
/// membership, order, document metadata, and every field not carved out
/// above. Idempotent for fixed server and pending local state.
pub(crate) fn merge_snapshot(
    local: &mut DocumentSnapshot,
    server: &DocumentSnapshot,
    buffer: &EditBuffer,
    registry: &JobRegistry,
) -> MergeReport {
    let mut report = MergeReport::default();
    let mut merged_units = Vec::with_capacity(server.units.len());
    for server_unit in &server.units {
        if local.unit(&server_unit.id).is_none() {
            report.units_added += 1;
        }
        merged_units.push(overlay(server_unit, buffer, registry, &mut report));
    }
    report.units_removed = local
        .units
        .iter()
        .filter(|u| server.unit(&u.id).is_none())
        .count();

    let merged = DocumentSnapshot {
        id: server.id.clone(),
        title: server.title.clone(),
        units: merged_units,
        updated_at_ms: server.updated_at_ms,
    };
    if *local != merged {
        report.changed = true;
        *local = merged;
    }
    report
}

/// Applies the same field rules to a single unit, leaving the rest of the
/// document untouched. Used by post-flush resyncs so one unit's write
/// never clobbers another unit's pending edits.
pub(crate) fn merge_unit(
    local: &mut DocumentSnapshot,
    server: &DocumentSnapshot,
    unit_id: &UnitId,
    buffer: &EditBuffer,
    registry: &JobRegistry,
) -> MergeReport {
    let mut report = MergeReport::default();
    let Some(server_unit) = server.unit(unit_id) else {
        // gone server-side; the next full sync drops it
        return report;
    };
    let merged = overlay(server_unit, buffer, registry, &mut report);
    match local.unit_mut(unit_id) {
        Some(local_unit) => {
            if *local_unit != merged {
                report.changed = true;
                *local_unit = merged;
            }
        }
        None => {
            // appended out of order; the next full sync restores order
            report.units_added += 1;
            report.changed = true;
            local.units.push(merged);
        }
    }
    report
}

/// One unit's merged value: the server copy, with locally buffered field
/// values reinstated and the status pinned while a job owns the unit.
fn overlay(
    server: &Unit,
    buffer: &EditBuffer,
    registry: &JobRegistry,
    report: &mut MergeReport,
) -> Unit {
    let mut merged = server.clone();
    if let Some(intent) = buffer.pending(&server.id) {
        for (key, value) in &intent.fields {
            if merged.content.get(key) != Some(value) {
                report.fields_preserved += 1;
                tracing::debug!(
                    unit_id = %server.id,
                    field = %key,
                    "kept locally edited field over server value"
                );
                merged.content.insert(key.clone(), value.clone());
            }
        }
    }
    if registry.is_active(&server.id) {
        merged.status = UnitStatus::Generating;
    }
    merged
}
