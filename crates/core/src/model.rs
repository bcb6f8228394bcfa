use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, UnitId};

/// Lifecycle status of one content unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    /// Nothing generated yet and nothing in flight.
    Idle,
    /// A generation job currently owns this unit.
    Generating,
    /// Generation finished and an artifact is available.
    Ready,
    /// The last generation attempt failed.
    Failed,
}

/// One generation-addressable content item (a slide, a description block,
/// a social-post card).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    /// Stable, server-assigned id.
    pub id: UnitId,
    pub status: UnitStatus,

    /// Opaque content fields owned by the surrounding app. Edits patch
    /// individual keys of this map.
    #[serde(default)]
    pub content: BTreeMap<String, serde_json::Value>,

    /// Pointer to the produced output, if any.
    #[serde(default)]
    pub artifact_ref: Option<String>,

    /// Failure message from the last generation attempt, if any.
    #[serde(default)]
    pub error_message: Option<String>,

    /// Server timestamp (ms).
    pub updated_at_ms: i64,
}

impl Unit {
    /// New idle unit with empty content.
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            status: UnitStatus::Idle,
            content: BTreeMap::new(),
            artifact_ref: None,
            error_message: None,
            updated_at_ms: 0,
        }
    }
}

/// Ordered collection of units plus document-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub units: Vec<Unit>,
    /// Server timestamp (ms).
    pub updated_at_ms: i64,
}

impl DocumentSnapshot {
    /// New empty document.
    pub fn new(id: DocumentId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            units: Vec::new(),
            updated_at_ms: 0,
        }
    }

    /// Looks up a unit by id.
    pub fn unit(&self, id: &UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| &u.id == id)
    }

    /// Mutable lookup.
    pub fn unit_mut(&mut self, id: &UnitId) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| &u.id == id)
    }

    /// Ids of all units, in document order.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().map(|u| u.id.clone()).collect()
    }
}

/// Backend-reported state of a generation job.
///
/// Closed set: a status string outside these four is a deserialization
/// error, never a silent default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// Whether this state ends the poll loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Work counters for an in-flight job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub total: u32,
    pub completed: u32,
}
