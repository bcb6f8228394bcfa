use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{JobId, UnitId};
use crate::model::{JobProgress, JobState};

/// Batch generation request for one or more units of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub unit_ids: Vec<UnitId>,
    /// Opaque generation options forwarded verbatim to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

/// Generation submit response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Absent on a 2xx response when the backend completed the work
    /// synchronously; the caller then resyncs instead of polling.
    #[serde(default)]
    pub job_id: Option<JobId>,
}

/// Job status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobState,
    #[serde(default)]
    pub progress: Option<JobProgress>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Artifact refs per unit, present once units complete.
    #[serde(default)]
    pub result_refs: Option<BTreeMap<UnitId, String>>,
}

/// Partial write of one unit's content fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitWriteRequest {
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Full replacement of the document's unit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub unit_ids: Vec<UnitId>,
}
