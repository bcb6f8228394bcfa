//! Scripted in-memory backend for tests and local demos.
//!
//! Behaves like a small generation service: submissions mint a job id and
//! mark the requested units GENERATING; each status poll serves the next
//! scripted step for that job and mutates the served document the way the
//! real service would (COMPLETED marks units READY with artifact refs,
//! FAILED records the error message).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pagegen_core::api::{
    JobStatusResponse, ReorderRequest, SubmitRequest, SubmitResponse, UnitWriteRequest,
};
use pagegen_core::error::BackendError;
use pagegen_core::ids::{DocumentId, JobId, UnitId};
use pagegen_core::model::{DocumentSnapshot, JobProgress, JobState, UnitStatus};
use pagegen_core::{new_ulid, now_ms};

use crate::backend::GenerationBackend;

/// One scripted answer for a job-status poll.
#[derive(Debug, Clone)]
pub enum ScriptedStatus {
    /// Serve this response, applying its side effects to the document.
    Status(JobStatusResponse),
    /// Fail the poll with this error.
    Error(BackendError),
}

impl ScriptedStatus {
    /// PENDING with progress counters.
    pub fn pending(total: u32, completed: u32) -> Self {
        Self::in_flight(JobState::Pending, total, completed)
    }

    /// PROCESSING with progress counters. Units counted as completed flip
    /// READY in the served document, so mid-job pulls see partial results.
    pub fn processing(total: u32, completed: u32) -> Self {
        Self::in_flight(JobState::Processing, total, completed)
    }

    fn in_flight(state: JobState, total: u32, completed: u32) -> Self {
        Self::Status(JobStatusResponse {
            status: state,
            progress: Some(JobProgress { total, completed }),
            error_message: None,
            result_refs: None,
        })
    }

    /// COMPLETED; result refs are filled in per owned unit when served.
    pub fn completed() -> Self {
        Self::Status(JobStatusResponse {
            status: JobState::Completed,
            progress: None,
            error_message: None,
            result_refs: None,
        })
    }

    /// FAILED with the given message.
    pub fn failed(message: &str) -> Self {
        Self::Status(JobStatusResponse {
            status: JobState::Failed,
            progress: None,
            error_message: Some(message.to_string()),
            result_refs: None,
        })
    }

    /// A connection-level failure, retriable by the poller.
    pub fn transport() -> Self {
        Self::Error(BackendError::transport("connection refused"))
    }

    /// A payload outside the wire contract, terminal for the poller.
    pub fn malformed() -> Self {
        Self::Error(BackendError::invalid("unrecognized status string"))
    }
}

struct ScriptedJob {
    unit_ids: Vec<UnitId>,
    script: VecDeque<ScriptedStatus>,
    /// Repeated once the script runs dry, so an extra tick is harmless.
    last: Option<ScriptedStatus>,
}

struct Inner {
    document: DocumentSnapshot,
    jobs: HashMap<JobId, ScriptedJob>,
    queued_scripts: VecDeque<Vec<ScriptedStatus>>,
    inline_completion: bool,
    fail_next_submit: Option<BackendError>,
    fail_next_update: Option<BackendError>,
    fail_next_fetch: Option<BackendError>,
    fail_next_reorder: Option<BackendError>,
    update_delay: Duration,
    submit_calls: Vec<SubmitRequest>,
    update_calls: Vec<(UnitId, UnitWriteRequest)>,
    reorder_calls: Vec<Vec<UnitId>>,
    fetch_count: usize,
}

/// In-memory [`GenerationBackend`] with scripted poll responses and
/// failure injection.
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl InMemoryBackend {
    /// Serves the given document.
    pub fn new(document: DocumentSnapshot) -> Self {
        Self {
            inner: Mutex::new(Inner {
                document,
                jobs: HashMap::new(),
                queued_scripts: VecDeque::new(),
                inline_completion: false,
                fail_next_submit: None,
                fail_next_update: None,
                fail_next_fetch: None,
                fail_next_reorder: None,
                update_delay: Duration::ZERO,
                submit_calls: Vec::new(),
                update_calls: Vec::new(),
                reorder_calls: Vec::new(),
                fetch_count: 0,
            }),
        }
    }

    /// Queues the poll script for the next submitted job. Jobs without a
    /// queued script complete on their first poll.
    pub fn queue_job_script(&self, script: Vec<ScriptedStatus>) {
        self.inner.lock().unwrap().queued_scripts.push_back(script);
    }

    /// When enabled, submissions finish synchronously: units flip READY
    /// at once and no job id is returned.
    pub fn complete_inline(&self, enabled: bool) {
        self.inner.lock().unwrap().inline_completion = enabled;
    }

    /// Rejects the next submission with this error.
    pub fn fail_next_submit(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_submit = Some(error);
    }

    /// Rejects the next unit write with this error.
    pub fn fail_next_update(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_update = Some(error);
    }

    /// Rejects the next document fetch with this error.
    pub fn fail_next_fetch(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_fetch = Some(error);
    }

    /// Rejects the next reorder with this error.
    pub fn fail_next_reorder(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_reorder = Some(error);
    }

    /// Makes unit writes sleep before applying, to widen the in-flight
    /// window under a paused test clock.
    pub fn set_update_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().update_delay = delay;
    }

    /// Server-side content write, as if another client had edited.
    pub fn set_server_field(&self, unit_id: &UnitId, key: &str, value: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(unit) = inner.document.unit_mut(unit_id) {
            unit.content.insert(key.to_string(), value);
            unit.updated_at_ms = now_ms();
        }
    }

    /// Deletes a unit server-side.
    pub fn remove_server_unit(&self, unit_id: &UnitId) {
        let mut inner = self.inner.lock().unwrap();
        inner.document.units.retain(|u| &u.id != unit_id);
        inner.document.updated_at_ms = now_ms();
    }

    /// The document as the backend currently serves it.
    pub fn document(&self) -> DocumentSnapshot {
        self.inner.lock().unwrap().document.clone()
    }

    /// How many submissions reached the backend.
    pub fn submit_count(&self) -> usize {
        self.inner.lock().unwrap().submit_calls.len()
    }

    /// How many unit writes were attempted (including rejected ones).
    pub fn update_count(&self) -> usize {
        self.inner.lock().unwrap().update_calls.len()
    }

    /// Write attempts for one unit, oldest first.
    pub fn update_calls_for(&self, unit_id: &UnitId) -> Vec<UnitWriteRequest> {
        self.inner
            .lock()
            .unwrap()
            .update_calls
            .iter()
            .filter_map(|(id, request)| (id == unit_id).then(|| request.clone()))
            .collect()
    }

    /// How many document fetches were served or rejected.
    pub fn fetch_count(&self) -> usize {
        self.inner.lock().unwrap().fetch_count
    }

    /// The most recent persisted unit order, if any.
    pub fn last_reorder(&self) -> Option<Vec<UnitId>> {
        self.inner.lock().unwrap().reorder_calls.last().cloned()
    }
}

impl Inner {
    fn apply_side_effects(&mut self, job_id: &JobId, response: &mut JobStatusResponse) {
        let Some(unit_ids) = self.jobs.get(job_id).map(|j| j.unit_ids.clone()) else {
            return;
        };
        match response.status {
            JobState::Completed => {
                let mut refs = response.result_refs.take().unwrap_or_default();
                for unit_id in &unit_ids {
                    let artifact = refs
                        .entry(unit_id.clone())
                        .or_insert_with(|| format!("art://{unit_id}.png"))
                        .clone();
                    if let Some(unit) = self.document.unit_mut(unit_id) {
                        unit.status = UnitStatus::Ready;
                        unit.artifact_ref = Some(artifact);
                        unit.error_message = None;
                        unit.updated_at_ms = now_ms();
                    }
                }
                response.result_refs = Some(refs);
                self.document.updated_at_ms = now_ms();
            }
            JobState::Failed => {
                let message = response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string());
                for unit_id in &unit_ids {
                    if let Some(unit) = self.document.unit_mut(unit_id) {
                        unit.status = UnitStatus::Failed;
                        unit.error_message = Some(message.clone());
                        unit.updated_at_ms = now_ms();
                    }
                }
                self.document.updated_at_ms = now_ms();
            }
            JobState::Pending | JobState::Processing => {
                // progressive completion: the first n units flip READY
                if let Some(progress) = response.progress {
                    for unit_id in unit_ids.iter().take(progress.completed as usize) {
                        if let Some(unit) = self.document.unit_mut(unit_id) {
                            if unit.status == UnitStatus::Generating {
                                unit.status = UnitStatus::Ready;
                                unit.artifact_ref = Some(format!("art://{unit_id}.png"));
                                unit.updated_at_ms = now_ms();
                            }
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for InMemoryBackend {
    async fn submit_generation(
        &self,
        document_id: &DocumentId,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.submit_calls.push(request.clone());
        if let Some(error) = inner.fail_next_submit.take() {
            return Err(error);
        }
        if &inner.document.id != document_id {
            return Err(BackendError::NotFound);
        }
        for unit_id in &request.unit_ids {
            if inner.document.unit(unit_id).is_none() {
                return Err(BackendError::NotFound);
            }
        }
        if inner.inline_completion {
            for unit_id in &request.unit_ids {
                if let Some(unit) = inner.document.unit_mut(unit_id) {
                    unit.status = UnitStatus::Ready;
                    unit.artifact_ref = Some(format!("art://{unit_id}.png"));
                    unit.error_message = None;
                    unit.updated_at_ms = now_ms();
                }
            }
            return Ok(SubmitResponse { job_id: None });
        }
        for unit_id in &request.unit_ids {
            if let Some(unit) = inner.document.unit_mut(unit_id) {
                unit.status = UnitStatus::Generating;
                unit.error_message = None;
                unit.updated_at_ms = now_ms();
            }
        }
        let job_id = JobId::from_str(new_ulid().to_string());
        let script = inner
            .queued_scripts
            .pop_front()
            .unwrap_or_else(|| vec![ScriptedStatus::completed()]);
        inner.jobs.insert(
            job_id.clone(),
            ScriptedJob {
                unit_ids: request.unit_ids.clone(),
                script: script.into(),
                last: None,
            },
        );
        Ok(SubmitResponse {
            job_id: Some(job_id),
        })
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        let step = {
            let Some(job) = inner.jobs.get_mut(job_id) else {
                return Err(BackendError::NotFound);
            };
            let step = job
                .script
                .pop_front()
                .or_else(|| job.last.clone())
                .unwrap_or_else(ScriptedStatus::completed);
            job.last = Some(step.clone());
            step
        };
        match step {
            ScriptedStatus::Error(error) => Err(error),
            ScriptedStatus::Status(mut response) => {
                inner.apply_side_effects(job_id, &mut response);
                Ok(response)
            }
        }
    }

    async fn fetch_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentSnapshot, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetch_count += 1;
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(error);
        }
        if &inner.document.id != document_id {
            return Err(BackendError::NotFound);
        }
        Ok(inner.document.clone())
    }

    async fn update_unit(
        &self,
        document_id: &DocumentId,
        unit_id: &UnitId,
        request: &UnitWriteRequest,
    ) -> Result<(), BackendError> {
        let delay = self.inner.lock().unwrap().update_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .update_calls
            .push((unit_id.clone(), request.clone()));
        if let Some(error) = inner.fail_next_update.take() {
            return Err(error);
        }
        if &inner.document.id != document_id {
            return Err(BackendError::NotFound);
        }
        let Some(unit) = inner.document.unit_mut(unit_id) else {
            return Err(BackendError::NotFound);
        };
        for (key, value) in &request.fields {
            // artifact_ref rides the same field map; null clears it
            if key == "artifact_ref" {
                unit.artifact_ref = value.as_str().map(str::to_string);
            } else {
                unit.content.insert(key.clone(), value.clone());
            }
        }
        unit.updated_at_ms = now_ms();
        inner.document.updated_at_ms = now_ms();
        Ok(())
    }

    async fn reorder_units(
        &self,
        document_id: &DocumentId,
        request: &ReorderRequest,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reorder_calls.push(request.unit_ids.clone());
        if let Some(error) = inner.fail_next_reorder.take() {
            return Err(error);
        }
        if &inner.document.id != document_id {
            return Err(BackendError::NotFound);
        }
        let mut reordered = Vec::with_capacity(inner.document.units.len());
        for unit_id in &request.unit_ids {
            if let Some(pos) = inner.document.units.iter().position(|u| &u.id == unit_id) {
                reordered.push(inner.document.units.remove(pos));
            }
        }
        let mut rest = std::mem::take(&mut inner.document.units);
        reordered.append(&mut rest);
        inner.document.units = reordered;
        inner.document.updated_at_ms = now_ms();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pagegen_core::model::Unit;

    use super::*;

    fn doc() -> DocumentSnapshot {
        let mut snapshot = DocumentSnapshot::new(DocumentId::from_str("d1"), "doc");
        snapshot.units.push(Unit::new(UnitId::from_str("u1")));
        snapshot.units.push(Unit::new(UnitId::from_str("u2")));
        snapshot
    }

    fn submit(units: &[&str]) -> SubmitRequest {
        SubmitRequest {
            unit_ids: units.iter().map(|u| UnitId::from_str(*u)).collect(),
            options: None,
        }
    }

    #[tokio::test]
    async fn test_submit_mints_job_and_marks_generating() {
        let backend = InMemoryBackend::new(doc());
        let response = backend
            .submit_generation(&DocumentId::from_str("d1"), &submit(&["u1"]))
            .await
            .unwrap();
        assert!(response.job_id.is_some());
        let served = backend.document();
        assert_eq!(
            served.unit(&UnitId::from_str("u1")).unwrap().status,
            UnitStatus::Generating
        );
        assert_eq!(
            served.unit(&UnitId::from_str("u2")).unwrap().status,
            UnitStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_completed_poll_updates_served_document() {
        let backend = InMemoryBackend::new(doc());
        backend.queue_job_script(vec![ScriptedStatus::completed()]);
        let job_id = backend
            .submit_generation(&DocumentId::from_str("d1"), &submit(&["u1"]))
            .await
            .unwrap()
            .job_id
            .unwrap();

        let status = backend.job_status(&job_id).await.unwrap();
        assert_eq!(status.status, JobState::Completed);
        let refs = status.result_refs.unwrap();
        assert_eq!(refs[&UnitId::from_str("u1")], "art://u1.png");

        let unit_id = UnitId::from_str("u1");
        let served = backend.document();
        assert_eq!(served.unit(&unit_id).unwrap().status, UnitStatus::Ready);
        assert_eq!(
            served.unit(&unit_id).unwrap().artifact_ref.as_deref(),
            Some("art://u1.png")
        );
    }

    #[tokio::test]
    async fn test_script_exhaustion_repeats_last_step() {
        let backend = InMemoryBackend::new(doc());
        backend.queue_job_script(vec![ScriptedStatus::failed("boom")]);
        let job_id = backend
            .submit_generation(&DocumentId::from_str("d1"), &submit(&["u1"]))
            .await
            .unwrap()
            .job_id
            .unwrap();

        let first = backend.job_status(&job_id).await.unwrap();
        let second = backend.job_status(&job_id).await.unwrap();
        assert_eq!(first.status, JobState::Failed);
        assert_eq!(second.status, JobState::Failed);
        assert_eq!(second.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_update_patches_fields_and_null_clears_artifact() {
        let backend = InMemoryBackend::new(doc());
        let document_id = DocumentId::from_str("d1");
        let unit_id = UnitId::from_str("u1");
        backend.set_server_field(&unit_id, "title", serde_json::json!("old"));

        let write = UnitWriteRequest {
            fields: [
                ("title".to_string(), serde_json::json!("new")),
                ("artifact_ref".to_string(), serde_json::Value::Null),
            ]
            .into_iter()
            .collect(),
        };
        backend
            .update_unit(&document_id, &unit_id, &write)
            .await
            .unwrap();

        let served = backend.document();
        let unit = served.unit(&unit_id).unwrap();
        assert_eq!(unit.content["title"], serde_json::json!("new"));
        assert_eq!(unit.artifact_ref, None);
        assert_eq!(backend.update_calls_for(&unit_id).len(), 1);
    }
}
