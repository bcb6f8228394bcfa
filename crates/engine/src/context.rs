//! The engine facade: one [`OrchestratorContext`] per open document.
//!
//! All shared state sits behind a single async mutex. Critical sections
//! are short and never span a backend call; pollers and debounce timers
//! are plain tokio tasks holding a clone of the context. Per-unit
//! lifecycle ordering (acquire, generating, terminal, release) is total
//! because every transition serializes through the one mutex.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pagegen_core::api::{ReorderRequest, SubmitRequest, UnitWriteRequest};
use pagegen_core::error::{BackendError, EngineError, SubmissionError, TerminalJobFailure};
use pagegen_core::ids::{DocumentId, JobId, UnitId};
use pagegen_core::model::{DocumentSnapshot, JobProgress, UnitStatus};
use pagegen_core::now_ms;
use tokio::sync::{mpsc, watch, Mutex};

use crate::backend::GenerationBackend;
use crate::config::EngineConfig;
use crate::events::{emit, EngineEvent, EVENT_CHANNEL_CAPACITY};
use crate::ledger::ElapsedTimeLedger;
use crate::poller;
use crate::reconcile::{merge_snapshot, merge_unit, MergeReport};
use crate::state::EngineState;
use crate::store::UnitStore;

/// What a batch submission did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The backend accepted the batch; a poller is tracking the job.
    Started {
        job_id: JobId,
        unit_ids: Vec<UnitId>,
    },
    /// The backend finished the work synchronously; nothing to poll.
    CompletedInline,
    /// Every requested unit already had a job in flight. No network call
    /// was made.
    AllBusy,
}

struct EngineInner {
    backend: Arc<dyn GenerationBackend>,
    document_id: DocumentId,
    config: EngineConfig,
    state: Mutex<EngineState>,
    events: mpsc::Sender<EngineEvent>,
    revision_rx: watch::Receiver<u64>,
}

/// Handle to one document's orchestration engine. Cheap to clone; all
/// clones share the same state.
#[derive(Clone)]
pub struct OrchestratorContext {
    inner: Arc<EngineInner>,
}

impl OrchestratorContext {
    /// Builds an engine around a backend and an initial snapshot.
    /// Returns the context and the advisory event stream.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        document_id: DocumentId,
        initial: DocumentSnapshot,
        config: EngineConfig,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (revision_tx, revision_rx) = watch::channel(0);
        let ledger = ElapsedTimeLedger::load(config.ledger_path.clone());
        let store = UnitStore::new(initial, revision_tx);
        let inner = EngineInner {
            backend,
            document_id,
            config,
            state: Mutex::new(EngineState::new(store, ledger)),
            events: events_tx,
            revision_rx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Submits a generation job for the given units.
    ///
    /// Units that already have a job in flight are dropped from the batch
    /// without error. Unknown unit ids reject the whole call before any
    /// state changes. Accepted units flip GENERATING optimistically; if
    /// the backend rejects the submission they are restored, so a failed
    /// submit never strands a unit.
    pub async fn submit_generation(
        &self,
        unit_ids: &[UnitId],
        options: Option<serde_json::Value>,
    ) -> Result<SubmitOutcome, EngineError> {
        let provisional = JobId::new();
        let (accepted, prior) = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;

            // purge ledger entries with neither a unit nor a live job
            let store = &st.store;
            let registry = &st.registry;
            st.ledger.retain(|unit_id| {
                store.snapshot().unit(unit_id).is_some() || registry.is_active(unit_id)
            });

            for unit_id in unit_ids {
                if st.store.snapshot().unit(unit_id).is_none() {
                    return Err(EngineError::UnknownUnit(unit_id.clone()));
                }
            }

            let mut accepted = Vec::new();
            let mut prior = Vec::new();
            for unit_id in unit_ids {
                if !st.registry.try_acquire(unit_id, &provisional) {
                    tracing::debug!(unit_id = %unit_id, "unit already generating, dropped from batch");
                    continue;
                }
                prior.push((
                    unit_id.clone(),
                    st.store.unit_status(unit_id).unwrap_or(UnitStatus::Idle),
                ));
                st.store.set_status(unit_id, UnitStatus::Generating);
                accepted.push(unit_id.clone());
            }
            if accepted.is_empty() {
                return Ok(SubmitOutcome::AllBusy);
            }
            st.store.bump();
            (accepted, prior)
        };

        let request = SubmitRequest {
            unit_ids: accepted.clone(),
            options,
        };
        let response = match self
            .inner
            .backend
            .submit_generation(&self.inner.document_id, &request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let mut guard = self.inner.state.lock().await;
                let st = &mut *guard;
                for (unit_id, status) in prior {
                    st.registry.release(&unit_id);
                    st.store.set_status(&unit_id, status);
                }
                st.store.bump();
                return Err(SubmissionError {
                    unit_ids: accepted,
                    source: e,
                }
                .into());
            }
        };

        match response.job_id {
            None => {
                // synchronous completion; the pull below shows the result
                {
                    let mut guard = self.inner.state.lock().await;
                    let st = &mut *guard;
                    for (unit_id, status) in prior {
                        st.registry.release(&unit_id);
                        st.store.set_status(&unit_id, status);
                    }
                    st.store.bump();
                }
                self.pull_and_merge().await?;
                tracing::info!(units = accepted.len(), "generation completed synchronously");
                Ok(SubmitOutcome::CompletedInline)
            }
            Some(job_id) => {
                {
                    let mut guard = self.inner.state.lock().await;
                    let st = &mut *guard;
                    st.registry.rebind(&provisional, &job_id);
                    let started_at = now_ms();
                    for unit_id in &accepted {
                        st.ledger.record_start(unit_id, started_at);
                    }
                    emit(
                        &self.inner.events,
                        EngineEvent::JobStarted {
                            job_id: job_id.clone(),
                            unit_ids: accepted.clone(),
                        },
                    );
                    let handle = poller::spawn(self.clone(), job_id.clone());
                    st.pollers.insert(job_id.clone(), handle);
                }
                tracing::info!(job_id = %job_id, units = accepted.len(), "generation job started");
                Ok(SubmitOutcome::Started {
                    job_id,
                    unit_ids: accepted,
                })
            }
        }
    }

    /// Applies a field patch locally at once and schedules a debounced
    /// write. Repeated edits within the debounce window coalesce into one
    /// backend call.
    pub async fn enqueue_edit(
        &self,
        unit_id: &UnitId,
        patch: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), EngineError> {
        let debounce = self.inner.config.debounce();
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        if st.store.snapshot().unit(unit_id).is_none() {
            return Err(EngineError::UnknownUnit(unit_id.clone()));
        }
        st.store.apply_content_patch(unit_id, &patch);
        st.store.bump();
        st.buffer.merge_patch(unit_id, patch, now_ms());
        let generation = st.buffer.next_generation();
        let ctx = self.clone();
        let fire_unit = unit_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            ctx.debounce_fire(&fire_unit, generation).await;
        });
        st.buffer.arm_timer(unit_id, generation, handle);
        Ok(())
    }

    /// Writes the unit's pending edit now, cancelling its timer. A no-op
    /// when nothing is pending.
    pub async fn flush_unit(&self, unit_id: &UnitId) -> Result<(), EngineError> {
        let flush = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            st.buffer.disarm_timer(unit_id);
            st.buffer.begin_flush(unit_id)
        };
        match flush {
            Some((fields, epoch)) => Ok(self.flush_fields(unit_id, fields, epoch).await?),
            None => Ok(()),
        }
    }

    /// Writes every pending edit now. All units are attempted; the first
    /// failure is returned after the rest have run.
    pub async fn flush_all(&self) -> Result<(), EngineError> {
        let flushes = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            let mut flushes = Vec::new();
            for unit_id in st.buffer.pending_units() {
                st.buffer.disarm_timer(&unit_id);
                if let Some((fields, epoch)) = st.buffer.begin_flush(&unit_id) {
                    flushes.push((unit_id, fields, epoch));
                }
            }
            flushes
        };
        let mut first_failure = None;
        for (unit_id, fields, epoch) in flushes {
            if let Err(e) = self.flush_fields(&unit_id, fields, epoch).await {
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
        match first_failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Fetches the authoritative document and merges it into local state.
    pub async fn sync_document(&self) -> Result<MergeReport, EngineError> {
        Ok(self.pull_and_merge().await?)
    }

    /// Reorders units optimistically, then persists the order. On backend
    /// rejection the local order is rolled back by a full resync.
    pub async fn reorder_units(&self, order: &[UnitId]) -> Result<(), EngineError> {
        {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            for unit_id in order {
                if st.store.snapshot().unit(unit_id).is_none() {
                    return Err(EngineError::UnknownUnit(unit_id.clone()));
                }
            }
            st.store.reorder(order);
            st.store.bump();
        }
        let request = ReorderRequest {
            unit_ids: order.to_vec(),
        };
        if let Err(e) = self
            .inner
            .backend
            .reorder_units(&self.inner.document_id, &request)
            .await
        {
            tracing::warn!(error = %e, "reorder rejected, restoring server order");
            if let Err(sync_err) = self.pull_and_merge().await {
                tracing::warn!(error = %sync_err, "rollback resync failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Clears a unit's artifact locally and on the backend. Refused while
    /// the unit has a generation job in flight.
    pub async fn clear_artifact(&self, unit_id: &UnitId) -> Result<(), EngineError> {
        {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            if st.store.snapshot().unit(unit_id).is_none() {
                return Err(EngineError::UnknownUnit(unit_id.clone()));
            }
            if st.registry.is_active(unit_id) {
                return Err(EngineError::UnitBusy(unit_id.clone()));
            }
            st.store.clear_artifact(unit_id);
            st.ledger.clear(unit_id);
            st.store.bump();
        }
        let request = UnitWriteRequest {
            fields: BTreeMap::from([("artifact_ref".to_string(), serde_json::Value::Null)]),
        };
        if let Err(e) = self
            .inner
            .backend
            .update_unit(&self.inner.document_id, unit_id, &request)
            .await
        {
            tracing::warn!(unit_id = %unit_id, error = %e, "artifact clear rejected, resyncing unit");
            if let Err(sync_err) = self.resync_unit(unit_id).await {
                tracing::warn!(unit_id = %unit_id, error = %sync_err, "rollback resync failed");
            }
            return Err(e.into());
        }
        if let Err(e) = self.resync_unit(unit_id).await {
            tracing::warn!(unit_id = %unit_id, error = %e, "post-clear resync failed");
        }
        Ok(())
    }

    /// Stops every poller and debounce timer. In-flight backend calls are
    /// dropped at their next await point.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        for (job_id, handle) in st.pollers.drain() {
            tracing::debug!(job_id = %job_id, "aborting poller");
            handle.abort();
        }
        st.buffer.abort_all_timers();
        st.progress.clear();
    }

    /// The document as currently rendered, optimistic local state
    /// included.
    pub async fn document(&self) -> DocumentSnapshot {
        self.inner.state.lock().await.store.snapshot().clone()
    }

    /// Current status of one unit.
    pub async fn unit_status(&self, unit_id: &UnitId) -> Option<UnitStatus> {
        self.inner.state.lock().await.store.unit_status(unit_id)
    }

    /// Whether a generation job currently owns the unit.
    pub async fn is_active(&self, unit_id: &UnitId) -> bool {
        self.inner.state.lock().await.registry.is_active(unit_id)
    }

    /// Every unit with a job in flight, sorted.
    pub async fn active_units(&self) -> Vec<UnitId> {
        self.inner.state.lock().await.registry.active_units()
    }

    /// Units with unflushed local edits, sorted.
    pub async fn pending_edit_units(&self) -> Vec<UnitId> {
        self.inner.state.lock().await.buffer.pending_units()
    }

    /// Whether the unit has an unflushed local edit.
    pub async fn has_pending_edit(&self, unit_id: &UnitId) -> bool {
        self.inner.state.lock().await.buffer.has_pending(unit_id)
    }

    /// Whole seconds since generation started for the unit, if a start
    /// was recorded. Survives a restart when a ledger path is configured.
    pub async fn elapsed_seconds(&self, unit_id: &UnitId) -> Option<i64> {
        self.inner
            .state
            .lock()
            .await
            .ledger
            .elapsed_seconds(unit_id, now_ms())
    }

    /// Latest reported progress for a live job.
    pub async fn job_progress(&self, job_id: &JobId) -> Option<JobProgress> {
        self.inner.state.lock().await.progress.get(job_id).copied()
    }

    /// Local revision counter; bumps once per observable change.
    pub async fn revision(&self) -> u64 {
        self.inner.state.lock().await.store.revision()
    }

    /// Watch channel carrying the revision counter, for re-render loops.
    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.inner.revision_rx.clone()
    }

    /// The document this engine instance is bound to.
    pub fn document_id(&self) -> &DocumentId {
        &self.inner.document_id
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.inner.backend
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.inner.config.poll_interval()
    }

    pub(crate) fn max_poll_failures(&self) -> u32 {
        self.inner.config.max_poll_failures
    }

    /// Body of a fired debounce timer. Claims its timer slot (losing a
    /// cancel/replace race means doing nothing) and flushes the intent.
    pub(crate) async fn debounce_fire(&self, unit_id: &UnitId, generation: u64) {
        let flush = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            if !st.buffer.claim_fire(unit_id, generation) {
                return;
            }
            st.buffer.begin_flush(unit_id)
        };
        let Some((fields, epoch)) = flush else { return };
        if let Err(e) = self.flush_fields(unit_id, fields, epoch).await {
            tracing::warn!(unit_id = %unit_id, error = %e, "debounced edit flush failed");
        }
    }

    /// Sends one snapshot of an intent to the backend. The intent stays
    /// pending while the write is on the wire; it is destroyed afterwards
    /// only if no newer edit advanced its epoch. A rejected write keeps
    /// the intent for the next enqueue or forced flush.
    async fn flush_fields(
        &self,
        unit_id: &UnitId,
        fields: BTreeMap<String, serde_json::Value>,
        epoch: u64,
    ) -> Result<(), BackendError> {
        let request = UnitWriteRequest { fields };
        if let Err(e) = self
            .inner
            .backend
            .update_unit(&self.inner.document_id, unit_id, &request)
            .await
        {
            emit(
                &self.inner.events,
                EngineEvent::EditFlushFailed {
                    unit_id: unit_id.clone(),
                    message: e.to_string(),
                },
            );
            return Err(e);
        }
        let destroyed = {
            let mut guard = self.inner.state.lock().await;
            guard.buffer.finish_flush(unit_id, epoch)
        };
        if !destroyed {
            tracing::debug!(unit_id = %unit_id, "newer edits arrived during flush, intent kept");
        }
        emit(
            &self.inner.events,
            EngineEvent::EditFlushed {
                unit_id: unit_id.clone(),
            },
        );
        // unit-scoped resync so other units' pending edits stay untouched
        if let Err(e) = self.resync_unit(unit_id).await {
            tracing::warn!(unit_id = %unit_id, error = %e, "post-flush resync failed");
        }
        Ok(())
    }

    pub(crate) async fn pull_and_merge(&self) -> Result<MergeReport, BackendError> {
        let server = self
            .inner
            .backend
            .fetch_document(&self.inner.document_id)
            .await?;
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        let report = merge_snapshot(st.store.snapshot_mut(), &server, &st.buffer, &st.registry);
        if report.changed {
            st.store.bump();
        }
        Ok(report)
    }

    pub(crate) async fn resync_unit(&self, unit_id: &UnitId) -> Result<MergeReport, BackendError> {
        let server = self
            .inner
            .backend
            .fetch_document(&self.inner.document_id)
            .await?;
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        let report = merge_unit(
            st.store.snapshot_mut(),
            &server,
            unit_id,
            &st.buffer,
            &st.registry,
        );
        if report.changed {
            st.store.bump();
        }
        Ok(report)
    }

    /// Poll-tick progress report. Emits only when the counters changed.
    pub(crate) async fn record_job_progress(&self, job_id: &JobId, progress: JobProgress) {
        let changed = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            if st.progress.get(job_id) == Some(&progress) {
                false
            } else {
                st.progress.insert(job_id.clone(), progress);
                true
            }
        };
        if changed {
            emit(
                &self.inner.events,
                EngineEvent::JobProgress {
                    job_id: job_id.clone(),
                    progress,
                },
            );
        }
    }

    /// Terminal success. Pulls the authoritative document first (the
    /// units stay pinned GENERATING through that pull), then in one
    /// critical section releases ownership, merges, forces READY on any
    /// unit the server still shows stale, and clears ledger entries.
    pub(crate) async fn finish_job_completed(
        &self,
        job_id: &JobId,
        result_refs: Option<BTreeMap<UnitId, String>>,
    ) {
        let server = match self
            .inner
            .backend
            .fetch_document(&self.inner.document_id)
            .await
        {
            Ok(server) => Some(server),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "final document pull failed, completing from job result");
                None
            }
        };
        let result_refs = result_refs.unwrap_or_default();
        let unit_ids = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            let unit_ids = st.registry.units_owned_by(job_id);
            for unit_id in &unit_ids {
                st.registry.release(unit_id);
            }
            if let Some(server) = &server {
                merge_snapshot(st.store.snapshot_mut(), server, &st.buffer, &st.registry);
            }
            for unit_id in &unit_ids {
                if st.store.unit_status(unit_id) == Some(UnitStatus::Generating) {
                    st.store
                        .mark_ready(unit_id, result_refs.get(unit_id).cloned());
                }
                st.ledger.clear(unit_id);
            }
            st.forget_job(job_id);
            st.store.bump();
            unit_ids
        };
        tracing::info!(job_id = %job_id, units = unit_ids.len(), "generation job completed");
        emit(
            &self.inner.events,
            EngineEvent::JobCompleted {
                job_id: job_id.clone(),
                unit_ids,
            },
        );
    }

    /// Terminal failure (server FAILED, poll giveup, or an unrecognized
    /// status). With `pull_first` the server may still show some units
    /// finished; only units left GENERATING after the merge are failed.
    pub(crate) async fn finish_job_failed(&self, job_id: &JobId, message: &str, pull_first: bool) {
        let server = if pull_first {
            match self
                .inner
                .backend
                .fetch_document(&self.inner.document_id)
                .await
            {
                Ok(server) => Some(server),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "document pull failed while failing job");
                    None
                }
            }
        } else {
            None
        };
        let unit_ids = {
            let mut guard = self.inner.state.lock().await;
            let st = &mut *guard;
            let unit_ids = st.registry.units_owned_by(job_id);
            for unit_id in &unit_ids {
                st.registry.release(unit_id);
            }
            if let Some(server) = &server {
                merge_snapshot(st.store.snapshot_mut(), server, &st.buffer, &st.registry);
            }
            for unit_id in &unit_ids {
                if st.store.unit_status(unit_id) == Some(UnitStatus::Generating) {
                    st.store.set_failed(unit_id, message);
                }
                st.ledger.clear(unit_id);
            }
            st.forget_job(job_id);
            st.store.bump();
            unit_ids
        };
        tracing::warn!(job_id = %job_id, units = unit_ids.len(), reason = message, "generation job failed");
        emit(
            &self.inner.events,
            EngineEvent::JobFailed(TerminalJobFailure {
                job_id: job_id.clone(),
                unit_ids,
                message: message.to_string(),
            }),
        );
    }
}
