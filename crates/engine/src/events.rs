use pagegen_core::error::TerminalJobFailure;
use pagegen_core::ids::{JobId, UnitId};
use pagegen_core::model::JobProgress;
use tokio::sync::mpsc;

/// Emission never blocks; once the receiver lags this far behind, events
/// are dropped.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Advisory notifications pushed to the embedding application.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A generation job was accepted and a poller is tracking it.
    JobStarted {
        job_id: JobId,
        unit_ids: Vec<UnitId>,
    },
    /// Progress counters from a poll tick. Emitted only when they change.
    JobProgress {
        job_id: JobId,
        progress: JobProgress,
    },
    /// The job finished and its units were released.
    JobCompleted {
        job_id: JobId,
        unit_ids: Vec<UnitId>,
    },
    /// The job failed, or contact with the backend was lost for good.
    JobFailed(TerminalJobFailure),
    /// A buffered edit reached the backend.
    EditFlushed { unit_id: UnitId },
    /// A buffered edit write was rejected; the intent stays pending.
    EditFlushFailed { unit_id: UnitId, message: String },
}

/// Non-blocking emit. A closed receiver is the caller's choice; a full
/// channel means the receiver is lagging.
pub(crate) fn emit(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(event = ?event, "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("event channel closed, dropping event");
        }
    }
}
