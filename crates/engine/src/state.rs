//! Mutable engine state, guarded by one async mutex.
//!
//! Everything that must change together lives here so a single lock
//! acquisition keeps ownership, buffered edits, the ledger, and the local
//! snapshot consistent. Critical sections stay short; the lock is never
//! held across a backend call.

use std::collections::HashMap;

use pagegen_core::ids::JobId;
use pagegen_core::model::JobProgress;
use tokio::task::JoinHandle;

use crate::buffer::EditBuffer;
use crate::ledger::ElapsedTimeLedger;
use crate::registry::JobRegistry;
use crate::store::UnitStore;

pub(crate) struct EngineState {
    pub(crate) store: UnitStore,
    pub(crate) registry: JobRegistry,
    pub(crate) buffer: EditBuffer,
    pub(crate) ledger: ElapsedTimeLedger,
    /// Latest reported progress per live job.
    pub(crate) progress: HashMap<JobId, JobProgress>,
    /// Poll tasks per live job, aborted on shutdown.
    pub(crate) pollers: HashMap<JobId, JoinHandle<()>>,
}

impl EngineState {
    pub(crate) fn new(store: UnitStore, ledger: ElapsedTimeLedger) -> Self {
        Self {
            store,
            registry: JobRegistry::default(),
            buffer: EditBuffer::default(),
            ledger,
            progress: HashMap::new(),
            pollers: HashMap::new(),
        }
    }

    /// Drops all bookkeeping for a finished job. The poller entry is
    /// removed without aborting; the poll task is the caller.
    pub(crate) fn forget_job(&mut self, job_id: &JobId) {
        self.progress.remove(job_id);
        self.pollers.remove(job_id);
    }
}
