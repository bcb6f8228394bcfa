#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Asynchronous generation-job orchestration and optimistic state sync.
//!
//! [`OrchestratorContext`] owns one document's snapshot and coordinates
//! three flows against a [`GenerationBackend`]: submitting and polling
//! generation jobs (at most one in flight per unit), debounced
//! write-behind of local edits, and server-wins reconciliation that never
//! clobbers unflushed local state.

pub mod backend;
pub mod config;
pub mod memory;

mod buffer;
mod context;
mod events;
mod ledger;
mod poller;
mod reconcile;
mod registry;
mod state;
mod store;

pub use backend::GenerationBackend;
pub use config::EngineConfig;
pub use context::{OrchestratorContext, SubmitOutcome};
pub use events::EngineEvent;
pub use memory::{InMemoryBackend, ScriptedStatus};
pub use reconcile::MergeReport;
