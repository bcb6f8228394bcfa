use std::fmt::Display;

use thiserror::Error;

use crate::ids::{JobId, UnitId};

/// Errors crossing the generation-backend boundary.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Connection-level failure: connect, timeout, interrupted body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Document or job does not exist.
    #[error("not found")]
    NotFound,

    /// Response body did not match the wire contract.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Transport-level failure from any displayable cause.
    pub fn transport<E: Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Contract violation from any displayable cause.
    pub fn invalid<E: Display>(e: E) -> Self {
        Self::InvalidResponse(e.to_string())
    }

    /// Non-success HTTP status with the body (or reason) as message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether a poll loop should retry this error instead of giving up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Job submission was rejected; names every unit id that was part of the
/// attempt so callers can unwind exactly those.
#[derive(Debug, Clone, Error)]
#[error("submission rejected for units [{}]: {source}", join_ids(.unit_ids))]
pub struct SubmissionError {
    pub unit_ids: Vec<UnitId>,
    #[source]
    pub source: BackendError,
}

/// Backend reported a job as failed, or contact was lost for good.
#[derive(Debug, Clone, Error)]
#[error("job {job_id} failed for units [{}]: {message}", join_ids(.unit_ids))]
pub struct TerminalJobFailure {
    pub job_id: JobId,
    pub unit_ids: Vec<UnitId>,
    pub message: String,
}

/// Errors surfaced by the public engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("unknown unit id: {0}")]
    UnknownUnit(UnitId),

    #[error("unit {0} has a generation job in flight")]
    UnitBusy(UnitId),
}

fn join_ids(ids: &[UnitId]) -> String {
    ids.iter()
        .map(UnitId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
