use async_trait::async_trait;
use pagegen_core::api::{
    JobStatusResponse, ReorderRequest, SubmitRequest, SubmitResponse, UnitWriteRequest,
};
use pagegen_core::error::BackendError;
use pagegen_core::ids::{DocumentId, JobId, UnitId};
use pagegen_core::model::DocumentSnapshot;

/// The generation-service seam. Production code talks HTTP through
/// `pagegen-http`; tests script an in-memory fake.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts generation for the requested units. A 2xx response without
    /// a job id means the backend finished the work synchronously.
    async fn submit_generation(
        &self,
        document_id: &DocumentId,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse, BackendError>;

    /// Reports the current state of one job.
    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, BackendError>;

    /// Fetches the authoritative document snapshot.
    async fn fetch_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentSnapshot, BackendError>;

    /// Persists a partial update of one unit's content fields.
    async fn update_unit(
        &self,
        document_id: &DocumentId,
        unit_id: &UnitId,
        request: &UnitWriteRequest,
    ) -> Result<(), BackendError>;

    /// Persists a new unit order.
    async fn reorder_units(
        &self,
        document_id: &DocumentId,
        request: &ReorderRequest,
    ) -> Result<(), BackendError>;
}
