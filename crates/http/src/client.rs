use async_trait::async_trait;
use pagegen_core::api::{
    JobStatusResponse, ReorderRequest, SubmitRequest, SubmitResponse, UnitWriteRequest,
};
use pagegen_core::error::BackendError;
use pagegen_core::ids::{DocumentId, JobId, UnitId};
use pagegen_core::model::DocumentSnapshot;
use pagegen_engine::GenerationBackend;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

/// [`GenerationBackend`] over the JSON HTTP contract.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// A backend rooted at `base_url` with a default client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// A backend rooted at `base_url` reusing a configured client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Maps a non-success status to the error taxonomy. 404 is `NotFound`;
/// any other failure carries the status and response body.
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::api(status.as_u16(), message))
}

/// Decodes a body against a closed type. Unknown enum strings are a
/// contract violation, not a transport error.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let bytes = response.bytes().await.map_err(BackendError::transport)?;
    serde_json::from_slice(&bytes).map_err(BackendError::invalid)
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn submit_generation(
        &self,
        document_id: &DocumentId,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse, BackendError> {
        let url = self.url(&format!("/documents/{document_id}/generate"));
        tracing::debug!(%url, units = request.unit_ids.len(), "submitting generation");
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(BackendError::transport)?;
        decode(check(response).await?).await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, BackendError> {
        let url = self.url(&format!("/jobs/{job_id}"));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(BackendError::transport)?;
        decode(check(response).await?).await
    }

    async fn fetch_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentSnapshot, BackendError> {
        let url = self.url(&format!("/documents/{document_id}"));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(BackendError::transport)?;
        decode(check(response).await?).await
    }

    async fn update_unit(
        &self,
        document_id: &DocumentId,
        unit_id: &UnitId,
        request: &UnitWriteRequest,
    ) -> Result<(), BackendError> {
        let url = self.url(&format!("/documents/{document_id}/units/{unit_id}"));
        tracing::debug!(%url, fields = request.fields.len(), "writing unit fields");
        let response = self
            .client
            .patch(url)
            .json(request)
            .send()
            .await
            .map_err(BackendError::transport)?;
        check(response).await?;
        Ok(())
    }

    async fn reorder_units(
        &self,
        document_id: &DocumentId,
        request: &ReorderRequest,
    ) -> Result<(), BackendError> {
        let url = self.url(&format!("/documents/{document_id}/unit-order"));
        let response = self
            .client
            .put(url)
            .json(request)
            .send()
            .await
            .map_err(BackendError::transport)?;
        check(response).await?;
        Ok(())
    }
}
