//! One poll task per generation job.

use pagegen_core::api::JobStatusResponse;
use pagegen_core::error::BackendError;
use pagegen_core::ids::JobId;
use pagegen_core::model::JobState;
use tokio::task::JoinHandle;

use crate::context::OrchestratorContext;

/// Polls the job until it reaches a terminal state. Transport errors are
/// retried on the same cadence; after `max_poll_failures` in a row the
/// job is failed so its units never stay GENERATING forever.
pub(crate) fn spawn(ctx: OrchestratorContext, job_id: JobId) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ctx.poll_interval());
        let mut consecutive_failures: u32 = 0;
        loop {
            ticker.tick().await;
            match ctx.backend().job_status(&job_id).await {
                Ok(response) => {
                    consecutive_failures = 0;
                    if handle_status(&ctx, &job_id, response).await {
                        break;
                    }
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        consecutive_failures,
                        "status poll failed, will retry"
                    );
                    if consecutive_failures >= ctx.max_poll_failures() {
                        ctx.finish_job_failed(
                            &job_id,
                            &format!("lost contact with the generation service: {e}"),
                            false,
                        )
                        .await;
                        break;
                    }
                }
                Err(e) => {
                    // not retriable; this client cannot track the job any
                    // further, whatever the server believes
                    tracing::warn!(job_id = %job_id, error = %e, "status poll rejected, failing job");
                    ctx.finish_job_failed(&job_id, &give_up_message(&e), true)
                        .await;
                    break;
                }
            }
        }
    })
}

/// Returns true once the job is terminal and fully handled.
async fn handle_status(
    ctx: &OrchestratorContext,
    job_id: &JobId,
    response: JobStatusResponse,
) -> bool {
    match response.status {
        JobState::Pending | JobState::Processing => {
            if let Some(progress) = response.progress {
                ctx.record_job_progress(job_id, progress).await;
            }
            // mid-job pull: batch units that finish early surface their
            // artifacts before the job itself completes
            if let Err(e) = ctx.pull_and_merge().await {
                tracing::warn!(job_id = %job_id, error = %e, "mid-job document pull failed");
            }
            false
        }
        JobState::Completed => {
            ctx.finish_job_completed(job_id, response.result_refs).await;
            true
        }
        JobState::Failed => {
            let message = response
                .error_message
                .unwrap_or_else(|| "generation failed".to_string());
            ctx.finish_job_failed(job_id, &message, false).await;
            true
        }
    }
}

fn give_up_message(error: &BackendError) -> String {
    match error {
        BackendError::InvalidResponse(_) => {
            "unrecognized job status from the generation service".to_string()
        }
        BackendError::NotFound => "generation job no longer exists".to_string(),
        other => format!("generation service rejected the status check: {other}"),
    }
}
