//! Job API handlers
//!
//! POST /jobs, GET /jobs/{id}, GET /jobs/{id}/result, POST /jobs/{id}/cancel,
//! POST /jobs/{id}/retry, POST /jobs/{id}/suggestions/{candidate_id}/promote

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{ExclusionSite, Job, JobFlag, JobParams, JobProgress, JobResult, JobStatus};
use crate::services::{ResultAvailability, RetryOutcome, SubmitRequest};
use crate::AppState;

/// POST /jobs response
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// False when an active job with the same idempotency key was returned
    pub created: bool,
}

/// GET /jobs/{id} response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub partial_results_available: bool,
    pub params: JobParams,
    pub cost_accumulated: f64,
    pub demoted_count: usize,
    pub flags: Vec<JobFlag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            partial_results_available: job.partial_results_available,
            params: job.params,
            cost_accumulated: job.cost_accumulated,
            demoted_count: job.demoted_count,
            flags: job.flags,
            error: job.error,
            retryable: job.retryable,
            idempotency_key: job.idempotency_key,
            created_at: job.created_at,
            started_at: job.started_at,
            updated_at: job.updated_at,
            ended_at: job.ended_at,
        }
    }
}

/// GET /jobs/{id}/result response
#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    /// True while the job is still running; rationale is deterministic only
    pub provisional: bool,
    #[serde(flatten)]
    pub result: JobResult,
}

/// POST /jobs/{id}/suggestions/{candidate_id}/promote response
#[derive(Debug, Serialize)]
pub struct PromoteResponse {
    pub site: ExclusionSite,
    pub created: bool,
}

/// POST /jobs
///
/// 202 Accepted for a new job, 200 OK when an active job with the same
/// idempotency key already exists.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let outcome = state.orchestrator.submit(request).await?;

    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SubmitJobResponse {
            job_id: outcome.job.job_id,
            status: outcome.job.status,
            created: outcome.created,
        }),
    ))
}

/// GET /jobs/{id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.orchestrator.status(job_id).await?;
    tracing::debug!(job_id = %job_id, status = job.status.as_str(), "Status query");
    Ok(Json(job.into()))
}

/// GET /jobs/{id}/result
///
/// 409 Conflict until survivors exist.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResultResponse>> {
    match state.orchestrator.result(job_id).await? {
        ResultAvailability::Final(result) => Ok(Json(JobResultResponse {
            provisional: false,
            result,
        })),
        ResultAvailability::Provisional(result) => Ok(Json(JobResultResponse {
            provisional: true,
            result,
        })),
        ResultAvailability::NotReady(job) => Err(ApiError::Conflict(format!(
            "No results for job {} (status {}, stage {})",
            job_id,
            job.status.as_str(),
            job.progress.stage.as_str()
        ))),
    }
}

/// POST /jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.orchestrator.cancel(job_id).await?;
    Ok(Json(job.into()))
}

/// POST /jobs/{id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobStatusResponse>)> {
    match state.orchestrator.retry(job_id).await? {
        RetryOutcome::Requeued(job) => Ok((StatusCode::ACCEPTED, Json(job.into()))),
        RetryOutcome::NotRetryable(job) => Err(ApiError::Conflict(format!(
            "Job {} is {} and not retryable",
            job_id,
            job.status.as_str()
        ))),
        RetryOutcome::KeyInUse(active) => Err(ApiError::Conflict(format!(
            "Idempotency key is held by active job {}",
            active.job_id
        ))),
    }
}

/// POST /jobs/{id}/suggestions/{candidate_id}/promote
pub async fn promote_suggestion(
    State(state): State<AppState>,
    Path((job_id, candidate_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<PromoteResponse>> {
    let outcome = state.orchestrator.promote(job_id, &candidate_id).await?;
    Ok(Json(PromoteResponse {
        site: outcome.site,
        created: outcome.created,
    }))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/jobs/:job_id/result", get(get_job_result))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/retry", post(retry_job))
        .route(
            "/jobs/:job_id/suggestions/:candidate_id/promote",
            post(promote_suggestion),
        )
}
