//! Error types for siteplan-expansion
//!
//! [`PipelineError`] is the pipeline failure taxonomy. Only fatal variants
//! end a job as `failed`; the rest become per-candidate demotions or job
//! flags. [`ApiError`] is what HTTP handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::JobStatus;

/// Pipeline failure taxonomy
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Boundary data wholly unavailable for the requested region (fatal)
    #[error("Boundary data unavailable for region '{region}': {reason}")]
    BoundaryDataUnavailable { region: String, reason: String },

    /// Job finished short of its target count
    #[error("Insufficient candidates: {survivors} of {target} requested")]
    InsufficientCandidates { survivors: usize, target: usize },

    /// Single AI rationale call failed; the candidate is demoted
    #[error("AI call failed for candidate {candidate_id}: {reason}")]
    AiCallFailed { candidate_id: String, reason: String },

    /// Job cost cap reached; remaining AI tier is demoted
    #[error("Cost cap exceeded: {accumulated:.4} + {requested:.4} > {cap:.4}")]
    CostCapExceeded {
        accumulated: f64,
        requested: f64,
        cap: f64,
    },

    /// AI dispatch stayed rate-limited past the retry budget
    #[error("AI rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Cache write failed (logged only)
    #[error("Cache write failed: {0}")]
    CacheWriteFailed(String),

    /// Job was cancelled
    #[error("Job cancelled")]
    Cancelled,

    /// Invalid job parameters
    #[error("Invalid job parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Common(#[from] siteplan_common::Error),
}

impl PipelineError {
    /// Whether this failure invalidates the whole job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::BoundaryDataUnavailable { .. }
                | PipelineError::InvalidParams(_)
                | PipelineError::Common(_)
        )
    }

    /// Job status this failure implies when it is the most severe condition
    pub fn job_status(&self) -> JobStatus {
        match self {
            PipelineError::BoundaryDataUnavailable { .. }
            | PipelineError::InvalidParams(_)
            | PipelineError::Common(_) => JobStatus::Failed,
            PipelineError::Cancelled => JobStatus::Cancelled,
            PipelineError::InsufficientCandidates { .. } | PipelineError::CacheWriteFailed(_) => {
                JobStatus::Completed
            }
            PipelineError::AiCallFailed { .. }
            | PipelineError::CostCapExceeded { .. }
            | PipelineError::RateLimitExceeded(_) => JobStatus::Partial,
        }
    }

    /// Whether a failed job may be retried without changing its inputs
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Common(err) => !matches!(
                err,
                siteplan_common::Error::InvalidInput(_) | siteplan_common::Error::Config(_)
            ),
            PipelineError::BoundaryDataUnavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Common(siteplan_common::Error::Database(err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. result requested before the job finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Common error: {0}")]
    Common(#[from] siteplan_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Pipeline(ref err) => match err {
                PipelineError::InvalidParams(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_PARAMS", msg.clone())
                }
                PipelineError::BoundaryDataUnavailable { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "BOUNDARY_DATA_UNAVAILABLE",
                    err.to_string(),
                ),
                PipelineError::Common(siteplan_common::Error::NotFound(msg)) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PIPELINE_ERROR",
                    err.to_string(),
                ),
            },
            ApiError::Common(ref err) => match err {
                siteplan_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                siteplan_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
