//! GET /health: liveness plus database reachability and job load

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub built_at: &'static str,
    pub profile: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database cannot be queried
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build: BuildInfo,
    pub uptime_seconds: u64,
    /// Queued plus running jobs; absent when the database is unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_jobs: Option<i64>,
    pub event_subscribers: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    let active_jobs = match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'running')",
    )
    .fetch_one(&state.db)
    .await
    {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not query jobs table");
            None
        }
    };

    Json(HealthResponse {
        status: if active_jobs.is_some() { "ok" } else { "degraded" },
        module: "siteplan-expansion",
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        build: BuildInfo {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("GIT_HASH"),
            built_at: env!("BUILD_TIMESTAMP"),
            profile: env!("BUILD_PROFILE"),
        },
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        active_jobs,
        event_subscribers: state.event_bus.subscriber_count(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
