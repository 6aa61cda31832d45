//! Site registry API
//!
//! GET /regions/{region_key}/sites lists existing and planned sites.
//! POST /regions/{region_key}/sites registers operating stores.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{ExclusionSite, GeoPoint, SiteKind};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StoreLocation {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterStoresRequest {
    pub stores: Vec<StoreLocation>,
}

#[derive(Debug, Serialize)]
pub struct RegisterStoresResponse {
    pub registered: usize,
    /// Ids already present in the registry
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SiteListResponse {
    pub region_key: String,
    pub sites: Vec<ExclusionSite>,
}

/// GET /regions/{region_key}/sites
pub async fn list_sites(
    State(state): State<AppState>,
    Path(region_key): Path<String>,
) -> ApiResult<Json<SiteListResponse>> {
    let sites = db::sites::list_sites(&state.db, &region_key).await?;
    Ok(Json(SiteListResponse { region_key, sites }))
}

/// POST /regions/{region_key}/sites
pub async fn register_stores(
    State(state): State<AppState>,
    Path(region_key): Path<String>,
    Json(request): Json<RegisterStoresRequest>,
) -> ApiResult<Json<RegisterStoresResponse>> {
    if let Some(bad) = request
        .stores
        .iter()
        .find(|s| s.id.trim().is_empty() || !(-90.0..=90.0).contains(&s.lat) || !(-180.0..=180.0).contains(&s.lng))
    {
        return Err(ApiError::BadRequest(format!(
            "Invalid store '{}' at ({}, {})",
            bad.id, bad.lat, bad.lng
        )));
    }

    let lock_wait_ms = state.orchestrator.config().jobs.db_lock_wait_ms;
    let mut registered = 0;
    let mut skipped = Vec::new();
    for store in request.stores {
        let site = ExclusionSite {
            id: store.id,
            location: GeoPoint::new(store.lat, store.lng),
            kind: SiteKind::Existing,
        };
        if db::sites::add_site(&state.db, &region_key, &site, None, lock_wait_ms).await? {
            registered += 1;
        } else {
            skipped.push(site.id);
        }
    }

    tracing::info!(region = %region_key, registered, skipped = skipped.len(), "Stores registered");
    Ok(Json(RegisterStoresResponse {
        registered,
        skipped,
    }))
}

pub fn site_routes() -> Router<AppState> {
    Router::new().route(
        "/regions/:region_key/sites",
        get(list_sites).post(register_stores),
    )
}
