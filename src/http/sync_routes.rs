//! Sync trigger and session endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::sessions;
use crate::error::{AppError, AppResult};
use crate::http::AppState;
use crate::model::{SyncStats, SyncStatus, SyncType};
use crate::sync;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sync", post(sync_all))
        .route("/api/sync/cron", get(sync_cron))
        .route("/api/sync/listing", post(sync_listing))
        .route("/api/sync/sessions/:id", get(get_session))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncAllRequest {
    pub source: Option<String>,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub status: SyncStatus,
    pub stats: SyncStats,
}

/// POST /api/sync - reconcile every listing.
///
/// Always 200 with a summary once any listing was attempted; per-listing
/// failures show up in `stats.total_errors` and a `partial` status.
async fn sync_all(
    State(state): State<AppState>,
    body: Option<Json<SyncAllRequest>>,
) -> AppResult<Json<SyncResponse>> {
    let source = body
        .and_then(|Json(req)| req.source)
        .unwrap_or_else(|| "manual".to_string());

    run_all_as(&state, &source).await
}

#[derive(Debug, Deserialize)]
pub struct CronParams {
    pub cron: Option<String>,
}

/// GET /api/sync/cron?cron=true - scheduler entry point; delegates to the
/// POST path with a `cron` trigger label.
async fn sync_cron(
    State(state): State<AppState>,
    Query(params): Query<CronParams>,
) -> AppResult<Json<SyncResponse>> {
    if params.cron.as_deref() != Some("true") {
        return Err(AppError::Validation(
            "cron=true query flag is required".to_string(),
        ));
    }

    run_all_as(&state, "cron").await
}

async fn run_all_as(state: &AppState, source: &str) -> AppResult<Json<SyncResponse>> {
    let outcome = sync::run_all(
        &state.pool,
        state.feed_source.as_ref(),
        state.notifier.as_ref(),
        &state.cfg,
        source,
    )
    .await?;

    Ok(Json(SyncResponse {
        success: true,
        session_id: outcome.session_id,
        status: outcome.status,
        stats: outcome.stats,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SyncListingRequest {
    #[serde(rename = "listingId")]
    pub listing_id: Option<i64>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "syncType")]
    pub sync_type: Option<String>,
}

/// POST /api/sync/listing - reconcile one listing, optionally contributing
/// to an existing session.
async fn sync_listing(
    State(state): State<AppState>,
    body: Option<Json<SyncListingRequest>>,
) -> AppResult<Json<SyncResponse>> {
    let Some(Json(req)) = body else {
        return Err(AppError::Validation("request body is required".to_string()));
    };
    let listing_id = req
        .listing_id
        .ok_or_else(|| AppError::Validation("listingId is required".to_string()))?;

    let sync_type = match req.sync_type.as_deref() {
        None => SyncType::SingleListing,
        Some(raw) => SyncType::parse_type(raw)
            .ok_or_else(|| AppError::Validation(format!("unknown syncType: {raw}")))?,
    };

    let outcome = sync::run_single(
        &state.pool,
        state.feed_source.as_ref(),
        state.notifier.as_ref(),
        &state.cfg,
        listing_id,
        req.session_id.as_deref(),
        sync_type,
        "manual",
    )
    .await?;

    Ok(Json(SyncResponse {
        success: true,
        session_id: outcome.session_id,
        status: outcome.status,
        stats: outcome.stats,
    }))
}

/// GET /api/sync/sessions/:id - session status and live counters.
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SyncResponse>> {
    let session = sessions::get(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;

    Ok(Json(SyncResponse {
        success: true,
        session_id: session.id,
        status: session.status,
        stats: session.stats,
    }))
}
