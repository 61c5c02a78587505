//! Listing management endpoints.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{events, listings};
use crate::error::{AppError, AppResult};
use crate::http::AppState;
use crate::model::{BookingEvent, Listing};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/listings", get(list_listings).post(create_listing))
        .route("/api/listings/:id/events", get(listing_events))
}

#[derive(Serialize)]
pub struct ListingsResponse {
    pub success: bool,
    pub listings: Vec<Listing>,
}

/// GET /api/listings
async fn list_listings(State(state): State<AppState>) -> AppResult<Json<ListingsResponse>> {
    let all = listings::list_listings(&state.pool).await?;
    Ok(Json(ListingsResponse {
        success: true,
        listings: all,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FeedSpec {
    pub source: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub name: String,
    pub timezone: Option<String>,
    #[serde(rename = "defaultCleanerId")]
    pub default_cleaner_id: Option<i64>,
    #[serde(rename = "defaultCleanHours")]
    pub default_clean_hours: Option<f64>,
    #[serde(default)]
    pub feeds: Vec<FeedSpec>,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub success: bool,
    pub id: i64,
}

/// POST /api/listings
async fn create_listing(
    State(state): State<AppState>,
    Json(req): Json<CreateListingRequest>,
) -> AppResult<Json<CreatedResponse>> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name must be non-empty".to_string()));
    }
    for feed in &req.feeds {
        if !feed.url.starts_with("http://") && !feed.url.starts_with("https://") {
            return Err(AppError::Validation(format!(
                "feed url must be http(s): {}",
                feed.url
            )));
        }
        if feed.source.trim().is_empty() {
            return Err(AppError::Validation("feed source must be non-empty".to_string()));
        }
    }

    let id = listings::insert_listing(
        &state.pool,
        req.name.trim(),
        req.timezone.as_deref().unwrap_or("UTC"),
        req.default_cleaner_id,
        req.default_clean_hours.unwrap_or(2.0),
    )
    .await?;

    for feed in &req.feeds {
        listings::add_feed(&state.pool, id, feed.source.trim(), feed.url.trim()).await?;
    }

    Ok(Json(CreatedResponse { success: true, id }))
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub success: bool,
    pub events: Vec<BookingEvent>,
}

/// GET /api/listings/:id/events - active bookings for dashboard rendering.
async fn listing_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<EventsResponse>> {
    listings::get_listing(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("listing {id}")))?;

    let events = events::active_events(&state.pool, id).await?;
    Ok(Json(EventsResponse {
        success: true,
        events,
    }))
}
