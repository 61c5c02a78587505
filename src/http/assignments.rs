//! Cleaner and turnover-assignment endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{cleaners, events};
use crate::error::{AppError, AppResult};
use crate::http::AppState;
use crate::model::CleanerAssignment;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/cleaners", post(create_cleaner))
        .route("/api/cleaners/:id/report", get(cleaner_report))
        .route("/api/assignments", get(list_assignments).post(create_assignment))
        .route("/api/assignments/:id/start", post(start_assignment))
        .route("/api/assignments/:id/complete", post(complete_assignment))
}

#[derive(Debug, Deserialize)]
pub struct CreateCleanerRequest {
    pub name: String,
    #[serde(rename = "hourlyRateCents")]
    pub hourly_rate_cents: Option<i64>,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub success: bool,
    pub id: i64,
}

/// POST /api/cleaners
async fn create_cleaner(
    State(state): State<AppState>,
    Json(req): Json<CreateCleanerRequest>,
) -> AppResult<Json<CreatedResponse>> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name must be non-empty".to_string()));
    }
    let rate = req.hourly_rate_cents.unwrap_or(0);
    if rate < 0 {
        return Err(AppError::Validation(
            "hourlyRateCents must be >= 0".to_string(),
        ));
    }

    let id = cleaners::insert_cleaner(&state.pool, req.name.trim(), rate).await?;
    Ok(Json(CreatedResponse { success: true, id }))
}

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentRequest {
    #[serde(rename = "eventId")]
    pub event_id: Option<i64>,
    #[serde(rename = "cleanerId")]
    pub cleaner_id: Option<i64>,
    pub hours: Option<f64>,
}

/// POST /api/assignments
async fn create_assignment(
    State(state): State<AppState>,
    Json(req): Json<CreateAssignmentRequest>,
) -> AppResult<Json<CreatedResponse>> {
    let event_id = req
        .event_id
        .ok_or_else(|| AppError::Validation("eventId is required".to_string()))?;
    let cleaner_id = req
        .cleaner_id
        .ok_or_else(|| AppError::Validation("cleanerId is required".to_string()))?;
    let hours = req
        .hours
        .ok_or_else(|| AppError::Validation("hours is required".to_string()))?;
    if hours <= 0.0 {
        return Err(AppError::Validation("hours must be > 0".to_string()));
    }

    events::get_event(&state.pool, event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id}")))?;
    cleaners::get_cleaner(&state.pool, cleaner_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("cleaner {cleaner_id}")))?;

    let id = cleaners::insert_assignment(&state.pool, event_id, cleaner_id, hours).await?;
    Ok(Json(CreatedResponse { success: true, id }))
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub success: bool,
    pub assignment: CleanerAssignment,
}

/// POST /api/assignments/:id/start
async fn start_assignment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AssignmentResponse>> {
    cleaners::get_assignment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("assignment {id}")))?;

    if !cleaners::start_assignment(&state.pool, id).await? {
        return Err(AppError::Conflict(
            "assignment is not in scheduled state".to_string(),
        ));
    }

    let assignment = cleaners::get_assignment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("assignment {id}")))?;
    Ok(Json(AssignmentResponse {
        success: true,
        assignment,
    }))
}

/// POST /api/assignments/:id/complete
async fn complete_assignment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AssignmentResponse>> {
    cleaners::get_assignment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("assignment {id}")))?;

    if !cleaners::complete_assignment(&state.pool, id).await? {
        return Err(AppError::Conflict(
            "assignment is not in progress".to_string(),
        ));
    }

    let assignment = cleaners::get_assignment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("assignment {id}")))?;
    Ok(Json(AssignmentResponse {
        success: true,
        assignment,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AssignmentFilter {
    #[serde(rename = "cleanerId")]
    pub cleaner_id: Option<i64>,
    #[serde(rename = "listingId")]
    pub listing_id: Option<i64>,
}

#[derive(Serialize)]
pub struct AssignmentsResponse {
    pub success: bool,
    pub assignments: Vec<CleanerAssignment>,
}

/// GET /api/assignments?cleanerId=&listingId=
async fn list_assignments(
    State(state): State<AppState>,
    Query(filter): Query<AssignmentFilter>,
) -> AppResult<Json<AssignmentsResponse>> {
    let assignments =
        cleaners::list_assignments(&state.pool, filter.cleaner_id, filter.listing_id).await?;
    Ok(Json(AssignmentsResponse {
        success: true,
        assignments,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct ReportResponse {
    pub success: bool,
    pub hours: f64,
    #[serde(rename = "amountCents")]
    pub amount_cents: i64,
}

/// GET /api/cleaners/:id/report?from=&to= - completed hours and pay.
async fn cleaner_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<ReportParams>,
) -> AppResult<Json<ReportResponse>> {
    let from = params
        .from
        .ok_or_else(|| AppError::Validation("from date is required".to_string()))?;
    let to = params
        .to
        .ok_or_else(|| AppError::Validation("to date is required".to_string()))?;
    if from > to {
        return Err(AppError::Validation("from must not be after to".to_string()));
    }

    cleaners::get_cleaner(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("cleaner {id}")))?;

    let (hours, amount_cents) = cleaners::hours_report(&state.pool, id, from, to).await?;
    Ok(Json(ReportResponse {
        success: true,
        hours,
        amount_cents,
    }))
}
