//! Repository for cleaners and turnover assignments.
//!
//! Assignments move `scheduled -> in_progress -> completed`, or `cancelled`
//! before completion. Transitions are guarded in SQL; a guard miss reports
//! `false` rather than erroring so callers can map it to a 404/409 as fits.

use crate::model::{AssignmentStatus, Cleaner, CleanerAssignment};
use chrono::{NaiveDate, Utc};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::instrument;

use super::Pool;

fn assignment_from_row(row: &SqliteRow) -> CleanerAssignment {
    let status: String = row.get("status");
    CleanerAssignment {
        id: row.get("id"),
        event_id: row.get("event_id"),
        cleaner_id: row.get("cleaner_id"),
        hours: row.get("hours"),
        status: AssignmentStatus::parse_status(&status).unwrap_or(AssignmentStatus::Scheduled),
        created_at: row.get("created_at"),
        started_at: row.try_get("started_at").ok(),
        completed_at: row.try_get("completed_at").ok(),
        cancelled_at: row.try_get("cancelled_at").ok(),
    }
}

#[instrument(skip_all)]
pub async fn insert_cleaner(
    pool: &Pool,
    name: &str,
    hourly_rate_cents: i64,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO cleaners (name, hourly_rate_cents) VALUES (?, ?) RETURNING id",
    )
    .bind(name)
    .bind(hourly_rate_cents)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

pub async fn get_cleaner(pool: &Pool, cleaner_id: i64) -> Result<Option<Cleaner>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM cleaners WHERE id = ?")
        .bind(cleaner_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| Cleaner {
        id: row.get("id"),
        name: row.get("name"),
        hourly_rate_cents: row.get("hourly_rate_cents"),
        active: row.get::<i64, _>("active") != 0,
    }))
}

#[instrument(skip_all)]
pub async fn insert_assignment(
    pool: &Pool,
    event_id: i64,
    cleaner_id: i64,
    hours: f64,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO cleaner_assignments (event_id, cleaner_id, hours, status) \
         VALUES (?, ?, ?, 'scheduled') RETURNING id",
    )
    .bind(event_id)
    .bind(cleaner_id)
    .bind(hours)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

#[instrument(skip_all)]
pub async fn start_assignment(pool: &Pool, assignment_id: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE cleaner_assignments SET status = 'in_progress', started_at = ? \
         WHERE id = ? AND status = 'scheduled'",
    )
    .bind(Utc::now())
    .bind(assignment_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn complete_assignment(pool: &Pool, assignment_id: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE cleaner_assignments SET status = 'completed', completed_at = ? \
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(Utc::now())
    .bind(assignment_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Cancel still-scheduled assignments of a booking, typically because the
/// booking itself was cancelled upstream. Returns how many were cancelled.
#[instrument(skip_all)]
pub async fn cancel_assignments_for_event(
    pool: &Pool,
    event_id: i64,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE cleaner_assignments SET status = 'cancelled', cancelled_at = ? \
         WHERE event_id = ? AND status = 'scheduled'",
    )
    .bind(Utc::now())
    .bind(event_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn get_assignment(
    pool: &Pool,
    assignment_id: i64,
) -> Result<Option<CleanerAssignment>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM cleaner_assignments WHERE id = ?")
        .bind(assignment_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(assignment_from_row))
}

/// Assignments filtered by cleaner and/or listing, newest first.
pub async fn list_assignments(
    pool: &Pool,
    cleaner_id: Option<i64>,
    listing_id: Option<i64>,
) -> Result<Vec<CleanerAssignment>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT a.* FROM cleaner_assignments a \
         JOIN booking_events e ON e.id = a.event_id \
         WHERE (?1 IS NULL OR a.cleaner_id = ?1) \
           AND (?2 IS NULL OR e.listing_id = ?2) \
         ORDER BY a.id DESC",
    )
    .bind(cleaner_id)
    .bind(listing_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(assignment_from_row).collect())
}

/// Completed hours and pay for one cleaner over a date range. Thin
/// summation only; rate handling stays in the database.
pub async fn hours_report(
    pool: &Pool,
    cleaner_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(f64, i64), sqlx::Error> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(a.hours), 0.0) AS hours, \
                CAST(COALESCE(SUM(a.hours * c.hourly_rate_cents), 0) AS INTEGER) AS cents \
         FROM cleaner_assignments a \
         JOIN cleaners c ON c.id = a.cleaner_id \
         WHERE a.cleaner_id = ? AND a.status = 'completed' \
           AND date(a.completed_at) >= date(?) AND date(a.completed_at) <= date(?)",
    )
    .bind(cleaner_id)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok((row.get("hours"), row.get("cents")))
}
