//! Repository for versioned booking events.

use crate::model::{BookingEvent, CheckoutKind, RevokeReason};
use chrono::{NaiveDate, Utc};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::instrument;

use super::Pool;

/// Fields of a version about to be inserted. The version number itself is
/// derived in SQL so concurrent re-adds of a cancelled entity stay monotonic.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub listing_id: i64,
    pub external_uid: String,
    pub source: String,
    pub summary: String,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
    pub checkout_kind: CheckoutKind,
    pub checkout_time: String,
}

fn event_from_row(row: &SqliteRow) -> Result<BookingEvent, sqlx::Error> {
    let kind: String = row.get("checkout_kind");
    Ok(BookingEvent {
        id: row.get("id"),
        listing_id: row.get("listing_id"),
        external_uid: row.get("external_uid"),
        version: row.get("version"),
        source: row.get("source"),
        summary: row.get("summary"),
        checkin_date: row.get("checkin_date"),
        checkout_date: row.get("checkout_date"),
        checkout_kind: CheckoutKind::parse_kind(&kind).unwrap_or(CheckoutKind::Open),
        checkout_time: row.get("checkout_time"),
        created_at: row.get("created_at"),
        revoked_at: row.try_get("revoked_at").ok(),
        revoked_reason: row.try_get("revoked_reason").ok(),
    })
}

/// All active (unrevoked) versions for a listing, oldest check-in first.
#[instrument(skip_all)]
pub async fn active_events(pool: &Pool, listing_id: i64) -> Result<Vec<BookingEvent>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM booking_events \
         WHERE listing_id = ? AND revoked_at IS NULL \
         ORDER BY checkin_date ASC, id ASC",
    )
    .bind(listing_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(event_from_row).collect()
}

/// Insert the next version of an entity. For a brand-new external uid this is
/// version 1; for a previously revoked entity the numbering continues.
#[instrument(skip_all)]
pub async fn insert_event(pool: &Pool, ev: &NewEvent) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO booking_events \
           (listing_id, external_uid, version, source, summary, \
            checkin_date, checkout_date, checkout_kind, checkout_time) \
         VALUES (?, ?, \
            COALESCE((SELECT MAX(version) FROM booking_events \
                      WHERE listing_id = ?1 AND external_uid = ?2), 0) + 1, \
            ?, ?, ?, ?, ?, ?) \
         RETURNING id",
    )
    .bind(ev.listing_id)
    .bind(&ev.external_uid)
    .bind(&ev.source)
    .bind(&ev.summary)
    .bind(ev.checkin_date)
    .bind(ev.checkout_date)
    .bind(ev.checkout_kind.as_str())
    .bind(&ev.checkout_time)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Revoke an active version. Idempotent: revoking twice is a no-op.
#[instrument(skip_all)]
pub async fn revoke_event(
    pool: &Pool,
    event_id: i64,
    reason: RevokeReason,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE booking_events SET revoked_at = ?, revoked_reason = ? \
         WHERE id = ? AND revoked_at IS NULL",
    )
    .bind(Utc::now())
    .bind(reason.as_str())
    .bind(event_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Revoke an old version and insert its successor in one transaction, so the
/// active-row invariant never observably breaks.
#[instrument(skip_all)]
pub async fn supersede_event(
    pool: &Pool,
    old_event_id: i64,
    ev: &NewEvent,
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE booking_events SET revoked_at = ?, revoked_reason = ? \
         WHERE id = ? AND revoked_at IS NULL",
    )
    .bind(Utc::now())
    .bind(RevokeReason::Replaced.as_str())
    .bind(old_event_id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(
        "INSERT INTO booking_events \
           (listing_id, external_uid, version, source, summary, \
            checkin_date, checkout_date, checkout_kind, checkout_time) \
         VALUES (?, ?, \
            COALESCE((SELECT MAX(version) FROM booking_events \
                      WHERE listing_id = ?1 AND external_uid = ?2), 0) + 1, \
            ?, ?, ?, ?, ?, ?) \
         RETURNING id",
    )
    .bind(ev.listing_id)
    .bind(&ev.external_uid)
    .bind(&ev.source)
    .bind(&ev.summary)
    .bind(ev.checkin_date)
    .bind(ev.checkout_date)
    .bind(ev.checkout_kind.as_str())
    .bind(&ev.checkout_time)
    .fetch_one(&mut *tx)
    .await?;
    let id: i64 = row.get("id");

    tx.commit().await?;
    Ok(id)
}

pub async fn get_event(pool: &Pool, event_id: i64) -> Result<Option<BookingEvent>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM booking_events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(event_from_row).transpose()
}
