//! Repository for sync sessions and their leases.
//!
//! A run claims a session with a single conditional insert: the claim wins
//! only if no running session still holds an unexpired lease. Lease
//! timestamps are compared through `datetime(...)` so the stored RFC 3339
//! values and sqlite's `'now'` normalize to the same form.

use crate::model::{SyncSession, SyncStats, SyncStatus, SyncType};
use chrono::{Duration, Utc};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::{info, instrument};
use uuid::Uuid;

use super::Pool;

/// A successfully claimed session lease.
#[derive(Debug, Clone)]
pub struct Lease {
    pub session_id: String,
    pub owner: Uuid,
}

fn session_from_row(row: &SqliteRow) -> Result<SyncSession, sqlx::Error> {
    let sync_type: String = row.get("sync_type");
    let status: String = row.get("status");
    Ok(SyncSession {
        id: row.get("id"),
        sync_type: SyncType::parse_type(&sync_type).unwrap_or(SyncType::AllListings),
        triggered_by: row.get("triggered_by"),
        status: SyncStatus::parse_status(&status).unwrap_or(SyncStatus::Error),
        stats: SyncStats {
            total_events_processed: row.get("total_events_processed"),
            total_feeds_processed: row.get("total_feeds_processed"),
            total_added: row.get("total_added"),
            total_updated: row.get("total_updated"),
            total_deactivated: row.get("total_deactivated"),
            total_replaced: row.get("total_replaced"),
            total_unchanged: row.get("total_unchanged"),
            total_errors: row.get("total_errors"),
        },
        started_at: row.get("started_at"),
        finished_at: row.try_get("finished_at").ok(),
    })
}

/// Try to claim the sync lease. Returns `None` when another running session
/// still holds an unexpired lease. A stale running session (lease expired,
/// owner presumably dead) is finalized as `error` before the claim.
#[instrument(skip_all)]
pub async fn claim(
    pool: &Pool,
    sync_type: SyncType,
    triggered_by: &str,
    lease_seconds: u64,
) -> Result<Option<Lease>, sqlx::Error> {
    let session_id = Uuid::new_v4().to_string();
    let owner = Uuid::new_v4();
    let expires_at = Utc::now() + Duration::seconds(lease_seconds as i64);

    let mut tx = pool.begin().await?;

    let reaped = sqlx::query(
        "UPDATE sync_sessions SET status = 'error', finished_at = CURRENT_TIMESTAMP \
         WHERE status = 'running' AND datetime(lease_expires_at) <= datetime('now')",
    )
    .execute(&mut *tx)
    .await?;
    if reaped.rows_affected() > 0 {
        info!(count = reaped.rows_affected(), "finalized stale sync sessions");
    }

    let res = sqlx::query(
        "INSERT INTO sync_sessions (id, sync_type, triggered_by, status, lease_owner, lease_expires_at) \
         SELECT ?, ?, ?, 'running', ?, ? \
         WHERE NOT EXISTS (SELECT 1 FROM sync_sessions \
                           WHERE status = 'running' \
                             AND datetime(lease_expires_at) > datetime('now'))",
    )
    .bind(&session_id)
    .bind(sync_type.as_str())
    .bind(triggered_by)
    .bind(owner.to_string())
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if res.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(Lease { session_id, owner }))
}

/// Flush progress counters and renew the lease. Guarded by the owner token
/// so a claimer that took over after expiry cannot be clobbered.
#[instrument(skip_all)]
pub async fn flush_progress(
    pool: &Pool,
    lease: &Lease,
    lease_seconds: u64,
    stats: &SyncStats,
) -> Result<(), sqlx::Error> {
    let expires_at = Utc::now() + Duration::seconds(lease_seconds as i64);
    sqlx::query(
        "UPDATE sync_sessions SET \
            lease_expires_at = ?, \
            total_events_processed = ?, total_feeds_processed = ?, \
            total_added = ?, total_updated = ?, total_deactivated = ?, \
            total_replaced = ?, total_unchanged = ?, total_errors = ? \
         WHERE id = ? AND lease_owner = ?",
    )
    .bind(expires_at)
    .bind(stats.total_events_processed)
    .bind(stats.total_feeds_processed)
    .bind(stats.total_added)
    .bind(stats.total_updated)
    .bind(stats.total_deactivated)
    .bind(stats.total_replaced)
    .bind(stats.total_unchanged)
    .bind(stats.total_errors)
    .bind(&lease.session_id)
    .bind(lease.owner.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn finalize(
    pool: &Pool,
    lease: &Lease,
    status: SyncStatus,
    stats: &SyncStats,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_sessions SET \
            status = ?, finished_at = CURRENT_TIMESTAMP, \
            total_events_processed = ?, total_feeds_processed = ?, \
            total_added = ?, total_updated = ?, total_deactivated = ?, \
            total_replaced = ?, total_unchanged = ?, total_errors = ? \
         WHERE id = ? AND lease_owner = ?",
    )
    .bind(status.as_str())
    .bind(stats.total_events_processed)
    .bind(stats.total_feeds_processed)
    .bind(stats.total_added)
    .bind(stats.total_updated)
    .bind(stats.total_deactivated)
    .bind(stats.total_replaced)
    .bind(stats.total_unchanged)
    .bind(stats.total_errors)
    .bind(&lease.session_id)
    .bind(lease.owner.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Add counters into an existing session without touching its lease or
/// status. Used by single-listing runs attached to a caller-owned session.
#[instrument(skip_all)]
pub async fn accumulate(
    pool: &Pool,
    session_id: &str,
    stats: &SyncStats,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_sessions SET \
            total_events_processed = total_events_processed + ?, \
            total_feeds_processed = total_feeds_processed + ?, \
            total_added = total_added + ?, \
            total_updated = total_updated + ?, \
            total_deactivated = total_deactivated + ?, \
            total_replaced = total_replaced + ?, \
            total_unchanged = total_unchanged + ?, \
            total_errors = total_errors + ? \
         WHERE id = ?",
    )
    .bind(stats.total_events_processed)
    .bind(stats.total_feeds_processed)
    .bind(stats.total_added)
    .bind(stats.total_updated)
    .bind(stats.total_deactivated)
    .bind(stats.total_replaced)
    .bind(stats.total_unchanged)
    .bind(stats.total_errors)
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &Pool, session_id: &str) -> Result<Option<SyncSession>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM sync_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(session_from_row).transpose()
}
