//! Sync orchestration: lease claiming, batched fan-out, session accounting.
//!
//! Listings are processed in fixed-size batches. Everything inside a batch
//! reconciles concurrently; batches run one after another so the number of
//! in-flight outbound requests stays bounded. Counters are flushed and the
//! lease renewed after every batch, which is what polling clients observe.

use crate::config::Config;
use crate::db::{self, listings, sessions, Pool};
use crate::error::{AppError, AppResult};
use crate::ical::{self, FeedSource};
use crate::model::{Listing, SyncStats, SyncStatus, SyncType};
use crate::notify::Notifier;
use crate::reconcile;
use futures::future::join_all;
use tracing::{info, instrument, warn};

/// Result of a completed (or partially completed) sync run.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub session_id: String,
    pub status: SyncStatus,
    pub stats: SyncStats,
    pub batches: usize,
}

/// Reconcile a single listing against all of its feeds.
///
/// A fetch or parse failure on any feed aborts this listing only: with a
/// partial feed union, absent entries would be indistinguishable from
/// cancellations.
#[instrument(skip_all, fields(listing_id = listing.id))]
pub async fn reconcile_listing(
    pool: &Pool,
    feed_source: &dyn FeedSource,
    notifier: &dyn Notifier,
    cfg: &Config,
    listing: &Listing,
) -> AppResult<SyncStats> {
    let feeds = listings::feeds_for_listing(pool, listing.id).await?;
    if feeds.is_empty() {
        info!("listing has no feeds, nothing to reconcile");
        return Ok(SyncStats::default());
    }

    let mut entries = Vec::new();
    for feed in &feeds {
        let mut batch = ical::fetch_entries(feed_source, &feed.url, &feed.source).await?;
        entries.append(&mut batch);
    }

    let active = db::events::active_events(pool, listing.id).await?;
    let plan = reconcile::plan(listing, &entries, &active, &cfg.cleaning);
    let mut stats = reconcile::apply(pool, listing, &plan, notifier, &cfg.cleaning).await;
    stats.total_feeds_processed = feeds.len() as i64;
    Ok(stats)
}

/// Run a full sync across every listing under a freshly claimed session.
#[instrument(skip_all)]
pub async fn run_all(
    pool: &Pool,
    feed_source: &dyn FeedSource,
    notifier: &dyn Notifier,
    cfg: &Config,
    triggered_by: &str,
) -> AppResult<SyncOutcome> {
    let lease = sessions::claim(
        pool,
        SyncType::AllListings,
        triggered_by,
        cfg.app.lease_seconds,
    )
    .await?
    .ok_or_else(|| AppError::Conflict("sync already running".to_string()))?;

    info!(session_id = %lease.session_id, triggered_by, "sync session started");

    let all = listings::list_listings(pool).await?;
    let mut totals = SyncStats::default();
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut batches = 0usize;

    for batch in all.chunks(cfg.app.sync_batch_size.max(1)) {
        batches += 1;
        let results = join_all(
            batch
                .iter()
                .map(|listing| reconcile_listing(pool, feed_source, notifier, cfg, listing)),
        )
        .await;

        for (listing, result) in batch.iter().zip(results) {
            match result {
                Ok(stats) => {
                    totals.merge(&stats);
                    succeeded += 1;
                }
                Err(err) => {
                    warn!(?err, listing_id = listing.id, "listing sync failed");
                    totals.total_errors += 1;
                    failed += 1;
                }
            }
        }

        sessions::flush_progress(pool, &lease, cfg.app.lease_seconds, &totals).await?;
        info!(batch = batches, done = succeeded + failed, total = all.len(), "batch finished");
    }

    let status = if failed == 0 {
        SyncStatus::Completed
    } else if succeeded == 0 {
        SyncStatus::Error
    } else {
        SyncStatus::Partial
    };

    sessions::finalize(pool, &lease, status, &totals).await?;
    info!(session_id = %lease.session_id, status = status.as_str(), "sync session finished");

    Ok(SyncOutcome {
        session_id: lease.session_id,
        status,
        stats: totals,
        batches,
    })
}

/// Run a sync for one listing.
///
/// With `session_id` set, the results accumulate into that existing session
/// (the caller owns its lifecycle). Otherwise a dedicated single-listing
/// session is claimed and finalized here.
#[instrument(skip_all, fields(listing_id = listing_id))]
pub async fn run_single(
    pool: &Pool,
    feed_source: &dyn FeedSource,
    notifier: &dyn Notifier,
    cfg: &Config,
    listing_id: i64,
    session_id: Option<&str>,
    sync_type: SyncType,
    triggered_by: &str,
) -> AppResult<SyncOutcome> {
    let listing = listings::get_listing(pool, listing_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("listing {listing_id}")))?;

    if let Some(sid) = session_id {
        let session = sessions::get(pool, sid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {sid}")))?;

        match reconcile_listing(pool, feed_source, notifier, cfg, &listing).await {
            Ok(stats) => {
                sessions::accumulate(pool, sid, &stats).await?;
                let session = sessions::get(pool, sid).await?.unwrap_or(session);
                Ok(SyncOutcome {
                    session_id: sid.to_string(),
                    status: session.status,
                    stats: session.stats,
                    batches: 1,
                })
            }
            Err(err) => {
                let errs = SyncStats {
                    total_errors: 1,
                    ..Default::default()
                };
                sessions::accumulate(pool, sid, &errs).await?;
                Err(err)
            }
        }
    } else {
        let lease = sessions::claim(pool, sync_type, triggered_by, cfg.app.lease_seconds)
            .await?
            .ok_or_else(|| AppError::Conflict("sync already running".to_string()))?;

        match reconcile_listing(pool, feed_source, notifier, cfg, &listing).await {
            Ok(stats) => {
                sessions::finalize(pool, &lease, SyncStatus::Completed, &stats).await?;
                Ok(SyncOutcome {
                    session_id: lease.session_id,
                    status: SyncStatus::Completed,
                    stats,
                    batches: 1,
                })
            }
            Err(err) => {
                let errs = SyncStats {
                    total_errors: 1,
                    ..Default::default()
                };
                sessions::finalize(pool, &lease, SyncStatus::Error, &errs).await?;
                Err(err)
            }
        }
    }
}
