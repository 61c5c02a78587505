use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use staysync::config::{self, Config};
use staysync::db::{self, listings, sessions};
use staysync::error::{AppError, AppResult};
use staysync::ical::FeedSource;
use staysync::model::{BookingEvent, Listing, SyncStatus, SyncType};
use staysync::notify::Notifier;
use staysync::sync;

async fn setup_pool() -> db::Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn test_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

#[derive(Clone, Default)]
struct StaticFeeds {
    bodies: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticFeeds {
    async fn set(&self, url: &str, body: &str) {
        self.bodies.lock().await.insert(url.to_string(), body.to_string());
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl FeedSource for StaticFeeds {
    async fn fetch(&self, url: &str) -> AppResult<String> {
        self.calls.lock().await.push(url.to_string());
        if url.starts_with("fail:") {
            return Err(AppError::Upstream(format!("connection refused: {url}")));
        }
        self.bodies
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Upstream(format!("no feed at {url}")))
    }
}

#[derive(Clone, Default)]
struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn booking_cancelled(&self, _: &Listing, _: &BookingEvent) -> AppResult<()> {
        Ok(())
    }

    async fn booking_modified(
        &self,
        _: &Listing,
        _: &BookingEvent,
        _: &staysync::db::events::NewEvent,
    ) -> AppResult<()> {
        Ok(())
    }
}

fn one_event_feed(uid: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:{uid}\r\n\
         DTSTART;VALUE=DATE:20250301\r\nDTEND;VALUE=DATE:20250304\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}

/// Seven listings at batch size five run as two batches, and a failure in
/// listing 3 leaves listings 4-7 untouched by it.
#[tokio::test]
async fn seven_listings_two_batches_failure_isolated() {
    let pool = setup_pool().await;
    let cfg = test_config();
    assert_eq!(cfg.app.sync_batch_size, 5);
    let feeds = StaticFeeds::default();

    for i in 1..=7 {
        let listing_id = listings::insert_listing(&pool, &format!("Listing {i}"), "UTC", None, 2.0)
            .await
            .unwrap();
        let url = if i == 3 {
            "fail:listing-3".to_string()
        } else {
            format!("https://calendar.example/{i}.ics")
        };
        listings::add_feed(&pool, listing_id, "airbnb", &url).await.unwrap();
        feeds.set(&url, &one_event_feed(&format!("uid-{i}"))).await;
    }

    let outcome = sync::run_all(&pool, &feeds, &NullNotifier, &cfg, "manual")
        .await
        .unwrap();

    assert_eq!(outcome.batches, 2);
    assert_eq!(outcome.status, SyncStatus::Partial);
    assert_eq!(outcome.stats.total_added, 6);
    assert_eq!(outcome.stats.total_errors, 1);
    assert_eq!(outcome.stats.total_feeds_processed, 6);

    // Every listing's feed was attempted, including the ones after the failure.
    let calls = feeds.calls().await;
    assert_eq!(calls.len(), 7);
    assert!(calls.iter().any(|u| u == "fail:listing-3"));
    assert!(calls.iter().any(|u| u.ends_with("/7.ics")));

    let session = sessions::get(&pool, &outcome.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SyncStatus::Partial);
    assert_eq!(session.stats, outcome.stats);
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn all_feeds_down_finalizes_as_error() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let feeds = StaticFeeds::default();

    for i in 1..=2 {
        let listing_id = listings::insert_listing(&pool, &format!("Listing {i}"), "UTC", None, 2.0)
            .await
            .unwrap();
        listings::add_feed(&pool, listing_id, "airbnb", &format!("fail:{i}"))
            .await
            .unwrap();
    }

    let outcome = sync::run_all(&pool, &feeds, &NullNotifier, &cfg, "manual")
        .await
        .unwrap();
    assert_eq!(outcome.status, SyncStatus::Error);
    assert_eq!(outcome.stats.total_errors, 2);
}

#[tokio::test]
async fn no_listings_completes_cleanly() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let feeds = StaticFeeds::default();

    let outcome = sync::run_all(&pool, &feeds, &NullNotifier, &cfg, "cron")
        .await
        .unwrap();
    assert_eq!(outcome.status, SyncStatus::Completed);
    assert_eq!(outcome.batches, 0);
    assert_eq!(outcome.stats, Default::default());

    let session = sessions::get(&pool, &outcome.session_id).await.unwrap().unwrap();
    assert_eq!(session.triggered_by, "cron");
    assert_eq!(session.sync_type, SyncType::AllListings);
}

/// A run is rejected while an unexpired lease is held and accepted after the
/// lease expires; the stale session is finalized as `error` by the claimer.
#[tokio::test]
async fn concurrent_run_conflicts_until_lease_expiry() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let feeds = StaticFeeds::default();

    // Another process holds the lease.
    let held = sessions::claim(&pool, SyncType::AllListings, "manual", cfg.app.lease_seconds)
        .await
        .unwrap()
        .unwrap();

    let err = sync::run_all(&pool, &feeds, &NullNotifier, &cfg, "manual")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Simulate the 5-minute threshold passing without the owner finalizing.
    sqlx::query(
        "UPDATE sync_sessions SET lease_expires_at = datetime('now', '-1 seconds') WHERE id = ?",
    )
    .bind(&held.session_id)
    .execute(&pool)
    .await
    .unwrap();

    let outcome = sync::run_all(&pool, &feeds, &NullNotifier, &cfg, "manual")
        .await
        .unwrap();
    assert_eq!(outcome.status, SyncStatus::Completed);

    let stale = sessions::get(&pool, &held.session_id).await.unwrap().unwrap();
    assert_eq!(stale.status, SyncStatus::Error);
}

/// Single-listing runs can attach to an existing session and accumulate
/// into its counters without finalizing it.
#[tokio::test]
async fn attached_single_run_accumulates_into_session() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let feeds = StaticFeeds::default();

    let listing_id = listings::insert_listing(&pool, "Attached", "UTC", None, 2.0)
        .await
        .unwrap();
    let url = "https://calendar.example/attached.ics";
    listings::add_feed(&pool, listing_id, "airbnb", url).await.unwrap();
    feeds.set(url, &one_event_feed("uid-att")).await;

    let lease = sessions::claim(&pool, SyncType::AllListings, "manual", cfg.app.lease_seconds)
        .await
        .unwrap()
        .unwrap();

    let outcome = sync::run_single(
        &pool,
        &feeds,
        &NullNotifier,
        &cfg,
        listing_id,
        Some(&lease.session_id),
        SyncType::SingleListing,
        "manual",
    )
    .await
    .unwrap();

    assert_eq!(outcome.session_id, lease.session_id);
    assert_eq!(outcome.status, SyncStatus::Running);
    assert_eq!(outcome.stats.total_added, 1);

    let session = sessions::get(&pool, &lease.session_id).await.unwrap().unwrap();
    assert_eq!(session.stats.total_added, 1);
    assert!(session.finished_at.is_none());
}
