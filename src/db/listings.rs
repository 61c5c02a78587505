//! Repository for listings and their feeds.

use crate::model::{Listing, ListingFeed};
use sqlx::{Row, sqlite::SqliteRow};
use tracing::instrument;

use super::Pool;

fn listing_from_row(row: &SqliteRow) -> Listing {
    Listing {
        id: row.get("id"),
        name: row.get("name"),
        timezone: row.get("timezone"),
        default_cleaner_id: row.try_get("default_cleaner_id").ok(),
        default_clean_hours: row.get("default_clean_hours"),
    }
}

#[instrument(skip_all)]
pub async fn insert_listing(
    pool: &Pool,
    name: &str,
    timezone: &str,
    default_cleaner_id: Option<i64>,
    default_clean_hours: f64,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO listings (name, timezone, default_cleaner_id, default_clean_hours) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(timezone)
    .bind(default_cleaner_id)
    .bind(default_clean_hours)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

#[instrument(skip_all)]
pub async fn add_feed(
    pool: &Pool,
    listing_id: i64,
    source: &str,
    url: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO listing_feeds (listing_id, source, url) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(listing_id)
    .bind(source)
    .bind(url)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

pub async fn list_listings(pool: &Pool) -> Result<Vec<Listing>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM listings ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(listing_from_row).collect())
}

pub async fn get_listing(pool: &Pool, listing_id: i64) -> Result<Option<Listing>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(listing_from_row))
}

pub async fn feeds_for_listing(
    pool: &Pool,
    listing_id: i64,
) -> Result<Vec<ListingFeed>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, listing_id, source, url FROM listing_feeds \
         WHERE listing_id = ? ORDER BY id ASC",
    )
    .bind(listing_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ListingFeed {
            id: row.get("id"),
            listing_id: row.get("listing_id"),
            source: row.get("source"),
            url: row.get("url"),
        })
        .collect())
}
