use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a reconciliation run. A session row only exists once its
/// lease has been claimed, so there is no separate "created" state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Partial,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Partial => "partial",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "partial" => Some(SyncStatus::Partial),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    AllListings,
    SingleListing,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::AllListings => "all_listings",
            SyncType::SingleListing => "single_listing",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "all_listings" => Some(SyncType::AllListings),
            "single_listing" => Some(SyncType::SingleListing),
            _ => None,
        }
    }
}

/// Whether the next guest arrives on the checkout day. Drives the cleaner
/// deadline: same-day turnovers must be done before the afternoon check-in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutKind {
    SameDay,
    Open,
}

impl CheckoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutKind::SameDay => "same_day",
            CheckoutKind::Open => "open",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "same_day" => Some(CheckoutKind::SameDay),
            "open" => Some(CheckoutKind::Open),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    Cancelled,
    Replaced,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Cancelled => "cancelled",
            RevokeReason::Replaced => "replaced",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Scheduled => "scheduled",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AssignmentStatus::Scheduled),
            "in_progress" => Some(AssignmentStatus::InProgress),
            "completed" => Some(AssignmentStatus::Completed),
            "cancelled" => Some(AssignmentStatus::Cancelled),
            _ => None,
        }
    }
}

/// One VEVENT pulled out of a feed. Transient: lives only within a single
/// reconciliation pass, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub uid: String,
    pub summary: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub source: String,
}

impl FeedEntry {
    pub fn checkin_date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn checkout_date(&self) -> NaiveDate {
        self.end.date()
    }
}

/// A persisted version of a booking. Rows are immutable; the active version
/// of an entity is the one with `revoked_at` unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub id: i64,
    pub listing_id: i64,
    pub external_uid: String,
    pub version: i64,
    pub source: String,
    pub summary: String,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
    pub checkout_kind: CheckoutKind,
    pub checkout_time: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub name: String,
    pub timezone: String,
    pub default_cleaner_id: Option<i64>,
    pub default_clean_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingFeed {
    pub id: i64,
    pub listing_id: i64,
    pub source: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cleaner {
    pub id: i64,
    pub name: String,
    pub hourly_rate_cents: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerAssignment {
    pub id: i64,
    pub event_id: i64,
    pub cleaner_id: i64,
    pub hours: f64,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Aggregate counters of one sync session, exposed verbatim in the API.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStats {
    pub total_events_processed: i64,
    pub total_feeds_processed: i64,
    pub total_added: i64,
    pub total_updated: i64,
    pub total_deactivated: i64,
    pub total_replaced: i64,
    pub total_unchanged: i64,
    pub total_errors: i64,
}

impl SyncStats {
    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.total_events_processed += other.total_events_processed;
        self.total_feeds_processed += other.total_feeds_processed;
        self.total_added += other.total_added;
        self.total_updated += other.total_updated;
        self.total_deactivated += other.total_deactivated;
        self.total_replaced += other.total_replaced;
        self.total_unchanged += other.total_unchanged;
        self.total_errors += other.total_errors;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: String,
    pub sync_type: SyncType,
    pub triggered_by: String,
    pub status: SyncStatus,
    pub stats: SyncStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
