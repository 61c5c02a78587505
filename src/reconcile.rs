//! Reconciliation of feed entries against stored booking events.
//!
//! The diff is computed by a ranked matcher over pure in-memory data, then
//! applied as the minimal set of writes. Matching never mutates; planning
//! never touches the database; application isolates write failures per event.

use crate::config::Cleaning;
use crate::db::cleaners;
use crate::db::events::{self, NewEvent};
use crate::db::Pool;
use crate::model::{BookingEvent, CheckoutKind, FeedEntry, Listing, RevokeReason, SyncStats};
use crate::notify::Notifier;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// How a feed entry was matched to a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Same external UID. Authoritative.
    Uid,
    /// Date-range overlap on an event whose UID no longer appears in the
    /// feed. Tolerates feeds that reissue UIDs.
    DateOverlap,
}

#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub event_idx: usize,
    pub kind: MatchKind,
    pub confidence: f64,
}

fn overlaps(entry: &FeedEntry, event: &BookingEvent) -> bool {
    entry.checkin_date() < event.checkout_date && event.checkin_date < entry.checkout_date()
}

fn checkout_distance_days(entry: &FeedEntry, event: &BookingEvent) -> i64 {
    (entry.checkout_date() - event.checkout_date).num_days().abs()
}

fn uid_candidates(entry: &FeedEntry, events: &[BookingEvent]) -> Vec<Candidate> {
    events
        .iter()
        .enumerate()
        .filter(|(_, ev)| ev.external_uid == entry.uid)
        .map(|(idx, _)| Candidate {
            event_idx: idx,
            kind: MatchKind::Uid,
            confidence: 1.0,
        })
        .collect()
}

fn overlap_candidates(
    entry: &FeedEntry,
    events: &[BookingEvent],
    feed_uids: &HashSet<&str>,
) -> Vec<Candidate> {
    events
        .iter()
        .enumerate()
        .filter(|(_, ev)| !feed_uids.contains(ev.external_uid.as_str()))
        .filter(|(_, ev)| overlaps(entry, ev))
        .map(|(idx, ev)| Candidate {
            event_idx: idx,
            kind: MatchKind::DateOverlap,
            // Decays with checkout distance; always below a UID match.
            confidence: 0.5 + 0.4 / (1.0 + checkout_distance_days(entry, ev) as f64),
        })
        .collect()
}

/// Pick the best unclaimed candidate for one entry. Strategies run in rank
/// order; the highest confidence wins, ties broken by closest checkout date,
/// then smallest stored id.
pub fn best_match(
    entry: &FeedEntry,
    events: &[BookingEvent],
    claimed: &HashSet<usize>,
    feed_uids: &HashSet<&str>,
) -> Option<Candidate> {
    let mut candidates = uid_candidates(entry, events);
    if candidates.is_empty() {
        candidates = overlap_candidates(entry, events, feed_uids);
    }
    candidates.retain(|c| !claimed.contains(&c.event_idx));

    candidates.into_iter().min_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                checkout_distance_days(entry, &events[a.event_idx])
                    .cmp(&checkout_distance_days(entry, &events[b.event_idx]))
            })
            .then_with(|| events[a.event_idx].id.cmp(&events[b.event_idx].id))
    })
}

/// The writes needed to make a listing's active rows match its feeds.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub events_processed: i64,
    pub added: Vec<NewEvent>,
    pub updated: Vec<(BookingEvent, NewEvent)>,
    pub replaced: Vec<(BookingEvent, NewEvent)>,
    pub cancelled: Vec<BookingEvent>,
    pub unchanged: i64,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.replaced.is_empty()
            && self.cancelled.is_empty()
    }
}

/// A checkout is same-day when another entry in the pass checks in on that
/// date; the feed itself carries no turnover semantics.
fn checkout_kind_for(entry: &FeedEntry, entries: &[FeedEntry]) -> CheckoutKind {
    let turnover = entries
        .iter()
        .any(|other| other.uid != entry.uid && other.checkin_date() == entry.checkout_date());
    if turnover {
        CheckoutKind::SameDay
    } else {
        CheckoutKind::Open
    }
}

fn new_event_for(
    listing: &Listing,
    entry: &FeedEntry,
    kind: CheckoutKind,
    cleaning: &Cleaning,
) -> NewEvent {
    let checkout_time = match kind {
        CheckoutKind::SameDay => cleaning.same_day_checkout_time.clone(),
        CheckoutKind::Open => cleaning.open_checkout_time.clone(),
    };
    NewEvent {
        listing_id: listing.id,
        external_uid: entry.uid.clone(),
        source: entry.source.clone(),
        summary: entry.summary.clone(),
        checkin_date: entry.checkin_date(),
        checkout_date: entry.checkout_date(),
        checkout_kind: kind,
        checkout_time,
    }
}

/// Compute the diff for one listing. Pure: no I/O, deterministic for a given
/// input (entries are processed in start-date-then-UID order and each stored
/// event can be claimed at most once).
pub fn plan(
    listing: &Listing,
    entries: &[FeedEntry],
    active: &[BookingEvent],
    cleaning: &Cleaning,
) -> ReconcilePlan {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        entries[a]
            .start
            .cmp(&entries[b].start)
            .then_with(|| entries[a].uid.cmp(&entries[b].uid))
    });

    let feed_uids: HashSet<&str> = entries.iter().map(|e| e.uid.as_str()).collect();

    let mut plan = ReconcilePlan::default();
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut seen_uids: HashSet<&str> = HashSet::new();

    for idx in order {
        let entry = &entries[idx];
        if !seen_uids.insert(entry.uid.as_str()) {
            warn!(uid = %entry.uid, "duplicate UID in feed, ignoring repeat entry");
            continue;
        }
        plan.events_processed += 1;

        let kind = checkout_kind_for(entry, entries);

        match best_match(entry, active, &claimed, &feed_uids) {
            None => plan.added.push(new_event_for(listing, entry, kind, cleaning)),
            Some(candidate) => {
                claimed.insert(candidate.event_idx);
                let stored = &active[candidate.event_idx];
                let same_stay = stored.checkin_date == entry.checkin_date()
                    && stored.checkout_date == entry.checkout_date()
                    && stored.checkout_kind == kind;

                match candidate.kind {
                    MatchKind::Uid if same_stay => plan.unchanged += 1,
                    MatchKind::Uid => plan
                        .updated
                        .push((stored.clone(), new_event_for(listing, entry, kind, cleaning))),
                    // An overlap match means the feed reissued the UID; the
                    // successor row carries the new one.
                    MatchKind::DateOverlap => plan
                        .replaced
                        .push((stored.clone(), new_event_for(listing, entry, kind, cleaning))),
                }
            }
        }
    }

    for (idx, stored) in active.iter().enumerate() {
        if !claimed.contains(&idx) {
            plan.cancelled.push(stored.clone());
        }
    }

    plan
}

/// Apply a plan. Write failures are isolated per event: counted, logged, and
/// the rest of the plan still runs. Notification failures never count as
/// errors at all.
#[instrument(skip_all, fields(listing_id = listing.id))]
pub async fn apply(
    pool: &Pool,
    listing: &Listing,
    plan: &ReconcilePlan,
    notifier: &dyn Notifier,
    cleaning: &Cleaning,
) -> SyncStats {
    let mut stats = SyncStats {
        total_events_processed: plan.events_processed,
        total_unchanged: plan.unchanged,
        ..Default::default()
    };

    for ev in &plan.added {
        match events::insert_event(pool, ev).await {
            Ok(event_id) => {
                stats.total_added += 1;
                if cleaning.auto_assign {
                    if let Some(cleaner_id) = listing.default_cleaner_id {
                        if let Err(err) = cleaners::insert_assignment(
                            pool,
                            event_id,
                            cleaner_id,
                            listing.default_clean_hours,
                        )
                        .await
                        {
                            warn!(?err, event_id, "failed to auto-assign cleaner");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(?err, uid = %ev.external_uid, "failed to insert booking");
                stats.total_errors += 1;
            }
        }
    }

    for (old, new) in &plan.updated {
        match events::supersede_event(pool, old.id, new).await {
            Ok(_) => {
                stats.total_updated += 1;
                if let Err(err) = notifier.booking_modified(listing, old, new).await {
                    warn!(?err, "modification notification failed");
                }
            }
            Err(err) => {
                warn!(?err, uid = %old.external_uid, "failed to supersede booking");
                stats.total_errors += 1;
            }
        }
    }

    for (old, new) in &plan.replaced {
        match events::supersede_event(pool, old.id, new).await {
            Ok(_) => {
                stats.total_replaced += 1;
                if let Err(err) = notifier.booking_modified(listing, old, new).await {
                    warn!(?err, "modification notification failed");
                }
            }
            Err(err) => {
                warn!(?err, uid = %old.external_uid, "failed to replace booking");
                stats.total_errors += 1;
            }
        }
    }

    for old in &plan.cancelled {
        match events::revoke_event(pool, old.id, RevokeReason::Cancelled).await {
            Ok(_) => {
                stats.total_deactivated += 1;
                match cleaners::cancel_assignments_for_event(pool, old.id).await {
                    Ok(n) if n > 0 => info!(event_id = old.id, n, "cancelled open assignments"),
                    Ok(_) => {}
                    Err(err) => warn!(?err, event_id = old.id, "failed to cancel assignments"),
                }
                if let Err(err) = notifier.booking_cancelled(listing, old).await {
                    warn!(?err, "cancellation notification failed");
                }
            }
            Err(err) => {
                warn!(?err, uid = %old.external_uid, "failed to revoke booking");
                stats.total_errors += 1;
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn cleaning() -> Cleaning {
        Cleaning {
            same_day_checkout_time: "11:00".into(),
            open_checkout_time: "16:00".into(),
            auto_assign: false,
        }
    }

    fn listing() -> Listing {
        Listing {
            id: 1,
            name: "Cabin".into(),
            timezone: "UTC".into(),
            default_cleaner_id: None,
            default_clean_hours: 2.0,
        }
    }

    fn entry(uid: &str, checkin: &str, checkout: &str) -> FeedEntry {
        let start: NaiveDate = checkin.parse().unwrap();
        let end: NaiveDate = checkout.parse().unwrap();
        FeedEntry {
            uid: uid.into(),
            summary: "Reserved".into(),
            start: start.and_hms_opt(0, 0, 0).unwrap(),
            end: end.and_hms_opt(0, 0, 0).unwrap(),
            source: "airbnb".into(),
        }
    }

    fn stored(id: i64, uid: &str, checkin: &str, checkout: &str) -> BookingEvent {
        BookingEvent {
            id,
            listing_id: 1,
            external_uid: uid.into(),
            version: 1,
            source: "airbnb".into(),
            summary: "Reserved".into(),
            checkin_date: checkin.parse().unwrap(),
            checkout_date: checkout.parse().unwrap(),
            checkout_kind: CheckoutKind::Open,
            checkout_time: "16:00".into(),
            created_at: Utc::now(),
            revoked_at: None,
            revoked_reason: None,
        }
    }

    #[test]
    fn uid_match_beats_overlap() {
        let entries = vec![entry("uid-a", "2025-03-01", "2025-03-04")];
        let events = vec![
            stored(1, "uid-b", "2025-03-01", "2025-03-04"),
            stored(2, "uid-a", "2025-06-01", "2025-06-04"),
        ];
        let feed_uids: HashSet<&str> = entries.iter().map(|e| e.uid.as_str()).collect();

        let m = best_match(&entries[0], &events, &HashSet::new(), &feed_uids).unwrap();
        assert_eq!(m.kind, MatchKind::Uid);
        assert_eq!(m.event_idx, 1);
    }

    #[test]
    fn overlap_prefers_closest_checkout() {
        let entries = vec![entry("new-uid", "2025-03-01", "2025-03-05")];
        let events = vec![
            stored(1, "old-1", "2025-03-01", "2025-03-10"),
            stored(2, "old-2", "2025-03-02", "2025-03-06"),
        ];
        let feed_uids: HashSet<&str> = entries.iter().map(|e| e.uid.as_str()).collect();

        let m = best_match(&entries[0], &events, &HashSet::new(), &feed_uids).unwrap();
        assert_eq!(m.kind, MatchKind::DateOverlap);
        assert_eq!(m.event_idx, 1);
        assert!(m.confidence < 1.0);
    }

    #[test]
    fn overlap_tie_breaks_on_smallest_id() {
        let entries = vec![entry("new-uid", "2025-03-01", "2025-03-05")];
        let events = vec![
            stored(7, "old-a", "2025-03-01", "2025-03-05"),
            stored(3, "old-b", "2025-03-02", "2025-03-05"),
        ];
        let feed_uids: HashSet<&str> = entries.iter().map(|e| e.uid.as_str()).collect();

        let m = best_match(&entries[0], &events, &HashSet::new(), &feed_uids).unwrap();
        assert_eq!(m.event_idx, 1); // id 3 wins the tie
    }

    #[test]
    fn events_with_feed_uids_are_not_overlap_candidates() {
        // uid-b is elsewhere in the feed, so its stored row belongs to that
        // entry and must not be stolen by an overlap match.
        let entries = vec![
            entry("brand-new", "2025-03-01", "2025-03-04"),
            entry("uid-b", "2025-03-01", "2025-03-04"),
        ];
        let events = vec![stored(1, "uid-b", "2025-03-01", "2025-03-04")];
        let feed_uids: HashSet<&str> = entries.iter().map(|e| e.uid.as_str()).collect();

        assert!(best_match(&entries[0], &events, &HashSet::new(), &feed_uids).is_none());
    }

    #[test]
    fn classification_covers_all_four_outcomes() {
        let entries = vec![
            entry("keep", "2025-03-01", "2025-03-04"),
            entry("moved", "2025-04-01", "2025-04-06"),
            entry("fresh", "2025-05-01", "2025-05-03"),
        ];
        let events = vec![
            stored(1, "keep", "2025-03-01", "2025-03-04"),
            stored(2, "moved", "2025-04-01", "2025-04-05"),
            stored(3, "gone", "2025-06-01", "2025-06-03"),
        ];

        let p = plan(&listing(), &entries, &events, &cleaning());
        assert_eq!(p.events_processed, 3);
        assert_eq!(p.unchanged, 1);
        assert_eq!(p.updated.len(), 1);
        assert_eq!(p.updated[0].0.external_uid, "moved");
        assert_eq!(p.updated[0].1.checkout_date, "2025-04-06".parse().unwrap());
        assert_eq!(p.added.len(), 1);
        assert_eq!(p.added[0].external_uid, "fresh");
        assert_eq!(p.cancelled.len(), 1);
        assert_eq!(p.cancelled[0].external_uid, "gone");
        assert!(p.replaced.is_empty());
    }

    #[test]
    fn reissued_uid_becomes_replacement() {
        let entries = vec![entry("reissued", "2025-03-01", "2025-03-04")];
        let events = vec![stored(1, "original", "2025-03-01", "2025-03-04")];

        let p = plan(&listing(), &entries, &events, &cleaning());
        assert_eq!(p.replaced.len(), 1);
        assert_eq!(p.replaced[0].0.external_uid, "original");
        assert_eq!(p.replaced[0].1.external_uid, "reissued");
        assert!(p.cancelled.is_empty() && p.added.is_empty());
    }

    #[test]
    fn all_overlap_ambiguity_resolves_deterministically() {
        // Two entries and two stored events, everything overlapping, no UID
        // in common. Greedy order (start date, then UID) with single-claim
        // gives a stable assignment.
        let entries = vec![
            entry("n-2", "2025-03-02", "2025-03-06"),
            entry("n-1", "2025-03-01", "2025-03-05"),
        ];
        let events = vec![
            stored(1, "o-1", "2025-03-01", "2025-03-05"),
            stored(2, "o-2", "2025-03-02", "2025-03-07"),
        ];

        let p = plan(&listing(), &entries, &events, &cleaning());
        assert_eq!(p.replaced.len(), 2);
        // n-1 sorts first and takes its exact-checkout match o-1.
        assert_eq!(p.replaced[0].1.external_uid, "n-1");
        assert_eq!(p.replaced[0].0.external_uid, "o-1");
        assert_eq!(p.replaced[1].1.external_uid, "n-2");
        assert_eq!(p.replaced[1].0.external_uid, "o-2");
    }

    #[test]
    fn back_to_back_stay_marks_same_day_checkout() {
        let entries = vec![
            entry("first", "2025-03-01", "2025-03-04"),
            entry("second", "2025-03-04", "2025-03-07"),
        ];

        let p = plan(&listing(), &entries, &[], &cleaning());
        assert_eq!(p.added.len(), 2);
        let first = p.added.iter().find(|e| e.external_uid == "first").unwrap();
        assert_eq!(first.checkout_kind, CheckoutKind::SameDay);
        assert_eq!(first.checkout_time, "11:00");
        let second = p.added.iter().find(|e| e.external_uid == "second").unwrap();
        assert_eq!(second.checkout_kind, CheckoutKind::Open);
        assert_eq!(second.checkout_time, "16:00");
    }

    #[test]
    fn neighbour_arrival_changes_checkout_kind_to_modified() {
        // Stored as open; a new back-to-back arrival turns it same-day.
        let entries = vec![
            entry("existing", "2025-03-01", "2025-03-04"),
            entry("arrival", "2025-03-04", "2025-03-06"),
        ];
        let events = vec![stored(1, "existing", "2025-03-01", "2025-03-04")];

        let p = plan(&listing(), &entries, &events, &cleaning());
        assert_eq!(p.updated.len(), 1);
        assert_eq!(p.updated[0].1.checkout_kind, CheckoutKind::SameDay);
        assert_eq!(p.added.len(), 1);
    }

    #[test]
    fn unchanged_feed_produces_empty_plan() {
        let entries = vec![
            entry("a", "2025-03-01", "2025-03-04"),
            entry("b", "2025-04-01", "2025-04-05"),
        ];
        let events = vec![
            stored(1, "a", "2025-03-01", "2025-03-04"),
            stored(2, "b", "2025-04-01", "2025-04-05"),
        ];

        let p = plan(&listing(), &entries, &events, &cleaning());
        assert!(p.is_empty());
        assert_eq!(p.unchanged, 2);
    }
}
