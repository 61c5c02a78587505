//! Feed fetching and iCal parsing.
//!
//! Availability feeds are plain `text/calendar` documents fetched over HTTP.
//! Parsing is tolerant at entry granularity: a malformed VEVENT block is
//! skipped with a warning, the rest of the feed still yields entries.

use crate::error::{AppError, AppResult};
use crate::model::FeedEntry;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use icalendar::parser::{read_calendar, unfold};
use icalendar::DatePerhapsTime;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Source of raw calendar text. The HTTP implementation is swapped for a
/// static fake in tests.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> AppResult<String>;
}

#[derive(Clone)]
pub struct HttpFeedSource {
    http: Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("staysync/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> AppResult<String> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("feed fetch failed: {err}")))?;

        if !res.status().is_success() {
            return Err(AppError::Upstream(format!(
                "feed fetch returned {} for {url}",
                res.status()
            )));
        }

        res.text()
            .await
            .map_err(|err| AppError::Upstream(format!("feed body read failed: {err}")))
    }
}

/// Fetch a feed and parse it into entries tagged with `source`.
pub async fn fetch_entries(
    feed_source: &dyn FeedSource,
    url: &str,
    source: &str,
) -> AppResult<Vec<FeedEntry>> {
    let text = feed_source.fetch(url).await?;
    parse_feed(&text, source)
}

/// Parse a calendar document into feed entries.
///
/// The document must at least look like iCalendar (error pages served with a
/// 200 are a real failure mode). Within it, each `BEGIN:VEVENT`/`END:VEVENT`
/// block is parsed independently; blocks missing UID or dates are skipped.
pub fn parse_feed(content: &str, source: &str) -> AppResult<Vec<FeedEntry>> {
    if !content.contains("BEGIN:VCALENDAR") {
        return Err(AppError::Upstream(
            "feed is not an iCalendar document".to_string(),
        ));
    }

    let unfolded = unfold(content);
    let mut entries = Vec::new();

    for block in vevent_blocks(&unfolded) {
        match parse_block(&block, source) {
            Some(entry) => entries.push(entry),
            None => {
                warn!(source, "skipping malformed VEVENT block");
            }
        }
    }

    Ok(entries)
}

/// Collect the line ranges between BEGIN:VEVENT and END:VEVENT markers.
fn vevent_blocks(unfolded: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in unfolded.lines() {
        let trimmed = line.trim_end_matches('\r');
        match trimmed {
            "BEGIN:VEVENT" => current = Some(vec![trimmed]),
            "END:VEVENT" => {
                if let Some(mut lines) = current.take() {
                    lines.push(trimmed);
                    blocks.push(lines.join("\n"));
                }
            }
            _ => {
                if let Some(lines) = current.as_mut() {
                    lines.push(trimmed);
                }
            }
        }
    }

    blocks
}

/// Parse one VEVENT block. Returns `None` when the block is malformed:
/// missing UID, missing or unparseable DTSTART/DTEND.
fn parse_block(block: &str, source: &str) -> Option<FeedEntry> {
    let wrapped = format!("BEGIN:VCALENDAR\n{block}\nEND:VCALENDAR");
    let calendar = read_calendar(&wrapped).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;

    let uid = vevent.find_prop("UID")?.val.to_string();
    if uid.trim().is_empty() {
        return None;
    }

    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "Reserved".to_string());

    let start = to_naive(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);
    let end = to_naive(DatePerhapsTime::try_from(vevent.find_prop("DTEND")?).ok()?);

    Some(FeedEntry {
        uid,
        summary,
        start,
        end,
        source: source.to_string(),
    })
}

/// Collapse the date-or-datetime forms to a naive timestamp. Date-only
/// values are local midnight; zoned values keep their wall-clock time.
fn to_naive(dpt: DatePerhapsTime) -> NaiveDateTime {
    match dpt {
        DatePerhapsTime::Date(d) => d.and_hms_opt(0, 0, 0).expect("midnight exists"),
        DatePerhapsTime::DateTime(dt) => match dt {
            icalendar::CalendarDateTime::Utc(dt) => dt.naive_utc(),
            icalendar::CalendarDateTime::Floating(naive) => naive,
            icalendar::CalendarDateTime::WithTimezone { date_time, .. } => date_time,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Airbnb Inc//Hosting Calendar 1.0//EN\r\n\
BEGIN:VEVENT\r\n\
UID:abc-123@airbnb.com\r\n\
SUMMARY:Guest One\r\n\
DTSTART;VALUE=DATE:20250301\r\n\
DTEND;VALUE=DATE:20250304\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:def-456@airbnb.com\r\n\
DTSTART;VALUE=DATE:20250310\r\n\
DTEND;VALUE=DATE:20250312\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn well_formed_blocks_yield_one_entry_each() {
        let entries = parse_feed(FEED, "airbnb").unwrap();
        assert_eq!(entries.len(), 2);

        // Entry count is stable across re-parses of the same bytes.
        let again = parse_feed(FEED, "airbnb").unwrap();
        assert_eq!(entries, again);

        assert_eq!(entries[0].uid, "abc-123@airbnb.com");
        assert_eq!(entries[0].summary, "Guest One");
        assert_eq!(entries[0].checkin_date(), "2025-03-01".parse().unwrap());
        assert_eq!(entries[0].checkout_date(), "2025-03-04".parse().unwrap());
    }

    #[test]
    fn missing_summary_defaults_to_reserved() {
        let entries = parse_feed(FEED, "airbnb").unwrap();
        assert_eq!(entries[1].summary, "Reserved");
    }

    #[test]
    fn date_only_values_are_local_midnight() {
        let entries = parse_feed(FEED, "airbnb").unwrap();
        assert_eq!(
            entries[0].start,
            "2025-03-01T00:00:00".parse::<NaiveDateTime>().unwrap()
        );
    }

    #[test]
    fn datetime_values_keep_wall_clock_time() {
        let feed = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:dt-1\r\n\
DTSTART:20250401T140000Z\r\n\
DTEND:20250403T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let entries = parse_feed(feed, "vrbo").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].start,
            "2025-04-01T14:00:00".parse::<NaiveDateTime>().unwrap()
        );
        assert_eq!(entries[0].checkout_date(), "2025-04-03".parse().unwrap());
    }

    #[test]
    fn malformed_block_is_skipped_not_fatal() {
        let feed = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:ok-1\r\n\
DTSTART;VALUE=DATE:20250301\r\n\
DTEND;VALUE=DATE:20250302\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:no uid and no dates in here\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:bad-dates\r\n\
DTSTART;VALUE=DATE:not-a-date\r\n\
DTEND;VALUE=DATE:20250310\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let entries = parse_feed(feed, "airbnb").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].uid, "ok-1");
    }

    #[test]
    fn folded_lines_are_unfolded() {
        let feed = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:folded-1\r\n\
SUMMARY:A very long gue\r\n st name\r\n\
DTSTART;VALUE=DATE:20250501\r\n\
DTEND;VALUE=DATE:20250503\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let entries = parse_feed(feed, "airbnb").unwrap();
        assert_eq!(entries[0].summary, "A very long guest name");
    }

    #[test]
    fn non_calendar_content_is_an_error() {
        let err = parse_feed("<html>503 Service Unavailable</html>", "airbnb").unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[test]
    fn empty_calendar_is_ok() {
        let entries =
            parse_feed("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n", "airbnb").unwrap();
        assert!(entries.is_empty());
    }
}
