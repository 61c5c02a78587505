//! Outbound chat notifications for booking changes.
//!
//! Fire-and-forget: the reconciler logs and swallows every failure coming
//! out of here, so a webhook outage can never fail a sync run.

use crate::config::Config;
use crate::db::events::NewEvent;
use crate::error::{AppError, AppResult};
use crate::model::{BookingEvent, Listing};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_cancelled(&self, listing: &Listing, event: &BookingEvent) -> AppResult<()>;

    async fn booking_modified(
        &self,
        listing: &Listing,
        old: &BookingEvent,
        new: &NewEvent,
    ) -> AppResult<()>;
}

/// Posts `{ text, blocks }` payloads to a configured webhook URL. With no
/// URL configured the notifier is a no-op.
#[derive(Clone)]
pub struct SlackWebhook {
    http: Client,
    url: Option<String>,
}

impl fmt::Debug for SlackWebhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackWebhook")
            .field("enabled", &self.url.is_some())
            .finish_non_exhaustive()
    }
}

impl SlackWebhook {
    pub fn from_config(cfg: &Config) -> Self {
        let http = Client::builder()
            .user_agent("staysync/0.1")
            .timeout(Duration::from_secs(cfg.app.http_timeout_seconds))
            .build()
            .expect("reqwest client");
        let url = if cfg.webhook_enabled() {
            Some(cfg.webhook.url.trim().to_string())
        } else {
            None
        };
        Self { http, url }
    }

    async fn post(&self, payload: &Value) -> AppResult<()> {
        let Some(url) = self.url.as_deref() else {
            return Ok(());
        };

        let res = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("webhook post failed: {err}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("webhook error {status}: {body}")));
        }

        info!("posted webhook notification");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackWebhook {
    async fn booking_cancelled(&self, listing: &Listing, event: &BookingEvent) -> AppResult<()> {
        self.post(&cancellation_payload(listing, event)).await
    }

    async fn booking_modified(
        &self,
        listing: &Listing,
        old: &BookingEvent,
        new: &NewEvent,
    ) -> AppResult<()> {
        self.post(&modification_payload(listing, old, new)).await
    }
}

pub fn cancellation_payload(listing: &Listing, event: &BookingEvent) -> Value {
    let text = format!(
        ":x: Booking cancelled at *{}*: {} — {} ({})",
        listing.name, event.checkin_date, event.checkout_date, event.source
    );
    json!({
        "text": text,
        "blocks": [
            { "type": "section", "text": { "type": "mrkdwn", "text": text } }
        ]
    })
}

pub fn modification_payload(listing: &Listing, old: &BookingEvent, new: &NewEvent) -> Value {
    let text = format!(
        ":calendar: Booking changed at *{}*: {} — {} is now {} — {} ({})",
        listing.name,
        old.checkin_date,
        old.checkout_date,
        new.checkin_date,
        new.checkout_date,
        new.source
    );
    json!({
        "text": text,
        "blocks": [
            { "type": "section", "text": { "type": "mrkdwn", "text": text } }
        ]
    })
}
