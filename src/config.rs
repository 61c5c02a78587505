//! Configuration loader and validator for the staysync server.
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub webhook: Webhook,
    pub cleaning: Cleaning,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_addr: String,
    pub sync_batch_size: usize,
    pub lease_seconds: u64,
    pub http_timeout_seconds: u64,
}

/// Outbound notification webhook. An empty URL disables notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    pub url: String,
}

/// Turnover scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cleaning {
    pub same_day_checkout_time: String,
    pub open_checkout_time: String,
    pub auto_assign: bool,
}

impl Config {
    pub fn webhook_enabled(&self) -> bool {
        !self.webhook.url.trim().is_empty()
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }
    if cfg.app.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid(
            "app.bind_addr must be a host:port socket address",
        ));
    }
    if cfg.app.sync_batch_size == 0 {
        return Err(ConfigError::Invalid("app.sync_batch_size must be > 0"));
    }
    if cfg.app.lease_seconds == 0 {
        return Err(ConfigError::Invalid("app.lease_seconds must be > 0"));
    }
    if cfg.app.http_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.http_timeout_seconds must be > 0"));
    }

    if NaiveTime::parse_from_str(&cfg.cleaning.same_day_checkout_time, "%H:%M").is_err() {
        return Err(ConfigError::Invalid(
            "cleaning.same_day_checkout_time must be HH:MM",
        ));
    }
    if NaiveTime::parse_from_str(&cfg.cleaning.open_checkout_time, "%H:%M").is_err() {
        return Err(ConfigError::Invalid(
            "cleaning.open_checkout_time must be HH:MM",
        ));
    }

    // webhook.url may be empty (notifications disabled); if set it must be http(s)
    let url = cfg.webhook.url.trim();
    if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Invalid("webhook.url must be an http(s) URL"));
    }

    Ok(())
}

/// Example configuration, used by tests and `--print-example`.
pub fn example() -> &'static str {
    r#"app:
  bind_addr: "127.0.0.1:8080"
  sync_batch_size: 5
  lease_seconds: 300
  http_timeout_seconds: 30

webhook:
  url: ""

cleaning:
  same_day_checkout_time: "11:00"
  open_checkout_time: "16:00"
  auto_assign: true
"#
}
