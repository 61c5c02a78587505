//! HTTP surface: routers, handlers, shared state.

pub mod assignments;
pub mod listings;
pub mod sync_routes;

use crate::config::Config;
use crate::db::Pool;
use crate::ical::FeedSource;
use crate::notify::Notifier;
use axum::Router;
use std::sync::Arc;

/// Shared handler state. The feed source and notifier are trait objects so
/// tests can drive the full router against fakes.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub cfg: Arc<Config>,
    pub feed_source: Arc<dyn FeedSource>,
    pub notifier: Arc<dyn Notifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(sync_routes::router())
        .merge(listings::router())
        .merge(assignments::router())
        .with_state(state)
}
