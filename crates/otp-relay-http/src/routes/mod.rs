//! Route handlers for the status API.

pub mod destinations;
pub mod health;
pub mod status;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the router with all routes. Everything is read-only.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/destinations", get(destinations::list))
        .route("/api/status", get(status::status))
}
