//! Axum router for the watch API.
//!
//! Routes:
//! - `POST /watch/{resource}` - resumable watch over one resource stream
//! - `GET  /healthz`          - service liveness

use axum::Router;
use axum::routing::get;
use axum::routing::post;

use crate::handlers::healthz;
use crate::handlers::watch_event;
use crate::state::AppState;

/// Build the complete router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/watch/{resource}", post(watch_event))
        .route("/healthz", get(healthz))
        .with_state(state)
}
