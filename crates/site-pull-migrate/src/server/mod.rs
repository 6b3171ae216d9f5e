//! HTTP surface: a single POST endpoint driven by form fields.
//!
//! Protocol outcomes travel in `x-migrate-*` response headers, emitted
//! before any body bytes; the HTTP status stays 200 even on protocol
//! failure so pullers behind strict proxies still read the metadata.

pub mod auth;
mod handlers;
pub mod response;

use axum::routing::{get, post};
use axum::Router;

use crate::context::ServeContext;

/// Build the application router.
pub fn router(ctx: ServeContext) -> Router {
    Router::new()
        .route("/", post(handlers::serve))
        .route("/health", get(handlers::health))
        .with_state(ctx)
}
