//! Defines routes for the relay API.
//!
//! ## Structure
//! - `POST /upload`         — upload a file (multipart form, field `file`)
//! - `GET  /download/{id}`  — consume one download and stream the file
//! - `GET  /info/{id}`      — metadata for a handle, without consuming
//! - `GET  /healthz`        — liveness
//! - `GET  /readyz`         — readiness (registry + disk)
//!
//! Static asset serving and the CORS/trace layers are attached in `main`,
//! after the router is built, so they also cover the SPA fallback.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        relay_handlers::{download_file, file_info, upload_file},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all relay routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // relay endpoints
        .route("/upload", post(upload_file))
        .route("/download/{id}", get(download_file))
        .route("/info/{id}", get(file_info))
}
