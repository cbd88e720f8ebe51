//! Health check endpoint for container orchestration.
//!
//! This is the target of the container `HEALTHCHECK` and of `songgen monitor`.
//! It only reads immutable state and the in-flight counter, so it keeps
//! answering while generations are running.

use axum::{extract::State, Json};
use chrono::Local;
use serde::Serialize;

use crate::config::SERVICE_NAME;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub generation_available: bool,
    pub backend: String,
    pub output_dir: String,
    pub cache_dir: String,
    pub uptime_seconds: u64,
    pub generations_in_flight: usize,
    pub timestamp: String,
}

/// Health check handler.
///
/// Always reports `healthy` once the process serves HTTP. Whether generation
/// works is reported separately in `generation_available`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        generation_available: state.backend.is_available(),
        backend: state.backend.name().to_string(),
        output_dir: state.config.storage.output_dir.display().to_string(),
        cache_dir: state.config.storage.cache_dir.display().to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        generations_in_flight: state.generations.in_flight(),
        timestamp: Local::now().to_rfc3339(),
    })
}
