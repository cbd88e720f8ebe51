//! Service description and genre listing.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use chrono::Local;
use serde::Serialize;

use crate::config::{GENRES, SERVICE_NAME, SERVICE_VERSION};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub generation_available: bool,
    pub base_url: String,
    pub endpoints: BTreeMap<&'static str, String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct GenresResponse {
    pub status: &'static str,
    pub genres: &'static [&'static str],
    pub count: usize,
}

/// Describe the service and list its endpoints.
pub async fn index(State(state): State<AppState>) -> Json<IndexResponse> {
    let base_url = state.config.public_base_url();
    let endpoints = [
        ("health", format!("GET {}", state.config.health.path)),
        ("generate_song", "POST /api/generate".to_string()),
        ("generate_music", "POST /api/generate-music".to_string()),
        ("genres", "GET /api/genres".to_string()),
        ("download", "GET /outputs/{filename}".to_string()),
    ]
    .into_iter()
    .collect();

    Json(IndexResponse {
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        status: "running",
        generation_available: state.backend.is_available(),
        base_url,
        endpoints,
        timestamp: Local::now().to_rfc3339(),
    })
}

pub async fn genres() -> Json<GenresResponse> {
    Json(GenresResponse {
        status: "success",
        genres: GENRES,
        count: GENRES.len(),
    })
}
