//! Download service for generated audio.
//!
//! Files are served straight from the output directory with `ServeDir`, which
//! rejects `..` components and never lists directories. Only names directly
//! inside the output directory are served. Anything else becomes the JSON
//! "Audio file not found" error.

use std::path::Path;

use axum::{
    extract::Request,
    handler::HandlerWithoutStateExt,
    http::header::CACHE_CONTROL,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::services::ServeDir;

use crate::config::CACHE_CONTROL_NO_STORE;
use crate::error::AppError;

/// Create the service mounted under `/outputs`.
pub fn create_download_service(output_dir: &Path) -> Router {
    let files = ServeDir::new(output_dir).not_found_service(audio_not_found.into_service());

    Router::new()
        .fallback_service(files)
        .layer(middleware::from_fn(single_segment))
}

/// Reject anything below a subdirectory of the output directory.
///
/// The name is checked after percent-decoding, as `ServeDir` decodes it too.
async fn single_segment(request: Request, next: Next) -> Response {
    let raw = request.uri().path().trim_start_matches('/');
    let plain = match urlencoding::decode(raw) {
        Ok(name) => !name.contains(['/', '\\', '\0']),
        Err(_) => false,
    };
    if !plain {
        return audio_not_found().await;
    }
    next.run(request).await
}

async fn audio_not_found() -> Response {
    // Missing files may appear later; keep the 404 out of caches
    ([(CACHE_CONTROL, CACHE_CONTROL_NO_STORE)], AppError::AudioNotFound).into_response()
}
