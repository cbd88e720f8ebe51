//! Request middleware.
//!
//! - `request_id_layer`: gives every request a UUID v4 and a tracing span so
//!   all logs emitted while handling it can be correlated
//! - `require_api_key`: guards generation routes when an API key is configured

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{sha256, AppState};

/// Header clients send the API key in
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header echoing the request ID back to the client
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that generates a request ID and creates a request span.
///
/// The ID is echoed in the `x-request-id` response header.
///
/// This should be the outermost middleware layer so the span wraps
/// all request processing, including other middleware and handlers.
pub async fn request_id_layer(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    async move {
        let mut response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Reject requests without the configured API key.
///
/// Keys are compared as SHA-256 digests so the comparison cost does not
/// depend on how much of the key matched.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.api_key_digest {
        if !api_key_matches(request.headers(), &expected) {
            tracing::warn!("Rejected request with invalid or missing API key");
            return AppError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

fn api_key_matches(headers: &HeaderMap, expected: &[u8; 32]) -> bool {
    let Some(provided) = headers.get(API_KEY_HEADER) else {
        return false;
    };
    let digest = sha256(provided.as_bytes());
    digest
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
