//! HTTP route handlers for the generation API.
//!
//! Routes are grouped by how long their responses may be cached: downloads are
//! immutable once written, the genre list changes only with a release, and
//! everything else is `no-store`.
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod generate;
pub mod health;
pub mod info;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{CACHE_CONTROL_GENRES, CACHE_CONTROL_NO_STORE, CACHE_CONTROL_OUTPUT};
use crate::error::AppError;
use crate::http::create_download_service;
use crate::middleware::{request_id_layer, require_api_key};
use crate::state::AppState;

/// Creates the Axum router with all routes and cache headers.
pub fn create_router(state: AppState) -> Router {
    // Generation - gated by the API key when one is configured
    let generation_routes = Router::new()
        .route("/api/generate", post(generate::song))
        .route("/api/generate-music", post(generate::music))
        .route("/api/generate-pure-music", post(generate::music))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ));

    // Genres - fixed per release
    let genre_routes = Router::new().route("/api/genres", get(info::genres)).layer(
        SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_GENRES),
        ),
    );

    // Health and index - always fresh for health checks
    let status_routes = Router::new()
        .route(&state.config.health.path, get(health::health))
        .route("/", get(info::index))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ));

    // Downloads - a file name is never reused
    let download_routes = Router::new()
        .nest_service(
            "/outputs",
            create_download_service(&state.config.storage.output_dir),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_OUTPUT),
        ));

    Router::new()
        .merge(generation_routes)
        .merge(genre_routes)
        .merge(status_routes)
        .merge(download_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}

async fn not_found() -> AppError {
    AppError::RouteNotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::backend::{
        BackendError, GenerationInfo, GenerationJob, InferenceBackend, UnavailableBackend,
    };
    use crate::config::{Secret, ServiceConfig};

    /// Backend that writes an empty file and echoes the job back as info.
    struct EchoBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, job: &GenerationJob) -> Result<GenerationInfo, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(&job.output_path, b"RIFF").await?;
            let mut info = GenerationInfo::new();
            info.insert("seed".to_string(), json!(job.seed));
            info.insert("genre".to_string(), json!(job.genre));
            Ok(info)
        }
    }

    /// Backend that writes part of the file, then fails or never finishes.
    struct PartialBackend {
        hang: bool,
    }

    #[async_trait]
    impl InferenceBackend for PartialBackend {
        fn name(&self) -> &str {
            "partial"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, job: &GenerationJob) -> Result<GenerationInfo, BackendError> {
            std::fs::write(&job.output_path, b"RI")?;
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(BackendError::Failed {
                status: failed_status(),
                stderr: "CUDA out of memory".to_string(),
            })
        }
    }

    #[cfg(unix)]
    fn failed_status() -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(1 << 8)
    }

    #[cfg(windows)]
    fn failed_status() -> std::process::ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(1)
    }

    fn output_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir.join("outputs")).unwrap().count()
    }

    fn config_in(dir: &std::path::Path) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.storage.output_dir = dir.join("outputs");
        config.storage.cache_dir = dir.join("cache");
        std::fs::create_dir_all(&config.storage.output_dir).unwrap();
        config
    }

    fn echo_router(config: ServiceConfig) -> (Router, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
        });
        let router = create_router(AppState::new(config, backend.clone()));
        (router, backend)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_healthy_without_backend() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(AppState::new(
            config_in(dir.path()),
            Arc::new(UnavailableBackend),
        ));

        let response = router.oneshot(get("/api/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], CACHE_CONTROL_NO_STORE);
        assert!(response.headers().contains_key("x-request-id"));
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["generation_available"], false);
        assert_eq!(body["generations_in_flight"], 0);
    }

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = echo_router(config_in(dir.path()));

        let body = json_body(router.oneshot(get("/")).await.unwrap()).await;

        assert_eq!(body["status"], "running");
        assert_eq!(body["generation_available"], true);
        assert_eq!(body["base_url"], "http://localhost:10000");
        assert_eq!(body["endpoints"]["health"], "GET /api/health");
    }

    #[tokio::test]
    async fn test_genres_are_cacheable() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = echo_router(config_in(dir.path()));

        let response = router.oneshot(get("/api/genres")).await.unwrap();

        assert_eq!(response.headers()[CACHE_CONTROL], CACHE_CONTROL_GENRES);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["count"], 11);
    }

    #[tokio::test]
    async fn test_generate_song() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let output_dir = config.storage.output_dir.clone();
        let (router, backend) = echo_router(config);

        let response = router
            .oneshot(post_json(
                "/api/generate",
                json!({"lyrics": "[verse]\nHello", "genre": "pop", "seed": 42}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["genre"], "Pop");
        assert_eq!(body["data"]["info"]["seed"], 42);
        assert_eq!(body["data"]["lyrics_preview"], "[verse]\nHello");

        let filename = body["data"]["filename"].as_str().unwrap();
        assert!(filename.starts_with("song_") && filename.ends_with(".wav"));
        assert_eq!(body["data"]["audio_url"], format!("/outputs/{}", filename));
        assert!(output_dir.join(filename).exists());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generated_file_is_downloadable() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = echo_router(config_in(dir.path()));

        let response = router
            .clone()
            .oneshot(post_json("/api/generate-music", json!({"text_prompt": "rain"})))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["duration"], 180);
        assert_eq!(body["data"]["prompt"], "rain");
        let url = body["data"]["audio_url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/outputs/music_"));

        let response = router.oneshot(get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], CACHE_CONTROL_OUTPUT);
    }

    #[tokio::test]
    async fn test_pure_music_alias() {
        let dir = tempfile::tempdir().unwrap();
        let (router, backend) = echo_router(config_in(dir.path()));

        let response = router
            .oneshot(post_json(
                "/api/generate-pure-music",
                json!({"text_prompt": "calm piano", "duration": 30}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["duration"], 30);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (router, backend) = echo_router(config_in(dir.path()));

        let cases = [
            ("/api/generate", json!({"lyrics": "   "})),
            ("/api/generate", json!({"lyrics": "x", "genre": "Polka"})),
            ("/api/generate", json!({"lyrics": "x", "seed": -5})),
            ("/api/generate-music", json!({"text_prompt": ""})),
            ("/api/generate-music", json!({"text_prompt": "x", "duration": 301})),
            ("/api/generate-music", json!({"text_prompt": "x", "duration": 0})),
            ("/api/generate-music", json!({"text_prompt": 3})),
        ];

        for (uri, body) in cases {
            let response = router.clone().oneshot(post_json(uri, body.clone())).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", uri, body);
            let error = json_body(response).await;
            assert_eq!(error["status"], "error");
            assert!(error["message"].is_string());
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(AppState::new(
            config_in(dir.path()),
            Arc::new(UnavailableBackend),
        ));

        let response = router
            .oneshot(post_json("/api/generate", json!({"lyrics": "[verse]\nHi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().contains("Models may be loading"));
    }

    #[tokio::test]
    async fn test_unavailable_music_message() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(AppState::new(
            config_in(dir.path()),
            Arc::new(UnavailableBackend),
        ));

        let response = router
            .oneshot(post_json("/api/generate-music", json!({"text_prompt": "rain"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await["message"],
            "Music generation service not available"
        );
    }

    #[tokio::test]
    async fn test_backend_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(AppState::new(
            config_in(dir.path()),
            Arc::new(PartialBackend { hang: false }),
        ));

        let response = router
            .oneshot(post_json("/api/generate", json!({"lyrics": "[verse]\nHi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        let message = body["message"].as_str().unwrap();
        assert!(message.starts_with("Generation failed: "), "{}", message);
        assert!(message.contains("CUDA out of memory"), "{}", message);
        // The partial file is not left behind for download
        assert_eq!(output_files(dir.path()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.generation.timeout_seconds = 5;
        let state = AppState::new(config, Arc::new(PartialBackend { hang: true }));
        let generations = state.generations.clone();
        let router = create_router(state);

        let response = router
            .oneshot(post_json("/api/generate-music", json!({"text_prompt": "rain"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["message"],
            "Generation failed: generation timed out after 5 seconds"
        );
        assert_eq!(output_files(dir.path()), 0);
        // The slot is released for the next job
        assert_eq!(generations.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_api_key_gates_generation_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.http.api_key = Some(Secret::new("s3cret"));
        let (router, backend) = echo_router(config);

        let response = router
            .clone()
            .oneshot(post_json("/api/generate", json!({"lyrics": "x"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await["message"],
            "Invalid or missing API Key"
        );

        let mut request = post_json("/api/generate", json!({"lyrics": "x"}));
        request
            .headers_mut()
            .insert("x-api-key", HeaderValue::from_static("s3cret"));
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        for uri in ["/api/health", "/api/genres", "/"] {
            let response = router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_missing_download_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = echo_router(config_in(dir.path()));

        let response = router.oneshot(get("/outputs/missing.wav")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CACHE_CONTROL], CACHE_CONTROL_NO_STORE);
        assert_eq!(json_body(response).await["message"], "Audio file not found");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = echo_router(config_in(dir.path()));

        let response = router.oneshot(get("/nope")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["status"], "error");
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = echo_router(config_in(dir.path()));

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/generate")
            .header("origin", "https://example.org")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
