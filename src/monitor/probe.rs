//! Liveness probes.
//!
//! A probe is one HTTP GET against the health endpoint. It succeeds only when
//! a 2xx response arrives in time; everything else is a failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid probe URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint answered {0}")]
    Status(StatusCode),

    #[error("no answer within {0:?}")]
    TimedOut(Duration),
}

/// Something that can check a target once.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable target, for logs
    fn target(&self) -> &str;

    async fn probe(&self) -> Result<(), ProbeError>;
}

/// HTTP GET prober with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    url: Url,
    target: String,
}

impl HttpProber {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, ProbeError> {
        let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProbeError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }

        // Environment proxies must not sit between the probe and the service
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .no_proxy()
            .user_agent(concat!("songgen-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProbeError::Client)?;

        Ok(Self {
            client,
            target: parsed.to_string(),
            url: parsed,
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    fn target(&self) -> &str {
        &self.target
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status))
        }
    }
}

/// Run one probe, failing it if it has not finished within `timeout`.
///
/// The bound holds whatever the prober does internally.
pub async fn probe_once<P>(prober: &P, timeout: Duration) -> Result<(), ProbeError>
where
    P: Prober + ?Sized,
{
    match tokio::time::timeout(timeout, prober.probe()).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::TimedOut(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};
    use std::net::SocketAddr;

    /// Serve `router` on an ephemeral loopback port.
    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Prober that never finishes.
    struct Hanging;

    #[async_trait]
    impl Prober for Hanging {
        fn target(&self) -> &str {
            "hanging"
        }

        async fn probe(&self) -> Result<(), ProbeError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_rejects_bad_urls() {
        let timeout = Duration::from_secs(5);
        assert!(matches!(
            HttpProber::new("not a url", timeout),
            Err(ProbeError::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpProber::new("ftp://127.0.0.1/api/health", timeout),
            Err(ProbeError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_healthy_endpoint() {
        let addr = serve(Router::new().route("/api/health", get(|| async { "ok" }))).await;
        let prober =
            HttpProber::new(&format!("http://{addr}/api/health"), Duration::from_secs(5)).unwrap();

        probe_once(&prober, Duration::from_secs(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let addr = serve(Router::new().route(
            "/api/health",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "loading") }),
        ))
        .await;
        let prober =
            HttpProber::new(&format!("http://{addr}/api/health"), Duration::from_secs(5)).unwrap();

        let err = probe_once(&prober, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Status(s) if s == StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_missing_route_fails() {
        let addr = serve(Router::new()).await;
        let prober =
            HttpProber::new(&format!("http://{addr}/api/health"), Duration::from_secs(5)).unwrap();

        let err = probe_once(&prober, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Status(s) if s == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_nothing_listening_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober =
            HttpProber::new(&format!("http://{addr}/api/health"), Duration::from_secs(5)).unwrap();
        let err = probe_once(&prober, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Request(_)));
    }

    #[tokio::test]
    async fn test_slow_endpoint_hits_request_timeout() {
        let addr = serve(Router::new().route(
            "/api/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "ok"
            }),
        ))
        .await;
        let prober = HttpProber::new(
            &format!("http://{addr}/api/health"),
            Duration::from_millis(200),
        )
        .unwrap();

        assert!(probe_once(&prober, Duration::from_secs(10)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_budget_is_enforced() {
        let err = probe_once(&Hanging, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ProbeError::TimedOut(d) if d == Duration::from_secs(10)));
    }
}
