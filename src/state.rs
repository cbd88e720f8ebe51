//! Shared application state for request handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::backend::InferenceBackend;
use crate::config::ServiceConfig;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
///
/// Holds the validated configuration, the inference backend and the
/// generation limiter. Nothing here is locked by the health handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub backend: Arc<dyn InferenceBackend>,
    pub generations: Arc<GenerationLimiter>,
    /// SHA-256 of the configured API key, if any
    pub api_key_digest: Option<[u8; 32]>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServiceConfig, backend: Arc<dyn InferenceBackend>) -> Self {
        let api_key_digest = config
            .http
            .api_key
            .as_ref()
            .map(|key| sha256(key.expose().as_bytes()));
        let generations = Arc::new(GenerationLimiter::new(config.generation.max_concurrent));

        Self {
            config: Arc::new(config),
            backend,
            generations,
            api_key_digest,
            started_at: Instant::now(),
        }
    }
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Bounds concurrent generation jobs and counts them for `/api/health`.
#[derive(Debug)]
pub struct GenerationLimiter {
    permits: Semaphore,
    in_flight: AtomicUsize,
}

impl GenerationLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Semaphore::new(capacity),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. The slot is released when the guard drops.
    pub async fn acquire(&self) -> GenerationSlot<'_> {
        // Counted while waiting too; dropping the future releases the count
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut slot = GenerationSlot {
            _permit: None,
            in_flight: &self.in_flight,
        };
        // The semaphore is owned by the limiter and never closed
        slot._permit = self.permits.acquire().await.ok();
        slot
    }

    /// Jobs running or waiting for a slot
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// A held generation slot.
pub struct GenerationSlot<'a> {
    _permit: Option<SemaphorePermit<'a>>,
    in_flight: &'a AtomicUsize,
}

impl Drop for GenerationSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnavailableBackend;
    use crate::config::Secret;
    use std::time::Duration;

    #[test]
    fn test_api_key_digest() {
        let mut config = ServiceConfig::default();
        config.http.api_key = Some(Secret::new("k"));
        let state = AppState::new(config, Arc::new(UnavailableBackend));
        assert_eq!(state.api_key_digest, Some(sha256(b"k")));

        let state = AppState::new(ServiceConfig::default(), Arc::new(UnavailableBackend));
        assert!(state.api_key_digest.is_none());
    }

    #[tokio::test]
    async fn test_limiter_counts_in_flight() {
        let limiter = GenerationLimiter::new(2);
        assert_eq!(limiter.in_flight(), 0);

        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        drop(b);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_blocks_over_capacity() {
        let limiter = GenerationLimiter::new(1);
        let held = limiter.acquire().await;

        let waited = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(waited.is_err());
        // The abandoned waiter no longer counts
        assert_eq!(limiter.in_flight(), 1);

        drop(held);
        let _next = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);
    }
}
