//! Request-volume rate limiting.
//!
//! A fixed-window counter per caller. This is independent of the monthly
//! usage quota: it bounds how fast a caller may send requests, not how many
//! images they may process.
//!
//! Callers are keyed by their [`Identity`], which in development mode is the
//! client address when no user header is sent.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RateLimited;

use super::auth::{client_address, Identity, ANONYMOUS};

/// Default requests allowed per window
pub const DEFAULT_MAX_REQUESTS: u32 = 30;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of callers tracked at once
const DEFAULT_MAX_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<LruCache<String, Window>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window` for each key.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_capacity(max_requests, window, DEFAULT_MAX_KEYS)
    }

    pub fn with_capacity(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        let capacity = NonZeroUsize::new(max_keys).unwrap_or(NonZeroUsize::MIN);
        Self {
            max_requests,
            window,
            windows: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `key`.
    pub async fn check(&self, key: &str) -> Result<(), RateLimited> {
        self.check_at(key, Instant::now()).await
    }

    /// Count one request for `key` as if it arrived at `now`.
    pub async fn check_at(&self, key: &str, now: Instant) -> Result<(), RateLimited> {
        let mut windows = self.windows.lock().await;

        let window = windows
            .get(key)
            .copied()
            .filter(|w| now.saturating_duration_since(w.started) < self.window)
            .unwrap_or(Window {
                started: now,
                count: 0,
            });

        if window.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(window.started);
            let remaining = self.window.saturating_sub(elapsed);
            // Round up so a client never retries into the same window
            let retry_after = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(RateLimited {
                retry_after: retry_after.max(1),
            });
        }

        windows.put(
            key.to_string(),
            Window {
                count: window.count + 1,
                ..window
            },
        );
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

/// Axum middleware applying a [`RateLimiter`].
///
/// Must run after the identity middleware so the caller is known.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = match request.extensions().get::<Identity>() {
        Some(identity) => identity.as_str().to_string(),
        None => client_address(&request).unwrap_or_else(|| ANONYMOUS.to_string()),
    };

    match limiter.check(&key).await {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            debug!(key = %key, retry_after = rejection.retry_after, "Rate limited");
            rejection.into_response()
        }
    }
}
