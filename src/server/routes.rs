//! Router configuration for Pixel Press.
//!
//! This module defines the HTTP routes and applies middleware for
//! authentication, rate limiting, body limits and CORS.
//!
//! # Route Structure
//!
//! ```text
//! /health          - Health check (public)
//! /api/compress    - Compress an image (protected)
//! /api/crop        - Crop an image (protected)
//! /api/usage       - Current usage (protected)
//! ```
//!
//! # Middleware Order
//!
//! Requests to `/api` pass identity resolution first, then the rate limiter,
//! then the body limit, then the handler. The rate limiter therefore sees
//! the verified identity.
//!
//! # Example
//!
//! ```ignore
//! use pixel_press::server::routes::{create_router, RouterConfig};
//! use pixel_press::service::CompressionService;
//! use pixel_press::usage::InMemoryUsageStore;
//!
//! let service = CompressionService::new(InMemoryUsageStore::new());
//! let config = RouterConfig::new("my-secret-key")
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, header_identity_middleware, ClientIdentity, TokenAuth};
use super::handlers::{
    compress_handler, crop_handler, health_handler, usage_handler, AppState, EXPOSED_HEADERS,
};
use super::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::service::CompressionService;
use crate::usage::QuotaGate;

/// Default request body ceiling: the largest plan ceiling plus form overhead
pub const DEFAULT_MAX_BODY_SIZE: usize = 101 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Request-volume limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window per caller
    pub max_requests: u32,

    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: super::rate_limit::DEFAULT_MAX_REQUESTS,
            window: super::rate_limit::DEFAULT_WINDOW,
        }
    }
}

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Secret key for bearer token authentication
    pub auth_secret: String,

    /// Whether authentication is enabled for API requests
    pub auth_enabled: bool,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Largest accepted request body in bytes
    pub max_body_size: usize,

    /// Request-volume limit (None = unlimited)
    pub rate_limit: Option<RateLimitConfig>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Attribute unauthenticated callers by `X-Forwarded-For` instead of the
    /// socket address
    pub trust_forwarded_for: bool,
}

impl RouterConfig {
    /// Create a new router configuration with the given auth secret.
    ///
    /// By default:
    /// - Authentication is enabled
    /// - CORS allows any origin
    /// - Bodies up to 101 MiB are accepted
    /// - 30 requests per minute per caller
    /// - Tracing is enabled
    pub fn new(auth_secret: impl Into<String>) -> Self {
        Self {
            auth_secret: auth_secret.into(),
            auth_enabled: true,
            cors_origins: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            rate_limit: Some(RateLimitConfig::default()),
            enable_tracing: true,
            trust_forwarded_for: false,
        }
    }

    /// Create a configuration with authentication disabled.
    ///
    /// **Warning**: This should only be used for development/testing.
    pub fn without_auth() -> Self {
        Self {
            auth_enabled: false,
            ..Self::new(String::new())
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    /// Pass None (or don't call this method) to allow any origin.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the request body ceiling in bytes.
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Set the request-volume limit.
    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            max_requests,
            window,
        });
        self
    }

    /// Disable request-volume limiting.
    pub fn without_rate_limit(mut self) -> Self {
        self.rate_limit = None;
        self
    }

    /// Enable or disable authentication.
    pub fn with_auth_enabled(mut self, enabled: bool) -> Self {
        self.auth_enabled = enabled;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Trust the first `X-Forwarded-For` hop as the client address.
    ///
    /// Only enable behind a reverse proxy that sets the header.
    pub fn with_trust_forwarded_for(mut self, trusted: bool) -> Self {
        self.trust_forwarded_for = trusted;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// This function builds the complete Axum router with:
/// - Public routes (health check)
/// - API routes behind identity resolution and rate limiting
/// - CORS configuration
/// - Request tracing (optional)
pub fn create_router<Q>(service: CompressionService<Q>, config: RouterConfig) -> Router
where
    Q: QuotaGate + 'static,
{
    let app_state = AppState::new(service, config.max_body_size);
    let cors = build_cors_layer(&config);

    let mut api_routes = Router::new()
        .route("/api/compress", post(compress_handler::<Q>))
        .route("/api/crop", post(crop_handler::<Q>))
        .route("/api/usage", get(usage_handler::<Q>))
        .with_state(app_state.clone())
        .layer(DefaultBodyLimit::max(config.max_body_size));

    // Layers added later run first: identity, then rate limit, then handler
    if let Some(limit) = config.rate_limit {
        let limiter = Arc::new(RateLimiter::new(limit.max_requests, limit.window));
        api_routes = api_routes.layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    api_routes = if config.auth_enabled {
        let auth = TokenAuth::new(&config.auth_secret);
        api_routes.layer(middleware::from_fn_with_state(auth, auth_middleware))
    } else {
        api_routes.layer(middleware::from_fn_with_state(
            ClientIdentity::new(config.trust_forwarded_for),
            header_identity_middleware,
        ))
    };

    let public_routes = Router::new()
        .route("/health", get(health_handler::<Q>))
        .with_state(app_state);

    let router = Router::new()
        .merge(api_routes)
        .merge(public_routes)
        .layer(cors);

    // Add tracing if enabled
    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let exposed: Vec<HeaderName> = EXPOSED_HEADERS
        .into_iter()
        .map(HeaderName::from_static)
        .chain([RETRY_AFTER, CONTENT_DISPOSITION])
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers(exposed)
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => {
            // No origins allowed - this effectively disables CORS
            cors
        }
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Create a development router with authentication disabled.
///
/// **Warning**: This should only be used for local development and testing.
/// Never use this in production.
pub fn create_dev_router<Q>(service: CompressionService<Q>) -> Router
where
    Q: QuotaGate + 'static,
{
    create_router(service, RouterConfig::without_auth())
}

// =============================================================================
// Tests
// =============================================================================
