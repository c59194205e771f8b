//! HTTP server layer for Pixel Press.
//!
//! This module provides the HTTP API in front of the compression service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        POST /api/compress   POST /api/crop   GET /api/usage     │
//! │                                                                 │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌──────────────┐  │
//! │  │  handlers  │ │    auth    │ │ rate_limit │ │    routes    │  │
//! │  │ (requests) │ │  (tokens)  │ │  (window)  │ │ (router cfg) │  │
//! │  └────────────┘ └────────────┘ └────────────┘ └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod rate_limit;
pub mod routes;

pub use auth::{
    auth_middleware, client_address, header_identity_middleware, AuthError, ClientIdentity,
    Identity, TokenAuth,
};
pub use handlers::{
    compress_handler, crop_handler, health_handler, image_response, read_form, usage_handler,
    AppState, ErrorResponse, HealthResponse,
};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
pub use routes::{
    create_dev_router, create_router, RateLimitConfig, RouterConfig, DEFAULT_MAX_BODY_SIZE,
};
