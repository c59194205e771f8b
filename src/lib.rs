//! # Pixel Press
//!
//! An image compression service. Uploads are re-encoded to JPEG, PNG, WebP
//! or AVIF and the smallest result wins, with one guarantee: the response is
//! never larger than the upload. When every candidate would inflate the
//! file, the original bytes come back untouched.
//!
//! ## Features
//!
//! - **Perceptual quality slider**: user-facing quality 1-100 is remapped onto
//!   the range where encoders actually differ
//! - **Multi-candidate selection**: several encodings compete on size
//! - **Alpha awareness**: transparent images never get a JPEG candidate
//! - **Cropping**: rotate, clamp and extract a region, then encode it
//! - **Plans and quotas**: monthly image quotas and upload ceilings per plan
//! - **Authentication**: HMAC-SHA256 signed bearer tokens
//!
//! ## Architecture
//!
//! - [`policy`] - Quality remapping, candidate generation, selection and crop geometry
//! - [`codec`] - Decoding, encoding and pixel transforms on the `image` crate
//! - [`usage`] - Plans, monthly periods and the quota gate
//! - [`service`] - Request lifecycle: size ceiling, quota, then CPU work
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use pixel_press::{create_router, CompressionService, InMemoryUsageStore, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = CompressionService::new(InMemoryUsageStore::new());
//!     let router = create_router(service, RouterConfig::new("my-secret-key"));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod policy;
pub mod server;
pub mod service;
pub mod usage;

// Re-export commonly used types
pub use codec::{EncodeSettings, ImageCodec, StandardCodec};
pub use config::{CheckConfig, Cli, Command, ServeConfig, SignConfig, SignOutputFormat};
pub use error::{EncodeError, ProcessError, RateLimited};
pub use policy::{
    compress, CompressionRequest, CompressionResult, CropRequest, EncodeFormat, OutputFormat,
    PolicyOutcome, QualityCurve, RequestedFormat,
};
pub use server::{
    auth_middleware, create_dev_router, create_router, AppState, AuthError, ClientIdentity,
    Identity, RouterConfig, TokenAuth,
};
pub use service::{CompressionService, ProcessedImage, UsageReport};
pub use usage::{InMemoryUsageStore, Plan, PlanCatalog, PlanLimits, QuotaDecision, QuotaGate};
