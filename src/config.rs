//! Configuration management for Pixel Press.
//!
//! This module provides the command-line interface:
//! - `serve` (default): run the HTTP service
//! - `sign`: mint a bearer token for an identity
//! - `check`: validate a serve configuration and report encoder capabilities
//!
//! Every serve option can also be set through an environment variable with
//! the `PIXEL_PRESS_` prefix.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use pixel_press::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Sign(config) => println!("Signing for {}", config.identity),
//!     Command::Check(_) => {}
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `PIXEL_PRESS_HOST` - Server bind address (default: 0.0.0.0)
//! - `PIXEL_PRESS_PORT` - Server port (default: 3000)
//! - `PIXEL_PRESS_AUTH_SECRET` - HMAC secret for bearer tokens
//! - `PIXEL_PRESS_AUTH_ENABLED` - Enable authentication (default: true)
//! - `PIXEL_PRESS_TRUST_FORWARDED_FOR` - Use X-Forwarded-For as the client address
//! - `PIXEL_PRESS_CORS_ORIGINS` - Allowed CORS origins (comma-separated)
//! - `PIXEL_PRESS_MAX_BODY_SIZE` - Request body ceiling in bytes
//! - `PIXEL_PRESS_RATE_LIMIT_REQUESTS` - Requests per window (default: 30)
//! - `PIXEL_PRESS_RATE_LIMIT_WINDOW` - Window length in seconds (default: 60)
//! - `PIXEL_PRESS_NO_RATE_LIMIT` - Disable request-volume limiting
//! - `PIXEL_PRESS_DEFAULT_PLAN` - Plan for identities without an override (default: free)
//! - `PIXEL_PRESS_PLANS` - Plan overrides as `identity=plan` (comma-separated)
//! - `PIXEL_PRESS_{FREE,PRO,BUSINESS}_MONTHLY_IMAGES` - Monthly image quota per plan
//! - `PIXEL_PRESS_{FREE,PRO,BUSINESS}_MAX_FILE_SIZE` - Upload ceiling per plan in bytes
//! - `PIXEL_PRESS_USAGE_ENTRIES` - Usage counters kept in memory
//! - `PIXEL_PRESS_QUALITY_ANCHORS` - Quality curve as `slider:encoder` pairs
//! - `PIXEL_PRESS_QUALITY_FLOOR` / `PIXEL_PRESS_QUALITY_CEILING` - Encoder quality bounds
//! - `PIXEL_PRESS_NEAR_LOSSLESS_THRESHOLD` - Encoder quality that enables near-lossless WebP

use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::policy::{
    QualityCurve, DEFAULT_NEAR_LOSSLESS_THRESHOLD, DEFAULT_QUALITY_ANCHORS,
    DEFAULT_QUALITY_CEILING, DEFAULT_QUALITY_FLOOR, MAX_UI_QUALITY,
};
use crate::server::{RateLimitConfig, DEFAULT_MAX_BODY_SIZE};
use crate::server::rate_limit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
use crate::usage::{
    Plan, PlanCatalog, PlanLimits, PlanOverride, BUSINESS_MAX_FILE_SIZE, BUSINESS_MONTHLY_IMAGES,
    DEFAULT_USAGE_ENTRIES, FREE_MAX_FILE_SIZE, FREE_MONTHLY_IMAGES, PRO_MAX_FILE_SIZE,
    PRO_MONTHLY_IMAGES,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default token lifetime for `sign` (24 hours).
pub const DEFAULT_TOKEN_TTL: u64 = 24 * 60 * 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pixel Press - an image compression service.
///
/// Compresses and crops uploaded images, picking the smallest of several
/// candidate encodings and never returning something larger than the upload.
#[derive(Parser, Debug, Clone)]
#[command(name = "pixel-press")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for the default `serve` command.
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The command to run; `serve` when none was given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve(ServeConfig),

    /// Mint a bearer token for an identity.
    Sign(SignConfig),

    /// Validate configuration and report encoder capabilities.
    Check(CheckConfig),
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PIXEL_PRESS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PIXEL_PRESS_PORT")]
    pub port: u16,

    /// Largest accepted request body in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_SIZE, env = "PIXEL_PRESS_MAX_BODY_SIZE")]
    pub max_body_size: usize,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Secret key for HMAC-SHA256 bearer tokens.
    ///
    /// If not provided and auth is enabled, the server will fail to start.
    #[arg(long, env = "PIXEL_PRESS_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Require bearer tokens on API routes.
    ///
    /// When disabled, the caller is identified by the X-User-Id header or
    /// the client address. Only disable authentication in development.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "PIXEL_PRESS_AUTH_ENABLED"
    )]
    pub auth_enabled: bool,

    /// Take the client address from the first X-Forwarded-For hop.
    ///
    /// Only enable behind a reverse proxy that sets the header; otherwise the
    /// socket address is used.
    #[arg(long, default_value_t = false, env = "PIXEL_PRESS_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    // =========================================================================
    // Rate Limiting
    // =========================================================================
    /// Requests allowed per caller per window.
    #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS, env = "PIXEL_PRESS_RATE_LIMIT_REQUESTS")]
    pub rate_limit_requests: u32,

    /// Rate limit window in seconds.
    #[arg(long, default_value_t = DEFAULT_WINDOW.as_secs(), env = "PIXEL_PRESS_RATE_LIMIT_WINDOW")]
    pub rate_limit_window: u64,

    /// Disable request-volume limiting.
    #[arg(long, default_value_t = false, env = "PIXEL_PRESS_NO_RATE_LIMIT")]
    pub no_rate_limit: bool,

    // =========================================================================
    // Plans and Quota
    // =========================================================================
    /// Plan for identities without an override (free, pro, business).
    #[arg(long, default_value = "free", env = "PIXEL_PRESS_DEFAULT_PLAN")]
    pub default_plan: Plan,

    /// Assign a plan to an identity, e.g. `--plan alice=pro` (repeatable).
    #[arg(
        long = "plan",
        value_name = "IDENTITY=PLAN",
        env = "PIXEL_PRESS_PLANS",
        value_delimiter = ','
    )]
    pub plan_overrides: Vec<PlanOverride>,

    /// Monthly image quota on the free plan.
    #[arg(long, default_value_t = FREE_MONTHLY_IMAGES, env = "PIXEL_PRESS_FREE_MONTHLY_IMAGES")]
    pub free_monthly_images: u64,

    /// Upload ceiling in bytes on the free plan.
    #[arg(long, default_value_t = FREE_MAX_FILE_SIZE, env = "PIXEL_PRESS_FREE_MAX_FILE_SIZE")]
    pub free_max_file_size: u64,

    /// Monthly image quota on the pro plan.
    #[arg(long, default_value_t = PRO_MONTHLY_IMAGES, env = "PIXEL_PRESS_PRO_MONTHLY_IMAGES")]
    pub pro_monthly_images: u64,

    /// Upload ceiling in bytes on the pro plan.
    #[arg(long, default_value_t = PRO_MAX_FILE_SIZE, env = "PIXEL_PRESS_PRO_MAX_FILE_SIZE")]
    pub pro_max_file_size: u64,

    /// Monthly image quota on the business plan.
    #[arg(
        long,
        default_value_t = BUSINESS_MONTHLY_IMAGES,
        env = "PIXEL_PRESS_BUSINESS_MONTHLY_IMAGES"
    )]
    pub business_monthly_images: u64,

    /// Upload ceiling in bytes on the business plan.
    #[arg(
        long,
        default_value_t = BUSINESS_MAX_FILE_SIZE,
        env = "PIXEL_PRESS_BUSINESS_MAX_FILE_SIZE"
    )]
    pub business_max_file_size: u64,

    /// Maximum number of (identity, month) usage counters kept in memory.
    #[arg(long, default_value_t = DEFAULT_USAGE_ENTRIES, env = "PIXEL_PRESS_USAGE_ENTRIES")]
    pub usage_entries: usize,

    // =========================================================================
    // Quality Curve
    // =========================================================================
    /// Slider-to-encoder quality anchors as `slider:encoder` pairs.
    #[arg(long, default_value = DEFAULT_QUALITY_ANCHORS, env = "PIXEL_PRESS_QUALITY_ANCHORS")]
    pub quality_anchors: String,

    /// Lowest encoder quality ever used.
    #[arg(long, default_value_t = DEFAULT_QUALITY_FLOOR, env = "PIXEL_PRESS_QUALITY_FLOOR")]
    pub quality_floor: u8,

    /// Highest encoder quality ever used.
    #[arg(long, default_value_t = DEFAULT_QUALITY_CEILING, env = "PIXEL_PRESS_QUALITY_CEILING")]
    pub quality_ceiling: u8,

    /// Encoder quality at or above which WebP runs in near-lossless mode.
    #[arg(
        long,
        default_value_t = DEFAULT_NEAR_LOSSLESS_THRESHOLD,
        env = "PIXEL_PRESS_NEAR_LOSSLESS_THRESHOLD"
    )]
    pub near_lossless_threshold: u8,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PIXEL_PRESS_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_enabled && self.auth_secret_or_empty().is_empty() {
            return Err(
                "Authentication is enabled but no secret provided. \
                 Set --auth-secret or PIXEL_PRESS_AUTH_SECRET, or disable auth with --auth-enabled=false"
                    .to_string(),
            );
        }

        self.quality_curve()?;

        if self.near_lossless_threshold > MAX_UI_QUALITY {
            return Err("near_lossless_threshold must be between 0 and 100".to_string());
        }

        if self.max_body_size == 0 {
            return Err("max_body_size must be greater than 0".to_string());
        }

        if !self.no_rate_limit {
            if self.rate_limit_requests == 0 {
                return Err("rate_limit_requests must be greater than 0".to_string());
            }
            if self.rate_limit_window == 0 {
                return Err("rate_limit_window must be greater than 0".to_string());
            }
        }

        if self.usage_entries == 0 {
            return Err("usage_entries must be greater than 0".to_string());
        }

        let catalog = self.plan_catalog();
        for plan in [Plan::Free, Plan::Pro, Plan::Business] {
            let limits = catalog.limits(plan);
            if limits.monthly_images == 0 {
                return Err(format!("{} monthly image quota must be greater than 0", plan));
            }
            if limits.max_file_size == 0 {
                return Err(format!("{} max file size must be greater than 0", plan));
            }
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the auth secret, or an empty string if not set (call validate() first).
    pub fn auth_secret_or_empty(&self) -> &str {
        self.auth_secret.as_deref().unwrap_or("")
    }

    /// Build the quality curve from the anchor options.
    pub fn quality_curve(&self) -> Result<QualityCurve, String> {
        let anchors = QualityCurve::parse_anchors(&self.quality_anchors)?;
        QualityCurve::new(
            anchors,
            self.quality_floor,
            self.quality_ceiling,
            self.near_lossless_threshold,
        )
    }

    /// Per-plan limits from the plan options.
    pub fn plan_catalog(&self) -> PlanCatalog {
        PlanCatalog {
            free: PlanLimits {
                monthly_images: self.free_monthly_images,
                max_file_size: self.free_max_file_size,
            },
            pro: PlanLimits {
                monthly_images: self.pro_monthly_images,
                max_file_size: self.pro_max_file_size,
            },
            business: PlanLimits {
                monthly_images: self.business_monthly_images,
                max_file_size: self.business_max_file_size,
            },
        }
    }

    /// Request-volume limit, or None when disabled.
    pub fn rate_limit(&self) -> Option<RateLimitConfig> {
        if self.no_rate_limit {
            return None;
        }
        Some(RateLimitConfig {
            max_requests: self.rate_limit_requests,
            window: Duration::from_secs(self.rate_limit_window),
        })
    }
}

// =============================================================================
// Sign
// =============================================================================

/// Output format for `sign`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// Print only the token.
    Token,
    /// Print token, identity and expiry as JSON.
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Secret key shared with the server.
    #[arg(long, env = "PIXEL_PRESS_AUTH_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Identity the token vouches for.
    #[arg(long)]
    pub identity: String,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL)]
    pub ttl: u64,

    /// Output format.
    #[arg(long, value_enum, default_value_t = SignOutputFormat::Token)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("Secret must not be empty".to_string());
        }
        if self.identity.is_empty() {
            return Err("Identity must not be empty".to_string());
        }
        if self
            .identity
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err("Identity must not contain whitespace".to_string());
        }
        if self.ttl == 0 {
            return Err("TTL must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Check
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub serve: ServeConfig,
}

// =============================================================================
// Tests
// =============================================================================
