//! Signed bearer tokens for Pixel Press.
//!
//! Callers authenticate with an HMAC-SHA256 signed token naming their
//! identity. The identity is what usage is counted against.
//!
//! # Token Format
//!
//! ```text
//! Authorization: Bearer {identity}.{expiry}.{signature}
//!
//! signature = hex(HMAC-SHA256(secret_key, "{identity}:{expiry}"))
//! ```
//!
//! `expiry` is a Unix timestamp in seconds. Identities may themselves contain
//! dots (email addresses do), so the token is split from the right.
//!
//! # Security Properties
//!
//! - **Identity binding**: the signature covers the identity, so it cannot be swapped
//! - **Time-limited**: tokens expire after a configurable TTL
//! - **Constant-time comparison**: signatures are compared in constant time
//!
//! # Development Mode
//!
//! With authentication disabled, [`header_identity_middleware`] derives the
//! identity from `X-User-Id`, then the client address, then falls back to
//! `anonymous`. The client address is the socket peer unless
//! [`ClientIdentity::trust_forwarded_for`] is set, in which case the first
//! `X-Forwarded-For` hop is preferred.
//!
//! # Example
//!
//! ```rust
//! use pixel_press::server::auth::TokenAuth;
//! use std::time::Duration;
//!
//! let auth = TokenAuth::new("my-secret-key");
//! let (token, _expiry) = auth.sign("alice@example.com", Duration::from_secs(3600));
//!
//! assert_eq!(auth.verify(&token).unwrap(), "alice@example.com");
//! ```

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;

/// Header carrying the caller identity when authentication is disabled
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the client address chain from a reverse proxy
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Identity used when nothing identifies the caller
pub const ANONYMOUS: &str = "anonymous";

// =============================================================================
// Types
// =============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Authentication error types.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No `Authorization` header
    #[error("Missing bearer token")]
    MissingToken,

    /// The header is not `Bearer <identity>.<expiry>.<signature>`
    #[error("Malformed bearer token")]
    MalformedToken,

    /// Token has expired
    #[error("Token expired at {expired_at} (current time: {current_time})")]
    Expired {
        /// When the token expired
        expired_at: u64,
        /// Current time
        current_time: u64,
    },

    /// Signature does not match
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Signature is not valid hex
    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    /// Expiry is not a valid integer
    #[error("Invalid expiry format")]
    InvalidExpiryFormat,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
            AuthError::MalformedToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AuthError::Expired { .. } => (StatusCode::UNAUTHORIZED, "token_expired"),
            AuthError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AuthError::InvalidSignatureFormat => {
                (StatusCode::BAD_REQUEST, "invalid_signature_format")
            }
            AuthError::InvalidExpiryFormat => (StatusCode::BAD_REQUEST, "invalid_expiry_format"),
        };
        let message = self.to_string();

        // A forged signature is worth a warning; the rest are routine
        match &self {
            AuthError::InvalidSignature => {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Authentication failed: {}",
                    message
                );
            }
            _ => {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Authentication failed: {}",
                    message
                );
            }
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

/// The caller a request is attributed to.
///
/// Inserted into request extensions by the authentication middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Token Authentication
// =============================================================================

/// Bearer token authenticator using HMAC-SHA256.
#[derive(Clone)]
pub struct TokenAuth {
    secret_key: Vec<u8>,
}

impl TokenAuth {
    /// Create a new authenticator with the given secret key.
    ///
    /// # Arguments
    ///
    /// * `secret_key` - The secret key used for HMAC computation. Should be
    ///   at least 32 bytes for security.
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            secret_key: secret_key.as_ref().to_vec(),
        }
    }

    /// Mint a token for `identity` valid for `ttl`.
    ///
    /// Returns the token and its expiry timestamp (Unix epoch seconds).
    pub fn sign(&self, identity: &str, ttl: Duration) -> (String, u64) {
        let expiry = unix_now().saturating_add(ttl.as_secs());
        (self.sign_with_expiry(identity, expiry), expiry)
    }

    /// Mint a token with a specific expiry timestamp.
    pub fn sign_with_expiry(&self, identity: &str, expiry: u64) -> String {
        format!(
            "{}.{}.{}",
            identity,
            expiry,
            self.compute_signature(identity, expiry)
        )
    }

    /// Verify a token and return the identity it names.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let mut parts = token.rsplitn(3, '.');
        let signature = parts.next().ok_or(AuthError::MalformedToken)?;
        let expiry = parts.next().ok_or(AuthError::MalformedToken)?;
        let identity = parts.next().ok_or(AuthError::MalformedToken)?;

        if identity.is_empty() || signature.is_empty() {
            return Err(AuthError::MalformedToken);
        }

        let expiry = expiry
            .parse::<u64>()
            .map_err(|_| AuthError::InvalidExpiryFormat)?;

        // Check expiry first
        let current_time = unix_now();
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }

        let provided_sig = hex::decode(signature).map_err(|_| AuthError::InvalidSignatureFormat)?;
        let expected_sig = self.mac(identity, expiry);

        if provided_sig.ct_eq(&expected_sig).into() {
            Ok(identity.to_string())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }

    fn compute_signature(&self, identity: &str, expiry: u64) -> String {
        hex::encode(self.mac(identity, expiry))
    }

    fn mac(&self, identity: &str, expiry: u64) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret_key).expect("HMAC can take key of any size");
        mac.update(format!("{}:{}", identity, expiry).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Extract the token from an `Authorization: Bearer ...` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedToken)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedToken);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// How callers are attributed when authentication is disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Prefer the first `X-Forwarded-For` hop over the socket address.
    ///
    /// Only set this behind a reverse proxy that overwrites the header;
    /// otherwise clients pick their own address.
    pub trust_forwarded_for: bool,
}

impl ClientIdentity {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self {
            trust_forwarded_for,
        }
    }

    /// Identity for a request that carries no verified token.
    pub fn resolve(&self, request: &Request) -> String {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(user) = header(USER_ID_HEADER) {
            return user.to_string();
        }

        if self.trust_forwarded_for {
            let hop = header(FORWARDED_FOR_HEADER)
                .and_then(|chain| chain.split(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty());
            if let Some(hop) = hop {
                return hop.to_string();
            }
        }

        client_address(request).unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

/// IP address of the connected peer, when the server records it.
pub fn client_address(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Axum middleware verifying bearer tokens.
///
/// On success the verified [`Identity`] is attached to the request; on
/// failure the request is rejected before reaching any handler.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, middleware};
/// use pixel_press::server::auth::{TokenAuth, auth_middleware};
///
/// let auth = TokenAuth::new("secret-key");
/// let app = Router::new()
///     .route("/api/compress", post(compress_handler))
///     .layer(middleware::from_fn_with_state(auth, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(auth): State<TokenAuth>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = auth.verify(bearer_token(request.headers())?)?;
    request.extensions_mut().insert(Identity(identity));

    Ok(next.run(request).await)
}

/// Axum middleware attributing requests without verifying anything.
///
/// **Warning**: callers choose their own identity. Development only.
pub async fn header_identity_middleware(
    State(client): State<ClientIdentity>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = client.resolve(&request);
    request.extensions_mut().insert(Identity(identity));

    next.run(request).await
}

// =============================================================================
// Tests
// =============================================================================
