//! HTTP request handlers for the Pixel Press API.
//!
//! # Endpoints
//!
//! - `POST /api/compress` - Compress an image
//! - `POST /api/crop` - Crop, rotate and re-encode an image
//! - `GET /api/usage` - Usage for the current month
//! - `GET /health` - Health check endpoint

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::{ProcessError, RateLimited};
use crate::policy::{CompressionRequest, CropRequest, FormFields, Upload};
use crate::service::{CompressionService, ProcessedImage, UsageReport};
use crate::usage::QuotaGate;

use super::auth::Identity;

/// Multipart field carrying the upload
pub const FILE_FIELD: &str = "file";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the compression service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<Q> {
    /// The service running compress and crop requests
    pub service: CompressionService<Q>,

    /// Largest accepted request body in bytes
    pub max_body_size: usize,
}

impl<Q: QuotaGate + 'static> AppState<Q> {
    /// Create a new application state with the given service.
    pub fn new(service: CompressionService<Q>, max_body_size: usize) -> Self {
        Self {
            service,
            max_body_size,
        }
    }
}

impl<Q> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "quota_exceeded", "no_file_provided")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Structured extras, such as quota counters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
            details: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Whether AVIF output is available
    pub avif: bool,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ProcessError to HTTP response.
///
/// 5xx errors are logged at ERROR level, quota and size rejections at DEBUG
/// (they are expected in normal operation), other client errors at WARN.
impl IntoResponse for ProcessError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ProcessError::NoFileProvided => (StatusCode::BAD_REQUEST, "no_file_provided"),
            ProcessError::InvalidCropParameters { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_crop_parameters")
            }
            ProcessError::MalformedForm { .. } => (StatusCode::BAD_REQUEST, "malformed_form"),
            ProcessError::InvalidImage { .. } => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_image")
            }
            ProcessError::FileTooLarge { .. } | ProcessError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large")
            }
            ProcessError::QuotaExceeded { .. } => (StatusCode::PAYMENT_REQUIRED, "quota_exceeded"),
            ProcessError::EncodingFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encoding_failure")
            }
        };
        let message = self.to_string();

        // Log errors based on severity
        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if matches!(
            status,
            StatusCode::PAYMENT_REQUIRED | StatusCode::PAYLOAD_TOO_LARGE
        ) {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Request rejected: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let details = match &self {
            ProcessError::QuotaExceeded { used, limit } => {
                Some(json!({ "used": used, "limit": limit }))
            }
            ProcessError::FileTooLarge { size, limit } => {
                Some(json!({ "size": size, "limit": limit }))
            }
            ProcessError::InvalidCropParameters { field, .. } => Some(json!({ "field": field })),
            _ => None,
        };

        let mut error_response = ErrorResponse::with_status(error_type, message, status);
        error_response.details = details;

        (status, Json(error_response)).into_response()
    }
}

/// Convert a rate-limit rejection to `429 Too Many Requests`.
impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let status = StatusCode::TOO_MANY_REQUESTS;
        let error_response = ErrorResponse::with_status("rate_limited", self.to_string(), status)
            .with_details(json!({ "retry_after": self.retry_after }));

        (
            status,
            [(header::RETRY_AFTER, HeaderValue::from(self.retry_after))],
            Json(error_response),
        )
            .into_response()
    }
}

// =============================================================================
// Multipart
// =============================================================================

/// Read a multipart body into loosely-typed form fields.
///
/// The part named `file` is the upload; every other part is read as text.
/// Unknown fields are kept but never looked at.
pub async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
    max_body_size: usize,
) -> Result<FormFields, ProcessError> {
    let mut multipart = multipart.map_err(|rejection| ProcessError::MalformedForm {
        message: rejection.body_text(),
    })?;

    let too_large = |status: StatusCode| status == StatusCode::PAYLOAD_TOO_LARGE;
    let mut form = FormFields::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) if too_large(err.status()) => {
                return Err(ProcessError::PayloadTooLarge {
                    limit: max_body_size as u64,
                })
            }
            Err(err) => {
                return Err(ProcessError::MalformedForm {
                    message: err.body_text(),
                })
            }
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == FILE_FIELD {
            let media_type = field.content_type().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map_err(|err| {
                if too_large(err.status()) {
                    ProcessError::PayloadTooLarge {
                        limit: max_body_size as u64,
                    }
                } else {
                    ProcessError::MalformedForm {
                        message: err.body_text(),
                    }
                }
            })?;

            // First file part wins
            if form.file.is_none() {
                let mut upload = Upload::new(bytes);
                upload.media_type = media_type;
                upload.file_name = file_name;
                form.file = Some(upload);
            }
        } else {
            let value = field.text().await.map_err(|err| ProcessError::MalformedForm {
                message: err.body_text(),
            })?;
            form.insert(name, value);
        }
    }

    Ok(form)
}

// =============================================================================
// Image Response
// =============================================================================

const X_OUTPUT_FORMAT: &str = "x-output-format";
const X_ENCODER_QUALITY: &str = "x-encoder-quality";
const X_UI_QUALITY: &str = "x-ui-quality";
const X_ORIGINAL_SIZE: &str = "x-original-size";
const X_OUTPUT_SIZE: &str = "x-output-size";
const X_SAVINGS_PERCENT: &str = "x-savings-percent";
const X_QUOTA_USED: &str = "x-quota-used";
const X_QUOTA_LIMIT: &str = "x-quota-limit";

/// Headers exposed to browsers through CORS.
pub const EXPOSED_HEADERS: [&str; 8] = [
    X_OUTPUT_FORMAT,
    X_ENCODER_QUALITY,
    X_UI_QUALITY,
    X_ORIGINAL_SIZE,
    X_OUTPUT_SIZE,
    X_SAVINGS_PERCENT,
    X_QUOTA_USED,
    X_QUOTA_LIMIT,
];

/// Build the binary response for a processed image.
pub fn image_response(processed: ProcessedImage) -> Response {
    let result = &processed.outcome.result;
    let mut headers = HeaderMap::new();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&processed.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&processed.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let mut set = |name: &'static str, value: HeaderValue| {
        headers.insert(HeaderName::from_static(name), value);
    };
    set(
        X_OUTPUT_FORMAT,
        HeaderValue::from_static(result.output_format.label()),
    );
    set(
        X_ENCODER_QUALITY,
        HeaderValue::from(u16::from(processed.outcome.encoder_quality)),
    );
    set(
        X_UI_QUALITY,
        HeaderValue::from(u16::from(processed.outcome.ui_quality)),
    );
    set(X_ORIGINAL_SIZE, HeaderValue::from(result.original_size));
    set(X_OUTPUT_SIZE, HeaderValue::from(result.output_size));
    set(
        X_SAVINGS_PERCENT,
        HeaderValue::from(u16::from(result.savings_percent)),
    );
    set(X_QUOTA_USED, HeaderValue::from(processed.quota.used));
    set(X_QUOTA_LIMIT, HeaderValue::from(processed.quota.limit));

    let body = Body::from(processed.outcome.result.bytes);
    (StatusCode::OK, headers, body).into_response()
}

/// `inline` disposition with an ASCII fallback name and an RFC 5987 name.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle compress requests.
///
/// # Endpoint
///
/// `POST /api/compress` (multipart/form-data)
///
/// # Form Fields
///
/// - `file`: the image (required)
/// - `quality`: 1-100 (default: 80)
/// - `format`: `auto`, `jpeg`, `png`, `webp` or `avif` (default: `auto`)
///
/// # Response
///
/// - `200 OK`: the smallest encoding, or the upload itself if nothing was smaller
/// - `400 Bad Request`: no file
/// - `402 Payment Required`: monthly quota exhausted
/// - `413 Payload Too Large`: upload exceeds the plan ceiling
/// - `415 Unsupported Media Type`: upload is not a decodable image
/// - `500 Internal Server Error`: encoder failure
pub async fn compress_handler<Q: QuotaGate + 'static>(
    State(state): State<AppState<Q>>,
    Extension(identity): Extension<Identity>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ProcessError> {
    let form = read_form(multipart, state.max_body_size).await?;
    let request = CompressionRequest::from_form(form)?;

    let processed = state.service.compress(identity.as_str(), request).await?;
    Ok(image_response(processed))
}

/// Handle crop requests.
///
/// # Endpoint
///
/// `POST /api/crop` (multipart/form-data)
///
/// # Form Fields
///
/// - `file`: the image (required)
/// - `x`, `y`, `width`, `height`: crop rectangle in pixels (required)
/// - `rotation`: clockwise degrees applied before cropping (default: 0)
/// - `quality`: 40-95 (default: 90)
/// - `format`: `original`, `jpeg`, `png`, `webp` or `avif` (default: `original`)
///
/// Out-of-range rectangles are clamped into the image, never rejected.
pub async fn crop_handler<Q: QuotaGate + 'static>(
    State(state): State<AppState<Q>>,
    Extension(identity): Extension<Identity>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ProcessError> {
    let form = read_form(multipart, state.max_body_size).await?;
    let request = CropRequest::from_form(form)?;

    let processed = state.service.crop(identity.as_str(), request).await?;
    Ok(image_response(processed))
}

/// Handle usage requests.
///
/// # Endpoint
///
/// `GET /api/usage`
///
/// # Response
///
/// ```json
/// {
///   "identity": "alice@example.com",
///   "plan": "free",
///   "period": "2025-01",
///   "used": 12,
///   "limit": 50,
///   "max_file_size": 10485760
/// }
/// ```
pub async fn usage_handler<Q: QuotaGate + 'static>(
    State(state): State<AppState<Q>>,
    Extension(identity): Extension<Identity>,
) -> Json<UsageReport> {
    Json(state.service.usage(identity.as_str()).await)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "avif": true
/// }
/// ```
pub async fn health_handler<Q: QuotaGate + 'static>(
    State(state): State<AppState<Q>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        avif: state.service.supports_avif(),
    })
}
