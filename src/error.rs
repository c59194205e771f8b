use thiserror::Error;

use crate::policy::EncodeFormat;

/// Errors raised by the image codec layer.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// The upload could not be decoded as an image
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// The encoder backend was built without support for this format
    #[error("Encoder does not support {0}")]
    Unsupported(EncodeFormat),

    /// The encoder backend failed while producing output
    #[error("Failed to encode {format}: {message}")]
    Encode {
        format: EncodeFormat,
        message: String,
    },
}

/// Errors that end a compress or crop request.
///
/// Every variant is terminal for the request. None of them are retried.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The multipart form carried no `file` field, or it was empty
    #[error("No file provided")]
    NoFileProvided,

    /// A crop coordinate was missing, non-numeric or not finite
    #[error("Invalid crop parameter `{field}`: {message}")]
    InvalidCropParameters { field: &'static str, message: String },

    /// The upload exceeds the caller's plan ceiling
    #[error("File too large: {size} bytes (plan limit is {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    /// The monthly usage quota is exhausted
    #[error("Monthly quota exceeded: {used} of {limit} images used")]
    QuotaExceeded { used: u64, limit: u64 },

    /// The upload is not an image the decoder understands
    #[error("Unsupported image: {message}")]
    InvalidImage { message: String },

    /// The encoder failed for a candidate that was not allowed to fail
    #[error("Encoding failed: {message}")]
    EncodingFailure { message: String },

    /// The request body was not a readable multipart form
    #[error("Malformed form: {message}")]
    MalformedForm { message: String },

    /// The request body exceeded the server-wide body limit
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
}

/// A request-volume rejection, independent of the monthly quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Too many requests, retry in {retry_after} seconds")]
pub struct RateLimited {
    /// Seconds until the current window closes
    pub retry_after: u64,
}

impl From<EncodeError> for ProcessError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::Decode { message } => ProcessError::InvalidImage { message },
            other => ProcessError::EncodingFailure {
                message: other.to_string(),
            },
        }
    }
}
