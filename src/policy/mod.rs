//! Compression policy.
//!
//! This module decides which encodings to try and which one to return. It
//! owns no pixels itself: all decoding and encoding goes through an
//! [`ImageCodec`].
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    decode    │──▶│    remap     │──▶│  candidates  │──▶│    select    │
//! │ (+ orient)   │   │   quality    │   │ (rule list)  │   │ (no inflate) │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Crops follow their own path in [`crop`]: orient, rotate, clamp the
//! rectangle, extract, then a single encoding in the resolved format.
//!
//! # Components
//!
//! - [`QualityCurve`]: slider-to-encoder quality mapping
//! - [`generate_candidates`]: ordered candidate rules with silent AVIF gap
//! - [`select_best`]: smallest candidate, or the original bytes
//! - [`resolve_region`]: permissive crop rectangle clamping

pub mod candidates;
pub mod crop;
pub mod format;
pub mod quality;
pub mod request;
pub mod select;

pub use candidates::{generate_candidates, planned_settings, Candidate, CandidateContext};
pub use crop::{resolve_crop_format, resolve_region, CropRect, CropRegion};
pub use format::{EncodeFormat, OutputFormat, RequestedFormat};
pub use quality::{
    parse_ui_quality, QualityCurve, DEFAULT_COMPRESS_QUALITY, DEFAULT_CROP_QUALITY,
    DEFAULT_NEAR_LOSSLESS_THRESHOLD, DEFAULT_QUALITY_ANCHORS, DEFAULT_QUALITY_CEILING,
    DEFAULT_QUALITY_FLOOR, MAX_CROP_QUALITY, MAX_UI_QUALITY, MIN_CROP_QUALITY, MIN_UI_QUALITY,
};
pub use request::{CompressionRequest, CropRequest, FormFields, Upload};
pub use select::{savings_percent, select_best, CompressionResult};

use tracing::debug;

use crate::codec::{transform, ImageCodec};
use crate::error::ProcessError;

/// A finished policy run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub result: CompressionResult,
    /// Quality handed to the encoder after remapping
    pub encoder_quality: u8,
    /// Slider quality as received (after clamping)
    pub ui_quality: u8,
}

/// Run the whole-image compression policy.
///
/// Decodes once, encodes every applicable candidate, and returns the smallest
/// one, or the untouched source if no candidate is smaller.
pub fn compress(
    codec: &dyn ImageCodec,
    curve: &QualityCurve,
    request: &CompressionRequest,
) -> Result<PolicyOutcome, ProcessError> {
    let image = codec.decode(&request.source)?;

    let encoder_quality = curve.remap(f64::from(request.ui_quality));
    let ctx = CandidateContext {
        requested: request.requested_format,
        has_alpha: transform::has_alpha(&image),
        encoder_quality,
        near_lossless: curve.near_lossless(encoder_quality),
    };

    let candidates = generate_candidates(codec, &image, &ctx)?;
    debug!(
        candidates = candidates.len(),
        source_size = request.source.len(),
        "Generated candidates"
    );

    Ok(PolicyOutcome {
        result: select_best(request.source.clone(), candidates),
        encoder_quality,
        ui_quality: request.ui_quality,
    })
}

// =============================================================================
// Test Support
// =============================================================================


// =============================================================================
// Tests
// =============================================================================
