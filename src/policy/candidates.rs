//! Candidate generation.
//!
//! A candidate is one trial encoding of the source image. Which candidates are
//! tried depends on the requested format and on whether the image has an alpha
//! channel. Each rule below is independent and yields at most one candidate;
//! they are evaluated in order:
//!
//! | Rule | Applies when | Notes |
//! |------|--------------|-------|
//! | png  | `png` | lossless, best compression |
//! | jpeg | `jpeg` and no alpha | JPEG cannot carry transparency |
//! | webp | `webp`, `auto`, `jpeg` | near-lossless at high quality |
//! | avif | `avif`, `auto` | skipped silently if the codec lacks AVIF |
//!
//! If no rule produced anything, a WebP candidate is forced.

use bytes::Bytes;
use image::DynamicImage;
use tracing::debug;

use crate::codec::{EncodeSettings, ImageCodec};
use crate::error::EncodeError;

use super::format::{EncodeFormat, RequestedFormat};

/// One trial encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub format: EncodeFormat,
    pub bytes: Bytes,
}

impl Candidate {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Inputs the candidate rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateContext {
    pub requested: RequestedFormat,
    pub has_alpha: bool,
    pub encoder_quality: u8,
    pub near_lossless: bool,
}

// =============================================================================
// Rules
// =============================================================================

struct CandidateRule {
    name: &'static str,
    applies: fn(&CandidateContext) -> bool,
    settings: fn(&CandidateContext) -> EncodeSettings,
    /// An unsupported format is skipped instead of failing the request
    optional: bool,
}

const RULES: [CandidateRule; 4] = [
    CandidateRule {
        name: "png",
        applies: |ctx| ctx.requested == RequestedFormat::Png,
        settings: |_| EncodeSettings::Png,
        optional: false,
    },
    CandidateRule {
        name: "jpeg",
        applies: |ctx| ctx.requested == RequestedFormat::Jpeg && !ctx.has_alpha,
        settings: |ctx| EncodeSettings::Jpeg {
            quality: ctx.encoder_quality,
        },
        optional: false,
    },
    CandidateRule {
        name: "webp",
        applies: |ctx| {
            matches!(
                ctx.requested,
                RequestedFormat::Webp | RequestedFormat::Auto | RequestedFormat::Jpeg
            )
        },
        settings: webp_settings,
        optional: false,
    },
    CandidateRule {
        name: "avif",
        applies: |ctx| matches!(ctx.requested, RequestedFormat::Avif | RequestedFormat::Auto),
        settings: |ctx| EncodeSettings::Avif {
            quality: ctx.encoder_quality,
        },
        optional: true,
    },
];

fn webp_settings(ctx: &CandidateContext) -> EncodeSettings {
    EncodeSettings::Webp {
        quality: ctx.encoder_quality,
        near_lossless: ctx.near_lossless,
    }
}

/// Settings of every rule that applies to `ctx`, in evaluation order.
///
/// Does not include the forced WebP fallback.
pub fn planned_settings(ctx: &CandidateContext) -> Vec<EncodeSettings> {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(ctx))
        .map(|rule| (rule.settings)(ctx))
        .collect()
}

// =============================================================================
// Generation
// =============================================================================

/// Encode every applicable candidate.
///
/// The result is never empty on success. Any encoder error other than an
/// unsupported optional format is returned as-is and ends the request.
pub fn generate_candidates(
    codec: &dyn ImageCodec,
    image: &DynamicImage,
    ctx: &CandidateContext,
) -> Result<Vec<Candidate>, EncodeError> {
    let mut candidates = Vec::with_capacity(RULES.len());

    for rule in RULES.iter().filter(|rule| (rule.applies)(ctx)) {
        let settings = (rule.settings)(ctx);
        match codec.encode(image, &settings) {
            Ok(bytes) => {
                debug!(rule = rule.name, size = bytes.len(), "Encoded candidate");
                candidates.push(Candidate {
                    format: settings.format(),
                    bytes,
                });
            }
            Err(EncodeError::Unsupported(format)) if rule.optional => {
                debug!(rule = rule.name, %format, "Encoder lacks format, skipping candidate");
            }
            Err(err) => return Err(err),
        }
    }

    if candidates.is_empty() {
        debug!(requested = ctx.requested.as_str(), "No candidates, forcing WebP");
        let settings = webp_settings(ctx);
        let bytes = codec.encode(image, &settings)?;
        candidates.push(Candidate {
            format: settings.format(),
            bytes,
        });
    }

    Ok(candidates)
}

// =============================================================================
// Tests
// =============================================================================
