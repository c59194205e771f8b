//! Crop geometry and the crop pipeline.
//!
//! Caller rectangles are never rejected for being out of bounds. They are
//! rounded and clamped into the rotated image, so a bad rectangle yields a
//! smaller or shifted region instead of an error.

use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::codec::{transform, EncodeSettings, ImageCodec};
use crate::error::{EncodeError, ProcessError};

use super::format::{EncodeFormat, OutputFormat, RequestedFormat};
use super::quality::QualityCurve;
use super::request::CropRequest;
use super::select::CompressionResult;
use super::PolicyOutcome;

/// Requested rectangle in pixels, as sent by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// In-bounds rectangle that will actually be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Clamp a caller rectangle into an `image_width` x `image_height` image.
///
/// The result is always at least 1x1 and lies fully inside the image.
pub fn resolve_region(image_width: u32, image_height: u32, rect: &CropRect) -> CropRegion {
    let image_width = image_width.max(1);
    let image_height = image_height.max(1);

    let left = clamp_round(rect.x, 0, image_width - 1);
    let top = clamp_round(rect.y, 0, image_height - 1);
    let width = clamp_round(rect.width, 1, image_width - left);
    let height = clamp_round(rect.height, 1, image_height - top);

    CropRegion {
        left,
        top,
        width,
        height,
    }
}

fn clamp_round(value: f64, min: u32, max: u32) -> u32 {
    let rounded = if value.is_finite() {
        value.round()
    } else {
        f64::from(min)
    };
    rounded.clamp(f64::from(min), f64::from(max)) as u32
}

/// Resolve the crop's target format.
///
/// `original` guesses the upload's container from its media type. Anything
/// that still does not name an encodable format becomes WebP.
pub fn resolve_crop_format(requested: RequestedFormat, media_type: Option<&str>) -> EncodeFormat {
    let target = match requested {
        RequestedFormat::Original => OutputFormat::from_media_type(media_type),
        RequestedFormat::Jpeg => OutputFormat::Jpeg,
        RequestedFormat::Png => OutputFormat::Png,
        RequestedFormat::Webp => OutputFormat::Webp,
        RequestedFormat::Avif => OutputFormat::Avif,
        RequestedFormat::Auto | RequestedFormat::Unrecognized => OutputFormat::Original,
    };

    target.encode_format().unwrap_or(EncodeFormat::Webp)
}

fn settings_for(format: EncodeFormat, quality: u8, curve: &QualityCurve) -> EncodeSettings {
    match format {
        EncodeFormat::Jpeg => EncodeSettings::Jpeg { quality },
        EncodeFormat::Png => EncodeSettings::Png,
        EncodeFormat::Webp => EncodeSettings::Webp {
            quality,
            near_lossless: curve.near_lossless(quality),
        },
        EncodeFormat::Avif => EncodeSettings::Avif { quality },
    }
}

/// Orient, rotate, clamp and extract, returning the region and the pixels.
pub fn prepare_region(
    codec: &dyn ImageCodec,
    source: &[u8],
    rect: &CropRect,
    rotation: u16,
) -> Result<(CropRegion, DynamicImage), EncodeError> {
    let image = codec.decode(source)?;
    let image = transform::rotate(image, rotation);

    let (width, height) = image.dimensions();
    let region = resolve_region(width, height, rect);
    debug!(
        width,
        height,
        left = region.left,
        top = region.top,
        region_width = region.width,
        region_height = region.height,
        "Resolved crop region"
    );

    let extracted = transform::extract(&image, region.left, region.top, region.width, region.height);
    Ok((region, transform::normalize_color(extracted)))
}

/// Run the crop policy end to end.
///
/// Produces exactly one encoding. If AVIF is the target but the codec lacks
/// it, the crop is encoded as WebP instead.
pub fn crop(
    codec: &dyn ImageCodec,
    curve: &QualityCurve,
    request: &CropRequest,
) -> Result<PolicyOutcome, ProcessError> {
    let source = &request.image;
    let (_, image) = prepare_region(codec, &source.source, &request.rect, request.rotation)?;

    let encoder_quality = curve.remap(f64::from(source.ui_quality));
    let format = resolve_crop_format(source.requested_format, source.media_type.as_deref());

    let (format, bytes) = match codec.encode(&image, &settings_for(format, encoder_quality, curve))
    {
        Ok(bytes) => (format, bytes),
        Err(EncodeError::Unsupported(EncodeFormat::Avif)) => {
            debug!("Encoder lacks AVIF, encoding crop as WebP");
            let settings = settings_for(EncodeFormat::Webp, encoder_quality, curve);
            (EncodeFormat::Webp, codec.encode(&image, &settings)?)
        }
        Err(err) => return Err(err.into()),
    };

    Ok(PolicyOutcome {
        result: CompressionResult::encoded(format, bytes, source.source_len()),
        encoder_quality,
        ui_quality: source.ui_quality,
    })
}
