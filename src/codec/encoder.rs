//! Image codec backed by the `image` crate.
//!
//! # Design Decisions
//!
//! - **Orientation on decode**: EXIF orientation is applied when decoding.
//!   Re-encoded output carries no EXIF, so skipping this would visibly rotate
//!   photos taken in portrait.
//!
//! - **8-bit output**: every encoder here is fed 8-bit RGB or RGBA. Higher
//!   bit depths and float images are narrowed first.
//!
//! - **PNG**: `image` writes the stream, then `oxipng` reduces palette, bit
//!   depth and colour type and recompresses it.
//!
//! - **WebP**: encoded with libwebp through the `webp` crate so quality and
//!   near-lossless preprocessing are honoured.
//!
//! - **AVIF is optional**: AVIF support is a cargo feature. Without it the
//!   codec reports [`EncodeError::Unsupported`] and callers decide whether
//!   that matters.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use oxipng::StripChunks;

use crate::error::EncodeError;
use crate::policy::EncodeFormat;

use super::transform::to_rgb_or_rgba8;

/// rav1e speed preset (1 = slowest/smallest, 10 = fastest).
#[cfg(feature = "avif")]
pub const AVIF_SPEED: u8 = 7;

/// oxipng optimisation preset (0 = fastest, 6 = smallest).
pub const PNG_OPTIMIZE_PRESET: u8 = 2;

/// Upper bound on the time oxipng spends on one image.
pub const PNG_OPTIMIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// libwebp compression method (0 = fastest, 6 = smallest).
pub const WEBP_METHOD: i32 = 4;

// =============================================================================
// Encode Settings
// =============================================================================

/// Parameters for one encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeSettings {
    /// Lossy JPEG at the given quality. Alpha is discarded.
    Jpeg { quality: u8 },

    /// Lossless PNG with palette, bit-depth and colour-type reduction.
    Png,

    /// Lossy WebP at the given quality. In near-lossless mode the image is
    /// also coded losslessly after near-lossless preprocessing at that
    /// quality, and the smaller of the two is kept.
    Webp { quality: u8, near_lossless: bool },

    /// AVIF at the given quality.
    Avif { quality: u8 },
}

impl EncodeSettings {
    pub fn format(&self) -> EncodeFormat {
        match self {
            EncodeSettings::Jpeg { .. } => EncodeFormat::Jpeg,
            EncodeSettings::Png => EncodeFormat::Png,
            EncodeSettings::Webp { .. } => EncodeFormat::Webp,
            EncodeSettings::Avif { .. } => EncodeFormat::Avif,
        }
    }
}

// =============================================================================
// Codec Trait
// =============================================================================

/// The encoder capability the compression policy drives.
///
/// Implementations must be usable from the blocking thread pool, hence
/// `Send + Sync`.
pub trait ImageCodec: Send + Sync {
    /// Decode an upload and apply its EXIF orientation.
    fn decode(&self, source: &[u8]) -> Result<DynamicImage, EncodeError>;

    /// Encode an image with the given settings.
    fn encode(&self, image: &DynamicImage, settings: &EncodeSettings)
        -> Result<Bytes, EncodeError>;

    /// Whether this codec can produce the given format at all.
    fn supports(&self, format: EncodeFormat) -> bool;
}

// =============================================================================
// Standard Codec
// =============================================================================

/// Codec built on the `image` crate, with `oxipng` for PNG and libwebp for
/// WebP.
#[derive(Debug, Clone, Default)]
pub struct StandardCodec {}

impl StandardCodec {
    pub fn new() -> Self {
        Self {}
    }

    fn encode_jpeg(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let rgb = image.to_rgb8();
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100));
        encoder.encode_image(&rgb)?;
        Ok(output)
    }

    fn encode_png(&self, image: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
        // Fast first pass; oxipng recompresses the stream
        let mut output = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut output, CompressionType::Fast, PngFilterType::NoFilter);
        to_rgb_or_rgba8(image)
            .write_with_encoder(encoder)
            .map_err(|e| encode_error(EncodeFormat::Png, e))?;

        let mut options = oxipng::Options::from_preset(PNG_OPTIMIZE_PRESET);
        options.optimize_alpha = true;
        options.strip = StripChunks::Safe;
        options.timeout = Some(PNG_OPTIMIZE_TIMEOUT);

        oxipng::optimize_from_memory(&output, &options).map_err(|e| EncodeError::Encode {
            format: EncodeFormat::Png,
            message: e.to_string(),
        })
    }

    fn encode_webp(
        &self,
        image: &DynamicImage,
        quality: u8,
        near_lossless: bool,
    ) -> Result<Vec<u8>, EncodeError> {
        let pixels = to_rgb_or_rgba8(image);
        let (width, height) = (pixels.width(), pixels.height());
        let encoder = if pixels.color().has_alpha() {
            webp::Encoder::from_rgba(pixels.as_bytes(), width, height)
        } else {
            webp::Encoder::from_rgb(pixels.as_bytes(), width, height)
        };

        let mut config =
            libwebp_sys::WebPConfig::new().map_err(|_| webp_error("invalid libwebp config"))?;
        config.quality = f32::from(quality.clamp(1, 100));
        config.method = WEBP_METHOD;

        let lossy = encoder
            .encode_advanced(&config)
            .map_err(|e| webp_error(format!("{:?}", e)))?;

        if !near_lossless {
            return Ok(lossy.to_vec());
        }

        config.lossless = 1;
        config.near_lossless = i32::from(quality.clamp(0, 100));
        let near = encoder
            .encode_advanced(&config)
            .map_err(|e| webp_error(format!("{:?}", e)))?;

        if near.len() < lossy.len() {
            Ok(near.to_vec())
        } else {
            Ok(lossy.to_vec())
        }
    }

    #[cfg(feature = "avif")]
    fn encode_avif(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
        use image::codecs::avif::AvifEncoder;

        let mut output = Vec::new();
        let encoder =
            AvifEncoder::new_with_speed_quality(&mut output, AVIF_SPEED, quality.clamp(1, 100));
        to_rgb_or_rgba8(image)
            .write_with_encoder(encoder)
            .map_err(|e| encode_error(EncodeFormat::Avif, e))?;
        Ok(output)
    }

    #[cfg(not(feature = "avif"))]
    fn encode_avif(&self, _image: &DynamicImage, _quality: u8) -> Result<Vec<u8>, EncodeError> {
        Err(EncodeError::Unsupported(EncodeFormat::Avif))
    }
}

impl ImageCodec for StandardCodec {
    fn decode(&self, source: &[u8]) -> Result<DynamicImage, EncodeError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(decode_error)?;

        let mut decoder = reader.into_decoder().map_err(decode_error)?;
        let orientation = decoder
            .orientation()
            .unwrap_or(Orientation::NoTransforms);

        let mut image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
        image.apply_orientation(orientation);

        Ok(image)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        settings: &EncodeSettings,
    ) -> Result<Bytes, EncodeError> {
        let format = settings.format();
        let output = match *settings {
            EncodeSettings::Jpeg { quality } => self
                .encode_jpeg(image, quality)
                .map_err(|e| encode_error(format, e))?,
            EncodeSettings::Png => self.encode_png(image)?,
            EncodeSettings::Webp {
                quality,
                near_lossless,
            } => self.encode_webp(image, quality, near_lossless)?,
            EncodeSettings::Avif { quality } => self.encode_avif(image, quality)?,
        };

        Ok(Bytes::from(output))
    }

    fn supports(&self, format: EncodeFormat) -> bool {
        match format {
            EncodeFormat::Jpeg | EncodeFormat::Png | EncodeFormat::Webp => true,
            EncodeFormat::Avif => cfg!(feature = "avif"),
        }
    }
}

fn decode_error(err: impl std::fmt::Display) -> EncodeError {
    EncodeError::Decode {
        message: err.to_string(),
    }
}

fn webp_error(err: impl std::fmt::Display) -> EncodeError {
    EncodeError::Encode {
        format: EncodeFormat::Webp,
        message: err.to_string(),
    }
}

fn encode_error(format: EncodeFormat, err: image::ImageError) -> EncodeError {
    match err {
        image::ImageError::Unsupported(_) if format == EncodeFormat::Avif => {
            EncodeError::Unsupported(format)
        }
        other => EncodeError::Encode {
            format,
            message: other.to_string(),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
