//! Typed requests built from multipart form fields.
//!
//! Every field has one parse-and-clamp function. Optional fields fall back
//! to a default when missing or unreadable; crop coordinates are required
//! and reject anything that is not a finite number.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::ProcessError;

use super::crop::CropRect;
use super::format::RequestedFormat;
use super::quality::{
    parse_ui_quality, DEFAULT_COMPRESS_QUALITY, DEFAULT_CROP_QUALITY, MAX_CROP_QUALITY,
    MAX_UI_QUALITY, MIN_CROP_QUALITY, MIN_UI_QUALITY,
};

/// Largest accepted rotation in degrees.
pub const MAX_ROTATION: u16 = 360;

// =============================================================================
// Raw Form
// =============================================================================

/// An uploaded file part.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub bytes: Bytes,
    /// Declared `Content-Type` of the part
    pub media_type: Option<String>,
    pub file_name: Option<String>,
}

impl Upload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: None,
            file_name: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Loosely-typed form contents as received.
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    pub file: Option<Upload>,
    values: HashMap<String, String>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, upload: Upload) -> Self {
        self.file = Some(upload);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Record a text field. A repeated name keeps the first value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn take_file(&mut self) -> Result<Upload, ProcessError> {
        match self.file.take() {
            Some(upload) if !upload.bytes.is_empty() => Ok(upload),
            _ => Err(ProcessError::NoFileProvided),
        }
    }
}

// =============================================================================
// Compression Request
// =============================================================================

/// A whole-image compression request.
#[derive(Debug, Clone)]
pub struct CompressionRequest {
    pub source: Bytes,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
    /// Slider quality, already clamped to the endpoint's range
    pub ui_quality: u8,
    pub requested_format: RequestedFormat,
}

impl CompressionRequest {
    pub fn new(source: impl Into<Bytes>, ui_quality: u8, requested_format: RequestedFormat) -> Self {
        Self {
            source: source.into(),
            media_type: None,
            file_name: None,
            ui_quality: ui_quality.clamp(MIN_UI_QUALITY, MAX_UI_QUALITY),
            requested_format,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Build from form fields: `file` (required), `quality`, `format`.
    pub fn from_form(mut form: FormFields) -> Result<Self, ProcessError> {
        let upload = form.take_file()?;
        Ok(Self {
            source: upload.bytes,
            media_type: upload.media_type,
            file_name: upload.file_name,
            ui_quality: parse_ui_quality(
                form.get("quality"),
                DEFAULT_COMPRESS_QUALITY,
                MIN_UI_QUALITY,
                MAX_UI_QUALITY,
            ),
            requested_format: RequestedFormat::parse(form.get("format"), RequestedFormat::Auto),
        })
    }

    /// Size of the upload in bytes.
    pub fn source_len(&self) -> u64 {
        self.source.len() as u64
    }
}

// =============================================================================
// Crop Request
// =============================================================================

/// A crop request: an image plus a rectangle and a rotation.
#[derive(Debug, Clone)]
pub struct CropRequest {
    pub image: CompressionRequest,
    /// Rectangle against the rotated image, unclamped
    pub rect: CropRect,
    /// Clockwise degrees, 0-360
    pub rotation: u16,
}

impl CropRequest {
    /// The image's quality is clamped to the crop range.
    pub fn new(mut image: CompressionRequest, rect: CropRect, rotation: u16) -> Self {
        image.ui_quality = image.ui_quality.clamp(MIN_CROP_QUALITY, MAX_CROP_QUALITY);
        Self {
            image,
            rect,
            rotation: rotation.min(MAX_ROTATION),
        }
    }

    /// Build from form fields: `file`, `x`, `y`, `width`, `height` (required),
    /// `quality`, `format`, `rotation`.
    pub fn from_form(mut form: FormFields) -> Result<Self, ProcessError> {
        let upload = form.take_file()?;

        let rect = CropRect {
            x: parse_crop_number("x", form.get("x"))?,
            y: parse_crop_number("y", form.get("y"))?,
            width: parse_crop_number("width", form.get("width"))?,
            height: parse_crop_number("height", form.get("height"))?,
        };
        let rotation = parse_rotation(form.get("rotation"))?;

        let image = CompressionRequest {
            source: upload.bytes,
            media_type: upload.media_type,
            file_name: upload.file_name,
            ui_quality: parse_ui_quality(
                form.get("quality"),
                DEFAULT_CROP_QUALITY,
                MIN_CROP_QUALITY,
                MAX_CROP_QUALITY,
            ),
            requested_format: RequestedFormat::parse(
                form.get("format"),
                RequestedFormat::Original,
            ),
        };

        Ok(Self {
            image,
            rect,
            rotation,
        })
    }
}

/// Parse a required crop coordinate. Any finite number is accepted.
pub fn parse_crop_number(field: &'static str, raw: Option<&str>) -> Result<f64, ProcessError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProcessError::InvalidCropParameters {
            field,
            message: "missing".to_string(),
        })?;

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ProcessError::InvalidCropParameters {
            field,
            message: format!("`{}` is not a finite number", raw),
        }),
    }
}

/// Parse the optional rotation: missing means 0, values are rounded and
/// clamped to 0-360, non-numeric input is rejected.
pub fn parse_rotation(raw: Option<&str>) -> Result<u16, ProcessError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(0),
        Some(_) => {
            let degrees = parse_crop_number("rotation", raw)?;
            Ok(degrees.round().clamp(0.0, f64::from(MAX_ROTATION)) as u16)
        }
    }
}
