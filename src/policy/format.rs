//! Output and requested formats.
//!
//! Three distinct notions of "format" flow through a request:
//!
//! - [`RequestedFormat`]: what the caller asked for in the `format` form field
//! - [`EncodeFormat`]: a format the encoder can actually produce
//! - [`OutputFormat`]: what the response carries, including the
//!   [`OutputFormat::Original`] sentinel for "the input bytes, unchanged"

use std::fmt;

// =============================================================================
// Encode Format
// =============================================================================

/// A format the encoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl EncodeFormat {
    /// Upper-case label used in response headers.
    pub fn label(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "JPEG",
            EncodeFormat::Png => "PNG",
            EncodeFormat::Webp => "WEBP",
            EncodeFormat::Avif => "AVIF",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
            EncodeFormat::Webp => "image/webp",
            EncodeFormat::Avif => "image/avif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "jpg",
            EncodeFormat::Png => "png",
            EncodeFormat::Webp => "webp",
            EncodeFormat::Avif => "avif",
        }
    }
}

impl fmt::Display for EncodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Output Format
// =============================================================================

/// The format of a finished result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// The source bytes were returned verbatim
    Original,
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Original => "ORIGINAL",
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::Png => "PNG",
            OutputFormat::Webp => "WEBP",
            OutputFormat::Avif => "AVIF",
        }
    }

    /// The encodable format behind this output, if any.
    pub fn encode_format(&self) -> Option<EncodeFormat> {
        match self {
            OutputFormat::Original => None,
            OutputFormat::Jpeg => Some(EncodeFormat::Jpeg),
            OutputFormat::Png => Some(EncodeFormat::Png),
            OutputFormat::Webp => Some(EncodeFormat::Webp),
            OutputFormat::Avif => Some(EncodeFormat::Avif),
        }
    }

    /// Guess the container of an upload from its declared media type.
    ///
    /// Anything that is not one of the four encodable types maps to
    /// [`OutputFormat::Original`].
    pub fn from_media_type(media_type: Option<&str>) -> Self {
        let essence = media_type
            .and_then(|m| m.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase());

        match essence.as_deref() {
            Some("image/png") => OutputFormat::Png,
            Some("image/webp") => OutputFormat::Webp,
            Some("image/avif") => OutputFormat::Avif,
            Some("image/jpeg") => OutputFormat::Jpeg,
            _ => OutputFormat::Original,
        }
    }
}

impl From<EncodeFormat> for OutputFormat {
    fn from(format: EncodeFormat) -> Self {
        match format {
            EncodeFormat::Jpeg => OutputFormat::Jpeg,
            EncodeFormat::Png => OutputFormat::Png,
            EncodeFormat::Webp => OutputFormat::Webp,
            EncodeFormat::Avif => OutputFormat::Avif,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Requested Format
// =============================================================================

/// The `format` form field, parsed.
///
/// Parsing never fails. Strings outside the known set become
/// [`RequestedFormat::Unrecognized`], which the candidate rules and the crop
/// resolver each handle with their own fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedFormat {
    Auto,
    Jpeg,
    Png,
    Webp,
    Avif,
    /// Keep the upload's container (crop only)
    Original,
    Unrecognized,
}

impl RequestedFormat {
    /// Parse a form value. A missing or blank value yields `default`.
    pub fn parse(raw: Option<&str>, default: RequestedFormat) -> Self {
        let value = match raw.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_ascii_lowercase(),
            _ => return default,
        };

        match value.as_str() {
            "auto" => RequestedFormat::Auto,
            "jpg" | "jpeg" => RequestedFormat::Jpeg,
            "png" => RequestedFormat::Png,
            "webp" => RequestedFormat::Webp,
            "avif" => RequestedFormat::Avif,
            "original" => RequestedFormat::Original,
            _ => RequestedFormat::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestedFormat::Auto => "auto",
            RequestedFormat::Jpeg => "jpeg",
            RequestedFormat::Png => "png",
            RequestedFormat::Webp => "webp",
            RequestedFormat::Avif => "avif",
            RequestedFormat::Original => "original",
            RequestedFormat::Unrecognized => "unrecognized",
        }
    }
}
