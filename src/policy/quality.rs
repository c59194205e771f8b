//! Quality remapping.
//!
//! Callers pick a quality on a 1-100 slider that is meant to feel linear.
//! Encoders do not: their bottom end is unusable and their top end buys almost
//! nothing. [`QualityCurve`] maps the slider onto the band the encoders are
//! actually useful in.
//!
//! The curve is a monotone piecewise-linear function through a set of anchor
//! points, clamped to `[floor, ceiling]`. The default anchors meet the
//! straight line `35 + q * 0.57` at both ends of the slider and bend upward in
//! the middle so that 50 lands on 68 and 80 on 87.

/// Lowest slider value.
pub const MIN_UI_QUALITY: u8 = 1;

/// Highest slider value.
pub const MAX_UI_QUALITY: u8 = 100;

/// Slider default for whole-image compression.
pub const DEFAULT_COMPRESS_QUALITY: u8 = 80;

/// Slider default for crops.
pub const DEFAULT_CROP_QUALITY: u8 = 90;

/// Crop accepts a narrower slider range than compression.
pub const MIN_CROP_QUALITY: u8 = 40;

/// Upper end of the crop slider range.
pub const MAX_CROP_QUALITY: u8 = 95;

/// Lowest encoder quality the curve will emit.
pub const DEFAULT_QUALITY_FLOOR: u8 = 35;

/// Highest encoder quality the curve will emit.
pub const DEFAULT_QUALITY_CEILING: u8 = 92;

/// Encoder quality at or above which WebP switches to near-lossless mode.
pub const DEFAULT_NEAR_LOSSLESS_THRESHOLD: u8 = 86;

/// Default anchors as `slider:encoder` pairs.
pub const DEFAULT_QUALITY_ANCHORS: &str = "1:36,50:68,80:87,100:92";

const DEFAULT_ANCHORS: [(f64, f64); 4] = [(1.0, 36.0), (50.0, 68.0), (80.0, 87.0), (100.0, 92.0)];

// =============================================================================
// Quality Curve
// =============================================================================

/// Mapping from slider quality to encoder quality.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityCurve {
    anchors: Vec<(f64, f64)>,
    floor: u8,
    ceiling: u8,
    near_lossless_threshold: u8,
}

impl Default for QualityCurve {
    fn default() -> Self {
        Self {
            anchors: DEFAULT_ANCHORS.to_vec(),
            floor: DEFAULT_QUALITY_FLOOR,
            ceiling: DEFAULT_QUALITY_CEILING,
            near_lossless_threshold: DEFAULT_NEAR_LOSSLESS_THRESHOLD,
        }
    }
}

impl QualityCurve {
    /// Build a curve from explicit anchors.
    ///
    /// Anchors must have strictly increasing slider values inside 1-100 and
    /// non-decreasing encoder values, which keeps the curve monotone.
    pub fn new(
        anchors: Vec<(f64, f64)>,
        floor: u8,
        ceiling: u8,
        near_lossless_threshold: u8,
    ) -> Result<Self, String> {
        if anchors.len() < 2 {
            return Err("quality curve needs at least two anchors".to_string());
        }
        if floor == 0 || ceiling > 100 || floor >= ceiling {
            return Err(format!(
                "quality floor/ceiling must satisfy 1 <= floor < ceiling <= 100 (got {}/{})",
                floor, ceiling
            ));
        }
        for window in anchors.windows(2) {
            let (a, b) = (window[0], window[1]);
            if b.0 <= a.0 {
                return Err("anchor slider values must be strictly increasing".to_string());
            }
            if b.1 < a.1 {
                return Err("anchor encoder values must not decrease".to_string());
            }
        }
        for &(x, y) in &anchors {
            if !x.is_finite() || !y.is_finite() {
                return Err("anchors must be finite numbers".to_string());
            }
            if !(f64::from(MIN_UI_QUALITY)..=f64::from(MAX_UI_QUALITY)).contains(&x) {
                return Err(format!("anchor slider value {} is outside 1-100", x));
            }
        }

        Ok(Self {
            anchors,
            floor,
            ceiling,
            near_lossless_threshold,
        })
    }

    /// A straight line `intercept + q * slope` clamped to `[floor, ceiling]`.
    pub fn linear(intercept: f64, slope: f64, floor: u8, ceiling: u8) -> Result<Self, String> {
        if slope.is_nan() || slope <= 0.0 {
            return Err("linear quality curve needs a positive slope".to_string());
        }
        let lo = f64::from(MIN_UI_QUALITY);
        let hi = f64::from(MAX_UI_QUALITY);
        Self::new(
            vec![(lo, intercept + lo * slope), (hi, intercept + hi * slope)],
            floor,
            ceiling,
            DEFAULT_NEAR_LOSSLESS_THRESHOLD,
        )
    }

    /// Parse anchors written as `"1:36,50:68,80:87,100:92"`.
    pub fn parse_anchors(text: &str) -> Result<Vec<(f64, f64)>, String> {
        text.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (x, y) = part
                    .split_once(':')
                    .ok_or_else(|| format!("anchor `{}` is not in slider:encoder form", part))?;
                let x: f64 = x
                    .trim()
                    .parse()
                    .map_err(|_| format!("anchor `{}` has a non-numeric slider value", part))?;
                let y: f64 = y
                    .trim()
                    .parse()
                    .map_err(|_| format!("anchor `{}` has a non-numeric encoder value", part))?;
                Ok((x, y))
            })
            .collect()
    }

    /// Replace the near-lossless threshold.
    pub fn with_near_lossless_threshold(mut self, threshold: u8) -> Self {
        self.near_lossless_threshold = threshold;
        self
    }

    /// Map a slider value to an encoder quality.
    ///
    /// Never fails. Out-of-range input is clamped to 1-100 and rounded; a
    /// non-finite value is treated as the bottom of the slider.
    pub fn remap(&self, ui_quality: f64) -> u8 {
        let ui = if ui_quality.is_finite() {
            ui_quality
                .clamp(f64::from(MIN_UI_QUALITY), f64::from(MAX_UI_QUALITY))
                .round()
        } else {
            f64::from(MIN_UI_QUALITY)
        };

        let mapped = self.interpolate(ui).round();
        mapped.clamp(f64::from(self.floor), f64::from(self.ceiling)) as u8
    }

    /// Whether WebP should run in near-lossless mode at this encoder quality.
    pub fn near_lossless(&self, encoder_quality: u8) -> bool {
        encoder_quality >= self.near_lossless_threshold
    }

    pub fn floor(&self) -> u8 {
        self.floor
    }

    pub fn ceiling(&self) -> u8 {
        self.ceiling
    }

    pub fn near_lossless_threshold(&self) -> u8 {
        self.near_lossless_threshold
    }

    pub fn anchors(&self) -> &[(f64, f64)] {
        &self.anchors
    }

    fn interpolate(&self, x: f64) -> f64 {
        let first = self.anchors[0];
        let last = self.anchors[self.anchors.len() - 1];
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }

        for window in self.anchors.windows(2) {
            let ((x0, y0), (x1, y1)) = (window[0], window[1]);
            if x <= x1 {
                let t = (x - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }
}

/// Parse a slider value from a form field, clamped to `[min, max]`.
///
/// Missing, blank, non-numeric or non-finite input yields `default`;
/// fractional input is rounded to the nearest integer.
pub fn parse_ui_quality(raw: Option<&str>, default: u8, min: u8, max: u8) -> u8 {
    let parsed = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite());

    match parsed {
        Some(value) => value.round().clamp(f64::from(min), f64::from(max)) as u8,
        None => default.clamp(min, max),
    }
}

// =============================================================================
// Tests
// =============================================================================
