//! Best-candidate selection and the no-inflation guard.

use bytes::Bytes;

use super::candidates::Candidate;
use super::format::{EncodeFormat, OutputFormat};

/// Final output of a compress or crop request.
///
/// Results built by [`select_best`] never exceed the source:
/// `output_size <= original_size`. [`CompressionResult::encoded`] carries no
/// such guarantee. A crop is a single encoding with no fallback to the
/// source, so its output may be larger than the upload; `savings_percent`
/// is then 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionResult {
    pub output_format: OutputFormat,
    pub bytes: Bytes,
    pub original_size: u64,
    pub output_size: u64,
    /// `round((1 - output/original) * 100)`, clamped to 0-100
    pub savings_percent: u8,
}

impl CompressionResult {
    /// The source returned unchanged.
    pub fn original(source: Bytes) -> Self {
        let size = source.len() as u64;
        Self {
            output_format: OutputFormat::Original,
            bytes: source,
            original_size: size,
            output_size: size,
            savings_percent: 0,
        }
    }

    /// A fresh encoding of a source that was `original_size` bytes long.
    ///
    /// The encoding may be larger than the source.
    pub fn encoded(format: EncodeFormat, bytes: Bytes, original_size: u64) -> Self {
        let output_size = bytes.len() as u64;
        Self {
            output_format: format.into(),
            bytes,
            original_size,
            output_size,
            savings_percent: savings_percent(original_size, output_size),
        }
    }
}

/// Percentage saved, rounded and clamped to 0-100.
pub fn savings_percent(original_size: u64, output_size: u64) -> u8 {
    if original_size == 0 {
        return 0;
    }
    let ratio = 1.0 - output_size as f64 / original_size as f64;
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Pick the smallest candidate, or the source if nothing beats it.
///
/// Candidates are stably sorted by length, so on a tie the earlier rule wins.
/// A candidate that is the same size as the source or bigger is discarded:
/// the result is never larger than the input.
pub fn select_best(source: Bytes, mut candidates: Vec<Candidate>) -> CompressionResult {
    candidates.sort_by_key(|candidate| candidate.len());

    match candidates.into_iter().next() {
        Some(best) if best.len() < source.len() => {
            CompressionResult::encoded(best.format, best.bytes, source.len() as u64)
        }
        _ => CompressionResult::original(source),
    }
}
