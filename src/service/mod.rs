//! Compression service.
//!
//! The service owns the request lifecycle around the pure policy:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────────────────┐
//! │ size ceiling │──▶│ quota gate   │──▶│ policy on blocking pool   │
//! │ (plan limit) │   │ (consume 1)  │   │ decode, encode, select    │
//! └──────────────┘   └──────────────┘   └───────────────────────────┘
//! ```
//!
//! Both gates run before any pixel work. A request rejected by either one
//! costs nothing but a map lookup. A request that passes the quota gate has
//! consumed one image even if encoding later fails.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::codec::{ImageCodec, StandardCodec};
use crate::error::ProcessError;
use crate::policy::{
    self, CompressionRequest, CropRequest, EncodeFormat, OutputFormat, PolicyOutcome,
    QualityCurve,
};
use crate::usage::{current_period, Plan, QuotaDecision, QuotaGate};

/// Fallback file stem when the upload had no usable name
const DEFAULT_FILE_STEM: &str = "image";

// =============================================================================
// Results
// =============================================================================

/// A processed image ready to be sent back.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub outcome: PolicyOutcome,
    /// Quota state after this request was counted
    pub quota: QuotaDecision,
    /// `Content-Type` for the response body
    pub content_type: String,
    /// Suggested download name
    pub file_name: String,
}

impl ProcessedImage {
    pub fn output_format(&self) -> OutputFormat {
        self.outcome.result.output_format
    }
}

/// Usage summary for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub identity: String,
    pub plan: Plan,
    pub period: String,
    pub used: u64,
    pub limit: u64,
    pub max_file_size: u64,
}

// =============================================================================
// Service
// =============================================================================

/// Runs compress and crop requests for authenticated identities.
pub struct CompressionService<Q> {
    quota: Arc<Q>,
    codec: Arc<dyn ImageCodec>,
    curve: Arc<QualityCurve>,
}

impl<Q> Clone for CompressionService<Q> {
    fn clone(&self) -> Self {
        Self {
            quota: Arc::clone(&self.quota),
            codec: Arc::clone(&self.codec),
            curve: Arc::clone(&self.curve),
        }
    }
}

impl<Q: QuotaGate + 'static> CompressionService<Q> {
    /// Create a service using the `image`-crate codec and the default curve.
    pub fn new(quota: Q) -> Self {
        Self::with_codec(quota, Arc::new(StandardCodec::new()), QualityCurve::default())
    }

    /// Create a service with an explicit codec and quality curve.
    pub fn with_codec(quota: Q, codec: Arc<dyn ImageCodec>, curve: QualityCurve) -> Self {
        Self {
            quota: Arc::new(quota),
            codec,
            curve: Arc::new(curve),
        }
    }

    pub fn quota(&self) -> &Q {
        &self.quota
    }

    pub fn curve(&self) -> &QualityCurve {
        &self.curve
    }

    /// Whether the codec can produce AVIF.
    pub fn supports_avif(&self) -> bool {
        self.codec.supports(EncodeFormat::Avif)
    }

    /// Compress a whole image.
    pub async fn compress(
        &self,
        identity: &str,
        request: CompressionRequest,
    ) -> Result<ProcessedImage, ProcessError> {
        let quota = self.admit(identity, request.source_len()).await?;

        let codec = Arc::clone(&self.codec);
        let curve = Arc::clone(&self.curve);
        let media_type = request.media_type.clone();
        let file_name = request.file_name.clone();

        let outcome = run_blocking(move || policy::compress(codec.as_ref(), &curve, &request))
            .await?;

        info!(
            identity,
            format = %outcome.result.output_format,
            original_size = outcome.result.original_size,
            output_size = outcome.result.output_size,
            savings = outcome.result.savings_percent,
            "Compressed image"
        );

        Ok(finish(outcome, quota, media_type, file_name))
    }

    /// Crop, rotate and re-encode an image.
    pub async fn crop(
        &self,
        identity: &str,
        request: CropRequest,
    ) -> Result<ProcessedImage, ProcessError> {
        let quota = self.admit(identity, request.image.source_len()).await?;

        let codec = Arc::clone(&self.codec);
        let curve = Arc::clone(&self.curve);
        let media_type = request.image.media_type.clone();
        let file_name = request.image.file_name.clone();

        let outcome =
            run_blocking(move || policy::crop::crop(codec.as_ref(), &curve, &request)).await?;

        info!(
            identity,
            format = %outcome.result.output_format,
            output_size = outcome.result.output_size,
            "Cropped image"
        );

        Ok(finish(outcome, quota, media_type, file_name))
    }

    /// Usage for the current period.
    pub async fn usage(&self, identity: &str) -> UsageReport {
        let plan = self.quota.plan_for(identity).await;
        let limits = self.quota.limits(plan);
        let period = current_period();
        let decision = self.quota.usage(identity, &period).await;

        UsageReport {
            identity: identity.to_string(),
            plan,
            period,
            used: decision.used,
            limit: decision.limit,
            max_file_size: limits.max_file_size,
        }
    }

    /// Apply the size ceiling, then consume one image of quota.
    async fn admit(&self, identity: &str, size: u64) -> Result<QuotaDecision, ProcessError> {
        let plan = self.quota.plan_for(identity).await;
        let limit = self.quota.limits(plan).max_file_size;
        if size > limit {
            debug!(identity, size, limit, %plan, "Upload exceeds plan ceiling");
            return Err(ProcessError::FileTooLarge { size, limit });
        }

        let period = current_period();
        let decision = self.quota.check_and_consume(identity, &period).await;
        if !decision.allowed {
            return Err(ProcessError::QuotaExceeded {
                used: decision.used,
                limit: decision.limit,
            });
        }

        Ok(decision)
    }
}

/// Run CPU-bound policy work off the async workers.
async fn run_blocking<F>(work: F) -> Result<PolicyOutcome, ProcessError>
where
    F: FnOnce() -> Result<PolicyOutcome, ProcessError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ProcessError::EncodingFailure {
            message: format!("Processing task failed: {}", err),
        })?
}

fn finish(
    outcome: PolicyOutcome,
    quota: QuotaDecision,
    media_type: Option<String>,
    file_name: Option<String>,
) -> ProcessedImage {
    let (content_type, file_name) = match outcome.result.output_format.encode_format() {
        Some(format) => (
            format.mime_type().to_string(),
            format!("{}.{}", file_stem(file_name.as_deref()), format.extension()),
        ),
        None => (
            media_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            file_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILE_STEM.to_string()),
        ),
    };

    ProcessedImage {
        outcome,
        quota,
        content_type,
        file_name,
    }
}

/// Upload name without directory or extension.
fn file_stem(file_name: Option<&str>) -> &str {
    let name = file_name
        .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n))
        .unwrap_or("");
    let stem = match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    };

    if stem.trim().is_empty() {
        DEFAULT_FILE_STEM
    } else {
        stem
    }
}
