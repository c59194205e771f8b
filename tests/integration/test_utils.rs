//! Test utilities for integration tests.
//!
//! This module provides a multipart body builder, in-memory test images and
//! router constructors wired to an in-memory usage store.

use std::io::Cursor;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use pixel_press::policy::EncodeFormat;
use pixel_press::usage::{InMemoryUsageStore, Plan, PlanCatalog, PlanLimits};
use pixel_press::{
    create_router, CompressionService, EncodeError, EncodeSettings, ImageCodec, QualityCurve,
    RouterConfig, StandardCodec,
};

pub const TEST_SECRET: &str = "test-secret-key-for-hmac-signing";

const BOUNDARY: &str = "pixel-press-test-boundary-7MA4YWxkTrZu0gW";

// =============================================================================
// Multipart Builder
// =============================================================================

/// Builds a `multipart/form-data` body by hand.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    /// Add the `file` field.
    pub fn file(self, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.file_field("file", file_name, content_type, bytes)
    }

    /// Add a file part under any field name.
    pub fn file_field(
        mut self,
        name: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    pub fn into_body(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.body
    }
}

// =============================================================================
// Requests
// =============================================================================

fn form_builder(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, MultipartForm::content_type())
}

/// POST a form without any identity headers.
pub fn form_request(uri: &str, form: MultipartForm) -> Request<Body> {
    form_builder(uri).body(Body::from(form.into_body())).unwrap()
}

/// POST a form as a development-mode user.
pub fn form_request_as(uri: &str, user: &str, form: MultipartForm) -> Request<Body> {
    form_builder(uri)
        .header("x-user-id", user)
        .body(Body::from(form.into_body()))
        .unwrap()
}

/// POST a form with a bearer token.
pub fn form_request_with_token(uri: &str, token: &str, form: MultipartForm) -> Request<Body> {
    form_builder(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(form.into_body()))
        .unwrap()
}

/// GET as a development-mode user.
pub fn get_as(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

// =============================================================================
// Responses
// =============================================================================

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header_str<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

pub fn header_u64(response: &Response<Body>, name: &str) -> u64 {
    header_str(response, name).parse().unwrap()
}

// =============================================================================
// Test Images
// =============================================================================

/// Deterministic pseudo-random RGB noise.
pub fn noise_image(width: u32, height: u32, seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        Rgb([next(), next(), next()])
    })
}

/// A smooth gradient.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Smooth shading with per-pixel grain, like a camera photo.
pub fn photo_image(width: u32, height: u32) -> RgbImage {
    let grain = noise_image(width, height, 11);
    RgbImage::from_fn(width, height, |x, y| {
        let noise = grain.get_pixel(x, y);
        let shade = |base: u32, n: u8| (base as i32 + i32::from(n >> 4) - 8).clamp(0, 255) as u8;
        Rgb([
            shade(x * 180 / width.max(1) + 40, noise[0]),
            shade(y * 160 / height.max(1) + 50, noise[1]),
            shade((x + y) * 90 / (width + height).max(1) + 70, noise[2]),
        ])
    })
}

/// Opaque photo saved as a high-quality JPEG.
pub fn photo_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 95)
        .encode_image(&photo_image(width, height))
        .unwrap();
    out
}

pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// Incompressible PNG: lossy encoders always beat it.
pub fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(noise_image(width, height, 7)),
        ImageFormat::Png,
    )
}

/// Gradient PNG with a varying alpha channel.
pub fn transparent_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 3) as u8, (y * 3) as u8, 90, ((x + y) % 256) as u8])
    });
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

/// Heavily compressed JPEG of noise. A lossless re-encode is always larger.
pub fn low_quality_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 10)
        .encode_image(&noise_image(width, height, 3))
        .unwrap();
    out
}

pub fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&gradient_image(width, height))
        .unwrap();
    out
}

pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(gradient_image(width, height)),
        ImageFormat::Png,
    )
}

pub fn gradient_bmp(width: u32, height: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(gradient_image(width, height)),
        ImageFormat::Bmp,
    )
}

// =============================================================================
// Routers
// =============================================================================

/// Plan catalog where every plan has the same limits.
pub fn uniform_catalog(monthly_images: u64, max_file_size: u64) -> PlanCatalog {
    let limits = PlanLimits {
        monthly_images,
        max_file_size,
    };
    PlanCatalog {
        free: limits,
        pro: limits,
        business: limits,
    }
}

/// Development router: no auth, no rate limit, no tracing, default plans.
pub fn dev_router() -> Router {
    router_with(InMemoryUsageStore::new(), dev_config())
}

pub fn dev_config() -> RouterConfig {
    RouterConfig::without_auth()
        .without_rate_limit()
        .with_tracing(false)
}

/// Router over a fresh store using `catalog` for every identity.
pub fn router_with_catalog(catalog: PlanCatalog, config: RouterConfig) -> Router {
    router_with(InMemoryUsageStore::with_catalog(catalog, Plan::Free), config)
}

pub fn router_with(store: InMemoryUsageStore, config: RouterConfig) -> Router {
    create_router(CompressionService::new(store), config)
}

/// The standard codec with AVIF switched off, as in a build without the
/// `avif` feature.
pub struct WithoutAvif(pub StandardCodec);

impl ImageCodec for WithoutAvif {
    fn decode(&self, source: &[u8]) -> Result<DynamicImage, EncodeError> {
        self.0.decode(source)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        settings: &EncodeSettings,
    ) -> Result<Bytes, EncodeError> {
        match settings {
            EncodeSettings::Avif { .. } => Err(EncodeError::Unsupported(EncodeFormat::Avif)),
            other => self.0.encode(image, other),
        }
    }

    fn supports(&self, format: EncodeFormat) -> bool {
        format != EncodeFormat::Avif && self.0.supports(format)
    }
}

/// Development router whose codec cannot produce AVIF.
pub fn dev_router_without_avif() -> Router {
    let service = CompressionService::with_codec(
        InMemoryUsageStore::new(),
        Arc::new(WithoutAvif(StandardCodec::new())),
        QualityCurve::default(),
    );
    create_router(service, dev_config())
}
