//! API integration tests for compression.
//!
//! Tests verify:
//! - The no-inflation guarantee and response headers
//! - Format selection for opaque and transparent uploads
//! - Quality parsing and clamping
//! - Form and upload errors
//! - Health and CORS

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use super::test_utils::{
    body_bytes, body_json, dev_config, dev_router, dev_router_without_avif, form_request,
    form_request_as, get_as, header_str, header_u64, low_quality_jpeg, noisy_png, photo_jpeg,
    router_with_catalog, transparent_png, uniform_catalog, MultipartForm,
};

// =============================================================================
// Compression
// =============================================================================

#[tokio::test]
async fn test_compress_auto_never_inflates() {
    let router = dev_router();
    let source = noisy_png(64, 64);

    let form = MultipartForm::new().file("photo.png", "image/png", &source);
    let response = router
        .oneshot(form_request_as("/api/compress", "alice", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_u64(&response, "x-original-size"), source.len() as u64);
    assert_eq!(header_str(&response, "x-ui-quality"), "80");
    assert_eq!(header_str(&response, "x-encoder-quality"), "87");
    assert_eq!(header_str(&response, "x-quota-used"), "1");
    assert_eq!(header_str(&response, "x-quota-limit"), "50");

    let output_size = header_u64(&response, "x-output-size");
    assert!(output_size <= source.len() as u64);

    let format = header_str(&response, "x-output-format").to_string();
    let content_type = header_str(&response, header::CONTENT_TYPE.as_str()).to_string();
    match format.as_str() {
        "WEBP" => assert_eq!(content_type, "image/webp"),
        "AVIF" => assert_eq!(content_type, "image/avif"),
        "ORIGINAL" => assert_eq!(content_type, "image/png"),
        other => panic!("auto must not produce {}", other),
    }

    let body = body_bytes(response).await;
    assert_eq!(body.len() as u64, output_size);
}

/// Uploads an opaque photo JPEG with `quality=80, format=auto` and checks that
/// a smaller re-encoding wins and the savings header matches the sizes.
async fn assert_auto_shrinks_photo(router: axum::Router) -> String {
    let source = photo_jpeg(256, 256);

    let form = MultipartForm::new()
        .file("holiday.jpg", "image/jpeg", &source)
        .text("quality", "80")
        .text("format", "auto");
    let response = router
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let format = header_str(&response, "x-output-format").to_string();
    assert!(
        matches!(format.as_str(), "WEBP" | "AVIF" | "JPEG"),
        "auto produced {}",
        format
    );

    let original = header_u64(&response, "x-original-size");
    let output = header_u64(&response, "x-output-size");
    assert_eq!(original, source.len() as u64);
    assert!(output < original, "{} is not smaller than {}", output, original);

    let expected_savings = ((1.0 - output as f64 / original as f64) * 100.0).round() as u64;
    assert_eq!(header_u64(&response, "x-savings-percent"), expected_savings);

    let body = body_bytes(response).await;
    assert_eq!(body.len() as u64, output);
    format
}

#[tokio::test]
async fn test_compress_auto_shrinks_photo() {
    assert_auto_shrinks_photo(dev_router()).await;
}

#[tokio::test]
async fn test_compress_auto_shrinks_photo_without_avif() {
    let format = assert_auto_shrinks_photo(dev_router_without_avif()).await;
    assert_eq!(format, "WEBP");
}

#[tokio::test]
async fn test_compress_webp_quality_changes_output() {
    let source = photo_jpeg(128, 128);
    let mut sizes = Vec::new();

    for quality in ["10", "60"] {
        let form = MultipartForm::new()
            .file("holiday.jpg", "image/jpeg", &source)
            .text("quality", quality)
            .text("format", "webp");
        let response = dev_router()
            .oneshot(form_request("/api/compress", form))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-output-format"), "WEBP");
        sizes.push(header_u64(&response, "x-output-size"));
    }

    assert!(sizes[0] < sizes[1], "sizes were {:?}", sizes);
}

#[tokio::test]
async fn test_compress_jpeg_request_on_opaque_image() {
    let router = dev_router();
    let source = noisy_png(96, 96);

    let form = MultipartForm::new()
        .file("scans/photo.png", "image/png", &source)
        .text("quality", "50")
        .text("format", "jpeg");
    let response = router
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "JPEG");
    assert_eq!(header_str(&response, "x-encoder-quality"), "68");
    assert_eq!(header_str(&response, "content-type"), "image/jpeg");
    assert!(header_str(&response, "content-disposition").contains("filename=\"photo.jpg\""));

    let original = header_u64(&response, "x-original-size");
    let output = header_u64(&response, "x-output-size");
    let expected_savings = ((1.0 - output as f64 / original as f64) * 100.0).round() as u64;
    assert_eq!(header_u64(&response, "x-savings-percent"), expected_savings);

    let body = body_bytes(response).await;
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_compress_returns_original_when_nothing_is_smaller() {
    let router = dev_router();
    let source = low_quality_jpeg(64, 64);

    let form = MultipartForm::new()
        .file("tiny.jpg", "image/jpeg", &source)
        .text("format", "png");
    let response = router
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "ORIGINAL");
    assert_eq!(header_str(&response, "x-savings-percent"), "0");
    assert_eq!(header_str(&response, "content-type"), "image/jpeg");
    assert!(header_str(&response, "content-disposition").contains("filename=\"tiny.jpg\""));

    let body = body_bytes(response).await;
    assert_eq!(body.as_ref(), source.as_slice());
}

#[tokio::test]
async fn test_compress_transparent_image_never_becomes_jpeg() {
    let router = dev_router();
    let source = transparent_png(48, 48);

    let form = MultipartForm::new()
        .file("logo.png", "image/png", &source)
        .text("format", "jpeg");
    let response = router
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let format = header_str(&response, "x-output-format");
    assert!(
        format == "WEBP" || format == "ORIGINAL",
        "unexpected format {}",
        format
    );
}

#[tokio::test]
async fn test_unrecognized_format_forces_webp() {
    let router = dev_router();
    let source = noisy_png(32, 32);

    let form = MultipartForm::new()
        .file("photo.png", "image/png", &source)
        .text("format", "tiff");
    let response = router
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let format = header_str(&response, "x-output-format");
    assert!(format == "WEBP" || format == "ORIGINAL");
}

// =============================================================================
// Quality Parsing
// =============================================================================

#[tokio::test]
async fn test_quality_is_clamped_and_defaulted() {
    let cases = [
        ("150", "100", "92"),
        ("-3", "1", "36"),
        ("49.6", "50", "68"),
        ("high", "80", "87"),
    ];

    for (raw, ui, encoder) in cases {
        let form = MultipartForm::new()
            .file("photo.png", "image/png", &noisy_png(16, 16))
            .text("quality", raw);
        let response = dev_router()
            .oneshot(form_request("/api/compress", form))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK, "quality {}", raw);
        assert_eq!(header_str(&response, "x-ui-quality"), ui, "quality {}", raw);
        assert_eq!(
            header_str(&response, "x-encoder-quality"),
            encoder,
            "quality {}",
            raw
        );
    }
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_file() {
    let router = dev_router();

    let form = MultipartForm::new().text("quality", "80");
    let response = router
        .clone()
        .oneshot(form_request_as("/api/compress", "alice", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "no_file_provided");
    assert_eq!(json["status"], 400);

    // Rejected before the quota was touched
    let response = router.oneshot(get_as("/api/usage", "alice")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["used"], 0);
}

#[tokio::test]
async fn test_empty_file_part() {
    let form = MultipartForm::new().file("empty.png", "image/png", &[]);
    let response = dev_router()
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "no_file_provided");
}

#[tokio::test]
async fn test_file_under_other_field_name_is_ignored() {
    let form = MultipartForm::new().file_field("image", "photo.png", "image/png", &noisy_png(8, 8));
    let response = dev_router()
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_undecodable_upload() {
    let form = MultipartForm::new().file("notes.png", "image/png", b"definitely not an image");
    let response = dev_router()
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_image");
}

#[tokio::test]
async fn test_non_multipart_body() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/compress")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"file\": \"nope\"}"))
        .unwrap();
    let response = dev_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "malformed_form");
}

#[tokio::test]
async fn test_body_over_server_limit() {
    let router = router_with_catalog(
        uniform_catalog(50, 10 * 1024 * 1024),
        dev_config().with_max_body_size(1024),
    );

    let form = MultipartForm::new().file("photo.png", "image/png", &noisy_png(64, 64));
    let response = router
        .oneshot(form_request("/api/compress", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "file_too_large");
}

#[tokio::test]
async fn test_wrong_method() {
    let request = Request::builder()
        .uri("/api/compress")
        .header("x-user-id", "alice")
        .body(Body::empty())
        .unwrap();
    let response = dev_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Health and CORS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = dev_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["avif"], cfg!(feature = "avif"));
}

#[tokio::test]
async fn test_cors_exposes_result_headers() {
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = dev_router().oneshot(request).await.unwrap();

    assert_eq!(
        header_str(&response, "access-control-allow-origin"),
        "*"
    );
    let exposed = header_str(&response, "access-control-expose-headers").to_ascii_lowercase();
    for name in [
        "x-output-format",
        "x-savings-percent",
        "x-quota-used",
        "retry-after",
        "content-disposition",
    ] {
        assert!(exposed.contains(name), "{} not exposed", name);
    }
}
