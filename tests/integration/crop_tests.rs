//! Crop integration tests.
//!
//! Tests verify:
//! - Rectangles are clamped into the image instead of rejected
//! - Rotation happens before the rectangle is applied
//! - Output format resolution, including the `original` guess
//! - Crop parameter validation

use axum::http::StatusCode;
use tower::ServiceExt;

use super::test_utils::{
    body_bytes, body_json, dev_router, form_request, form_request_as, get_as, gradient_bmp,
    gradient_jpeg, gradient_png, header_str, header_u64, MultipartForm,
};

fn crop_form(source: &[u8], file_name: &str, content_type: &str) -> MultipartForm {
    MultipartForm::new().file(file_name, content_type, source)
}

fn with_rect(form: MultipartForm, x: &str, y: &str, width: &str, height: &str) -> MultipartForm {
    form.text("x", x)
        .text("y", y)
        .text("width", width)
        .text("height", height)
}

async fn decoded_dimensions(response: axum::http::Response<axum::body::Body>) -> (u32, u32) {
    let body = body_bytes(response).await;
    let image = image::load_from_memory(&body).unwrap();
    (image.width(), image.height())
}

// =============================================================================
// Geometry
// =============================================================================

#[tokio::test]
async fn test_crop_clamps_rectangle() {
    let source = gradient_png(100, 80);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "90", "10", "50", "20")
        .text("format", "png");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "PNG");
    assert_eq!(header_str(&response, "content-type"), "image/png");
    assert_eq!(decoded_dimensions(response).await, (10, 20));
}

#[tokio::test]
async fn test_crop_origin_outside_image_still_succeeds() {
    let source = gradient_png(40, 30);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "-15", "500", "-4", "2.6")
        .text("format", "png");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(decoded_dimensions(response).await, (1, 1));
}

#[tokio::test]
async fn test_crop_after_quarter_rotation() {
    let source = gradient_png(100, 80);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "0", "0", "1000", "1000")
        .text("rotation", "90")
        .text("format", "png");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(decoded_dimensions(response).await, (80, 100));
}

#[tokio::test]
async fn test_crop_after_arbitrary_rotation_expands_canvas() {
    let source = gradient_png(40, 40);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "0", "0", "1000", "1000")
        .text("rotation", "45")
        .text("format", "png");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let (width, height) = decoded_dimensions(response).await;
    assert!(width > 40 && height > 40, "got {}x{}", width, height);
}

// =============================================================================
// Format Resolution
// =============================================================================

#[tokio::test]
async fn test_crop_original_keeps_jpeg() {
    let source = gradient_jpeg(64, 48);
    let form = with_rect(crop_form(&source, "holiday.jpeg", "image/jpeg"), "0", "0", "32", "32");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "JPEG");
    assert_eq!(header_str(&response, "content-type"), "image/jpeg");
    assert!(header_str(&response, "content-disposition").contains("filename=\"holiday.jpg\""));
    assert_eq!(header_str(&response, "x-ui-quality"), "90");
}

#[tokio::test]
async fn test_crop_original_unknown_type_becomes_webp() {
    let source = gradient_bmp(32, 32);
    let form = with_rect(crop_form(&source, "scan.bmp", "image/bmp"), "0", "0", "16", "16")
        .text("format", "original");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "WEBP");
    assert_eq!(header_str(&response, "content-type"), "image/webp");
    assert!(header_str(&response, "content-disposition").contains("filename=\"scan.webp\""));
}

#[tokio::test]
async fn test_crop_auto_becomes_webp() {
    let source = gradient_png(32, 32);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "4", "4", "8", "8")
        .text("format", "auto");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "WEBP");
}

#[tokio::test]
async fn test_crop_reports_sizes_without_inflation_guard() {
    let source = gradient_png(32, 32);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "0", "0", "32", "32")
        .text("format", "jpeg");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-output-format"), "JPEG");
    assert_eq!(header_u64(&response, "x-original-size"), source.len() as u64);

    let output_size = header_u64(&response, "x-output-size");
    let savings = header_u64(&response, "x-savings-percent");
    if output_size >= source.len() as u64 {
        assert_eq!(savings, 0);
    }
    assert_eq!(body_bytes(response).await.len() as u64, output_size);
}

// =============================================================================
// Quality
// =============================================================================

#[tokio::test]
async fn test_crop_quality_clamped_to_crop_range() {
    for (raw, expected) in [("10", "40"), ("99", "95"), ("70", "70")] {
        let source = gradient_png(16, 16);
        let form = with_rect(crop_form(&source, "chart.png", "image/png"), "0", "0", "8", "8")
            .text("quality", raw)
            .text("format", "webp");

        let response = dev_router()
            .oneshot(form_request("/api/crop", form))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-ui-quality"), expected, "quality {}", raw);
    }
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_crop_missing_coordinate() {
    let router = dev_router();
    let source = gradient_png(16, 16);
    let form = crop_form(&source, "chart.png", "image/png")
        .text("y", "0")
        .text("width", "8")
        .text("height", "8");

    let response = router
        .clone()
        .oneshot(form_request_as("/api/crop", "carol", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_crop_parameters");
    assert_eq!(json["details"]["field"], "x");

    // Validation happens before quota is consumed
    let response = router.oneshot(get_as("/api/usage", "carol")).await.unwrap();
    assert_eq!(body_json(response).await["used"], 0);
}

#[tokio::test]
async fn test_crop_non_numeric_coordinate() {
    let source = gradient_png(16, 16);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "0", "0", "wide", "8");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["details"]["field"], "width");
}

#[tokio::test]
async fn test_crop_non_numeric_rotation() {
    let source = gradient_png(16, 16);
    let form = with_rect(crop_form(&source, "chart.png", "image/png"), "0", "0", "8", "8")
        .text("rotation", "left");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["details"]["field"], "rotation");
}

#[tokio::test]
async fn test_crop_without_file() {
    let form = with_rect(MultipartForm::new(), "0", "0", "8", "8");

    let response = dev_router()
        .oneshot(form_request("/api/crop", form))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "no_file_provided");
}
