//! Rate limiting integration tests.
//!
//! Tests verify:
//! - Callers beyond the window limit get 429 with Retry-After
//! - Limits are per caller
//! - Public routes and rejected-before-auth requests are not counted

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use pixel_press::usage::InMemoryUsageStore;
use pixel_press::{RouterConfig, TokenAuth};

use super::test_utils::{body_json, dev_config, get_as, header_u64, router_with, TEST_SECRET};

fn limited_dev_router(max_requests: u32) -> axum::Router {
    router_with(
        InMemoryUsageStore::new(),
        dev_config().with_rate_limit(max_requests, Duration::from_secs(60)),
    )
}

#[tokio::test]
async fn test_requests_over_limit_are_rejected() {
    let router = limited_dev_router(2);

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(get_as("/api/usage", "alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.oneshot(get_as("/api/usage", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after = header_u64(&response, "retry-after");
    assert!((1..=60).contains(&retry_after));

    let json = body_json(response).await;
    assert_eq!(json["error"], "rate_limited");
    assert_eq!(json["status"], 429);
    assert_eq!(json["details"]["retry_after"], retry_after);
}

#[tokio::test]
async fn test_callers_are_limited_independently() {
    let router = limited_dev_router(1);

    let response = router
        .clone()
        .oneshot(get_as("/api/usage", "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(get_as("/api/usage", "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = router.oneshot(get_as("/api/usage", "bob")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn usage_from(peer: [u8; 4], forwarded_for: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/usage");
    if let Some(chain) = forwarded_for {
        builder = builder.header("x-forwarded-for", chain);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    request
}

#[tokio::test]
async fn test_anonymous_callers_are_keyed_by_socket_address() {
    let router = limited_dev_router(1);

    let response = router
        .clone()
        .oneshot(usage_from([198, 51, 100, 1], None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(usage_from([198, 51, 100, 2], None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(usage_from([198, 51, 100, 1], None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_reset_limit() {
    let router = limited_dev_router(1);

    let response = router
        .clone()
        .oneshot(usage_from([198, 51, 100, 1], Some("203.0.113.1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(usage_from([198, 51, 100, 1], Some("203.0.113.2")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_health_is_not_limited() {
    let router = limited_dev_router(1);

    for _ in 0..5 {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_limit_disabled() {
    let router = router_with(InMemoryUsageStore::new(), dev_config());

    for _ in 0..50 {
        let response = router
            .clone()
            .oneshot(get_as("/api/usage", "alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_limit_keyed_by_token_identity() {
    let router = router_with(
        InMemoryUsageStore::new(),
        RouterConfig::new(TEST_SECRET)
            .with_rate_limit(1, Duration::from_secs(60))
            .with_tracing(false),
    );
    let auth = TokenAuth::new(TEST_SECRET);

    let request = |identity: &str| {
        let (token, _) = auth.sign(identity, Duration::from_secs(3600));
        Request::builder()
            .uri("/api/usage")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            // Spoofed header must not influence the key
            .header("x-user-id", "shared")
            .body(Body::empty())
            .unwrap()
    };

    let response = router.clone().oneshot(request("alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.clone().oneshot(request("bob")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.oneshot(request("alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_unauthenticated_requests_are_not_counted() {
    let router = router_with(
        InMemoryUsageStore::new(),
        RouterConfig::new(TEST_SECRET)
            .with_rate_limit(1, Duration::from_secs(60))
            .with_tracing(false),
    );

    for _ in 0..3 {
        let request = Request::builder()
            .uri("/api/usage")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
