//! Integration tests for the HTTP surface.
//!
//! Requests are driven through the router with `oneshot`; sandboxes go through the
//! fake runtime in `common`.

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use runalyzer::server::router;

use common::{API_KEY, REPORT, test_context};

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("valid request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}

#[tokio::test]
async fn test_health() {
    let (_temp, ctx) = test_context();

    let response = router(ctx).oneshot(get("/health")).await.expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["uptimeSeconds"].as_i64().is_some_and(|s| s >= 0));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_status_counts_live_sandboxes() {
    let (_temp, ctx) = test_context();

    let response = router(ctx).oneshot(get("/status")).await.expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "runningContainers": 0 }));
}

#[tokio::test]
async fn test_invalid_json_is_400() {
    let (_temp, ctx) = test_context();

    let response = router(ctx)
        .oneshot(post("/unit-tests", "{not json"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Invalid request body"))
    );
}

#[tokio::test]
async fn test_missing_user_code_is_400() {
    let (_temp, ctx) = test_context();
    let payload = json!({ "unit_tests": "# tests", "api_key": API_KEY });

    let response = router(ctx)
        .oneshot(post("/unit-tests", payload.to_string()))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_key_is_401() {
    let (_temp, ctx) = test_context();
    let payload = json!({
        "user_code": "echo hi",
        "unit_tests": "# tests",
        "api_key": "not-the-key",
    });

    let response = router(ctx.clone())
        .oneshot(post("/unit-tests", payload.to_string()))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "error": "Invalid API key" })
    );
    assert_eq!(ctx.running_sandboxes(), 0);
}

#[tokio::test]
async fn test_out_of_range_limit_is_400() {
    let (_temp, ctx) = test_context();
    let payload = json!({
        "user_code": "echo hi",
        "performance_tests": "# tests",
        "api_key": API_KEY,
        "config": { "timeoutSeconds": 301 },
    });

    let response = router(ctx)
        .oneshot(post("/performance-tests", payload.to_string()))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unit_tests_success() {
    let (_temp, ctx) = test_context();
    let payload = json!({
        "user_code": format!("echo '{REPORT}'"),
        "unit_tests": "# tests",
        "api_key": API_KEY,
    });

    let response = router(ctx.clone())
        .oneshot(post("/unit-tests", payload.to_string()))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["exitCode"], 0);
    assert_eq!(body["output"]["test_result"]["message"], "Points: 1 / 1");
    assert_eq!(ctx.running_sandboxes(), 0);
}

#[tokio::test]
async fn test_sandbox_failure_is_200_with_reason() {
    let (_temp, ctx) = test_context();
    let payload = json!({
        "user_code": "exit 124",
        "unit_tests": "# tests",
        "api_key": API_KEY,
    });

    let response = router(ctx)
        .oneshot(post("/unit-tests", payload.to_string()))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "timed_out");
    assert_eq!(body["error"], "Time limit exceeded");
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let (_temp, ctx) = test_context();
    let limit = ctx.config().max_body_bytes;
    let payload = json!({
        "user_code": "#".repeat(limit + 1),
        "unit_tests": "# tests",
        "api_key": API_KEY,
    });

    let response = router(ctx)
        .oneshot(post("/unit-tests", payload.to_string()))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
