//! HTTP request handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

use crate::context::ServiceContext;
use crate::error::RequestError;
use crate::execution::{ExecutionResult, FailureReason, HarnessKind, RunRequest};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is answering.
    pub status: &'static str,
    /// Crate version the binary was built from.
    pub version: &'static str,
    /// Time the response was generated.
    pub timestamp: chrono::DateTime<Utc>,
    /// Whole seconds since the service context was initialized.
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: i64,
}

/// Live sandbox count.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Sandboxes currently registered, launched or about to be.
    #[serde(rename = "runningContainers")]
    pub running_containers: usize,
}

pub(super) async fn unit_tests(
    State(ctx): State<Arc<ServiceContext>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    run_harness(ctx, body, HarnessKind::UnitTests).await
}

pub(super) async fn performance_tests(
    State(ctx): State<Arc<ServiceContext>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    run_harness(ctx, body, HarnessKind::PerformanceTests).await
}

pub(super) async fn status(State(ctx): State<Arc<ServiceContext>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running_containers: ctx.running_sandboxes(),
    })
}

pub(super) async fn health(State(ctx): State<Arc<ServiceContext>>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_seconds: (now - ctx.started_at()).num_seconds(),
    })
}

async fn run_harness(
    ctx: Arc<ServiceContext>,
    body: Result<Bytes, BytesRejection>,
    kind: HarnessKind,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(%kind, error = %rejection, "Request body rejected");
            return error_response(rejection.status(), &rejection.body_text());
        }
    };

    let request = match RunRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => return request_error_response(&e),
    };

    // A dropped client connection must not cancel a launched session, so the
    // execution runs on its own task.
    let task = tokio::spawn(async move { ctx.orchestrator().execute(request, kind).await });

    match task.await {
        Ok(Ok(result)) => execution_response(&result),
        Ok(Err(e)) => request_error_response(&e),
        Err(e) => {
            error!(%kind, error = %e, "Execution task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn execution_response(result: &ExecutionResult) -> Response {
    let status = match result.failure_reason() {
        Some(FailureReason::InternalError) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (status, Json(result.response_body())).into_response()
}

fn request_error_response(err: &RequestError) -> Response {
    let status = match err {
        RequestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RequestError::Unauthorized => StatusCode::UNAUTHORIZED,
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}
