//! HTTP server.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /unit-tests` | grade a submission against unit tests |
//! | `POST /performance-tests` | grade a submission against performance tests |
//! | `GET /status` | number of live sandboxes |
//! | `GET /health` | liveness |

mod handler;

pub use handler::{HealthResponse, StatusResponse};

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::context::ServiceContext;
use crate::error::{Result, ServerError};

/// Builds the router over a service context.
pub fn router(ctx: Arc<ServiceContext>) -> Router {
    let max_body_bytes = ctx.config().max_body_bytes;
    Router::new()
        .route("/unit-tests", post(handler::unit_tests))
        .route("/performance-tests", post(handler::performance_tests))
        .route("/status", get(handler::status))
        .route("/health", get(handler::health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Binds the configured address and serves until `shutdown` resolves.
///
/// In-flight requests are allowed to finish after `shutdown` resolves.
///
/// # Errors
///
/// Returns `ServerError::Bind` if the address is unavailable and
/// `ServerError::Serve` if the accept loop fails.
pub async fn run<F>(ctx: Arc<ServiceContext>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = ctx.config().bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
    serve(listener, ctx, shutdown).await
}

/// Serves on an already-bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns `ServerError::Serve` if the accept loop fails.
pub async fn serve<F>(listener: TcpListener, ctx: Arc<ServiceContext>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().map_err(ServerError::Serve)?;
    info!(addr = %local_addr, "runalyzer listening");

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves after SIGINT or SIGTERM, once every live sandbox has been drained.
///
/// Pass the returned future to [`run`]: the drain completes, and the registry is
/// closed, before the server stops accepting connections.
pub async fn drain_on_signal(ctx: Arc<ServiceContext>) {
    wait_for_signal().await;
    let report = ctx.drain().await;
    if report.failed > 0 {
        warn!(failed = report.failed, "Some sandboxes could not be stopped");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, draining sandboxes"),
        () = terminate => info!("Received SIGTERM, draining sandboxes"),
    }
}
