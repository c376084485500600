//! runalyzer - sandboxed execution and grading of untrusted Python submissions.
//!
//! Each HTTP request becomes one session: a private workspace directory holding the
//! submission and a grading harness, one container sandbox that runs it with no
//! network, a read-only root filesystem and hard resource ceilings, and a
//! classification of what came out. Workspace and sandbox are reclaimed whatever
//! the outcome, and every sandbox still alive when the process is signalled is
//! force-stopped before exit.
//!
//! # Platform Requirements
//!
//! - Linux
//! - A Docker-compatible CLI with a reachable daemon
//! - An image providing `bash`, coreutils `timeout` and `python3`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use runalyzer::{config::ServiceConfig, context::ServiceContext, server, system};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let config = ServiceConfig::new("s3cret");
//!     system::check_all(&config.policy.runtime, &config.session.base_dir)?;
//!
//!     let ctx = Arc::new(ServiceContext::init(config)?);
//!     server::run(Arc::clone(&ctx), server::drain_on_signal(Arc::clone(&ctx))).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod system;

// Re-export commonly used types
pub use error::{Error, Result};
pub use execution::{ExecutionResult, FailureReason, HarnessKind, Orchestrator, RunRequest};
pub use sandbox::{SandboxLimits, SandboxPolicy, SandboxRegistry};
