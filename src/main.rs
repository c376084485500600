//! runalyzer - Entry Point
//!
//! Parses configuration, checks the host, and serves the grading API until SIGINT
//! or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use miette::Result;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use runalyzer::config::ServiceConfig;
use runalyzer::context::ServiceContext;
use runalyzer::error::ConfigError;
use runalyzer::sandbox::{SandboxLimits, SandboxPolicy, SandboxUser};
use runalyzer::session::SessionConfig;
use runalyzer::{server, system};

/// runalyzer - Sandboxed grading of untrusted Python submissions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RUNALYZER_BIND", default_value = "0.0.0.0:3001")]
    bind: SocketAddr,

    /// Shared secret every request must present
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Directory under which per-session workspaces are created
    #[arg(long, env = "RUNALYZER_EXECUTOR_DIR", default_value = "./executor")]
    executor_dir: PathBuf,

    /// Keep leftover workspaces from a previous run instead of removing them
    #[arg(long, default_value = "false")]
    keep_stale: bool,

    /// Docker-compatible container CLI
    #[arg(long, env = "RUNALYZER_RUNTIME", default_value = "docker")]
    runtime: String,

    /// Sandbox image (must provide bash, timeout and python3)
    #[arg(long, env = "RUNALYZER_IMAGE", default_value = "python:3.10-slim")]
    image: String,

    /// Sandbox identity as UID:GID (defaults to the service's own, never root)
    #[arg(long, env = "RUNALYZER_SANDBOX_USER")]
    sandbox_user: Option<SandboxUser>,

    /// Default wall-clock limit in seconds
    #[arg(long, env = "RUNALYZER_TIMEOUT", default_value_t = 5)]
    timeout: u32,

    /// Default memory ceiling in MB
    #[arg(long, env = "RUNALYZER_MEMORY", default_value_t = 256)]
    memory: u32,

    /// Default CPU share
    #[arg(long, env = "RUNALYZER_CPUS", default_value_t = 0.5)]
    cpus: f64,

    /// Default /tmp size in MB
    #[arg(long, env = "RUNALYZER_TMP_SIZE", default_value_t = 100)]
    tmp_size: u32,

    /// Maximum processes per sandbox
    #[arg(long, env = "RUNALYZER_PIDS_LIMIT", default_value_t = 64)]
    pids_limit: u32,

    /// Bytes of stdout and of stderr kept per execution
    #[arg(long, env = "RUNALYZER_MAX_OUTPUT_BYTES", default_value_t = 1024 * 1024)]
    max_output_bytes: usize,

    /// Largest accepted request body in bytes
    #[arg(long, env = "RUNALYZER_MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    max_body_bytes: usize,

    /// Skip host checks (NOT RECOMMENDED)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> std::result::Result<ServiceConfig, ConfigError> {
        let limits = SandboxLimits::new(self.timeout, self.memory, self.cpus, self.tmp_size)?;

        let mut policy = SandboxPolicy::new()
            .with_runtime(self.runtime)
            .with_image(self.image)
            .with_pids_limit(self.pids_limit)
            .with_max_output_bytes(self.max_output_bytes);
        if let Some(user) = self.sandbox_user {
            policy = policy.with_user(user);
        }

        Ok(ServiceConfig::new(self.api_key)
            .with_bind_addr(self.bind)
            .with_session(
                SessionConfig::new()
                    .with_base_dir(self.executor_dir)
                    .with_sweep_on_start(!self.keep_stale),
            )
            .with_policy(policy)
            .with_default_limits(limits)
            .with_max_body_bytes(self.max_body_bytes))
    }
}

/// Sends `kill` to every sandbox still registered when `main` returns.
///
/// After a signal the registry has already been drained and this is a no-op; it
/// matters when the server stops for any other reason.
struct KillOnExit(Arc<ServiceContext>);

impl Drop for KillOnExit {
    fn drop(&mut self) {
        let live = self.0.running_sandboxes();
        if live > 0 {
            warn!(live, "Killing sandboxes still running at exit");
            self.0.registry().kill_all_blocking();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("runalyzer v{}", env!("CARGO_PKG_VERSION"));

    let skip_checks = args.skip_checks;
    let config = args.into_config()?;

    if skip_checks {
        warn!("Skipping host checks (--skip-checks). This is NOT recommended!");
    } else {
        info!("Checking host requirements...");

        match system::check_all(&config.policy.runtime, &config.session.base_dir) {
            Ok(reqs) => {
                info!(
                    "Host requirements satisfied: {} server {}, kernel {}",
                    reqs.runtime, reqs.runtime_version, reqs.kernel_version
                );
            }
            Err(e) => {
                error!("Host requirements check failed");
                return Err(e.into());
            }
        }
    }

    let ctx = Arc::new(ServiceContext::init(config)?);
    let _kill_on_exit = KillOnExit(Arc::clone(&ctx));

    server::run(Arc::clone(&ctx), server::drain_on_signal(Arc::clone(&ctx))).await?;

    Ok(())
}
