//! Launching a sandbox and collecting its output.
//!
//! # Notes on stdout/stderr capture
//!
//! Do not read stdout/stderr only after process exit: if the sandbox writes enough
//! to fill a pipe it blocks forever and never exits. Both streams are drained
//! concurrently with the wait. Only the first `max_output_bytes` of each stream are
//! kept; the rest is read and discarded so the writer never stalls.
//!
//! # Time limit
//!
//! The wall-clock limit is enforced inside the sandbox by `timeout`, which exits with
//! [`TIMEOUT_EXIT_CODE`]. A program that ignores SIGTERM is SIGKILLed
//! [`KILL_AFTER_SECS`](super::KILL_AFTER_SECS) later and exits with
//! [`KILLED_EXIT_CODE`]; once the time limit has elapsed that code is reported as
//! [`TIMEOUT_EXIT_CODE`] too. If the runtime still has not returned at
//! [`SandboxInvocation::deadline`], the sandbox is stopped from outside and the run is
//! reported as timed out.

use std::os::unix::process::ExitStatusExt;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use super::command::{KILLED_EXIT_CODE, SandboxInvocation, TIMEOUT_EXIT_CODE};
use super::registry::{SandboxRegistry, run_quietly};
use crate::error::SandboxError;

const READ_CHUNK: usize = 8192;

/// Output of one sandbox run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Exit code, or `None` if the runtime client was killed by a signal.
    pub exit_code: Option<i32>,
    /// True if stdout exceeded the capture cap.
    pub stdout_truncated: bool,
    /// True if stderr exceeded the capture cap.
    pub stderr_truncated: bool,
}

impl CommandOutput {
    /// Returns `true` if the sandbox exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One launch of a sandbox.
///
/// # Example
///
/// ```no_run
/// use runalyzer::sandbox::{SandboxContainer, SandboxInvocation};
///
/// # async fn demo(invocation: SandboxInvocation) -> Result<(), runalyzer::error::SandboxError> {
/// let output = SandboxContainer::new(invocation, 1024 * 1024).run().await?;
/// println!("exit {:?}: {}", output.exit_code, output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SandboxContainer {
    invocation: SandboxInvocation,
    max_output_bytes: usize,
    registry: Option<SandboxRegistry>,
}

impl SandboxContainer {
    /// Wraps an invocation.
    #[must_use]
    pub fn new(invocation: SandboxInvocation, max_output_bytes: usize) -> Self {
        Self {
            invocation,
            max_output_bytes,
            registry: None,
        }
    }

    /// Stops the sandbox right after launch if `registry` has started draining.
    ///
    /// A drain that runs between registration and container creation cannot stop
    /// the container itself.
    #[must_use]
    pub fn with_registry(mut self, registry: SandboxRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Name the sandbox is launched under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.invocation.sandbox_name
    }

    /// Launches the sandbox and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::SpawnFailed` if the runtime binary cannot be started,
    /// `SandboxError::ShuttingDown` if the registry closed while it was launching and
    /// `SandboxError::WaitFailed` if reading its output or status fails.
    #[instrument(skip(self), fields(name = %self.invocation.sandbox_name))]
    pub async fn run(&self) -> Result<CommandOutput, SandboxError> {
        let name = &self.invocation.sandbox_name;
        trace!(program = %self.invocation.program, args = ?self.invocation.args, "Spawning sandbox");

        let started = Instant::now();
        let mut child =
            self.invocation
                .to_command()
                .spawn()
                .map_err(|e| SandboxError::SpawnFailed {
                    name: name.clone(),
                    source: e,
                })?;

        if self.registry.as_ref().is_some_and(SandboxRegistry::is_closed) {
            warn!("Registry closed during launch, stopping sandbox");
            self.stop(&mut child).await;
            return Err(SandboxError::ShuttingDown { name: name.clone() });
        }

        let wait_failed = |e: std::io::Error| SandboxError::WaitFailed {
            name: name.clone(),
            source: e,
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| wait_failed(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| wait_failed(std::io::Error::other("stderr not piped")))?;

        let collected = tokio::time::timeout(self.invocation.deadline(), async {
            tokio::try_join!(
                read_capped(stdout, self.max_output_bytes),
                read_capped(stderr, self.max_output_bytes),
                child.wait(),
            )
        })
        .await;

        let Ok(collected) = collected else {
            warn!(
                deadline_secs = self.invocation.deadline().as_secs(),
                "Sandbox outlived its deadline, stopping it"
            );
            self.stop(&mut child).await;
            return Ok(CommandOutput {
                exit_code: Some(TIMEOUT_EXIT_CODE),
                ..Default::default()
            });
        };
        let ((stdout, stdout_truncated), (stderr, stderr_truncated), status) =
            collected.map_err(wait_failed)?;

        if let Some(signal) = status.signal() {
            warn!(signal, "Runtime client terminated by signal");
        }
        if stdout_truncated || stderr_truncated {
            debug!(
                stdout_truncated,
                stderr_truncated,
                cap = self.max_output_bytes,
                "Sandbox output truncated"
            );
        }

        let exit_code = match status.code() {
            Some(KILLED_EXIT_CODE) if started.elapsed() >= self.invocation.time_limit => {
                debug!("SIGKILL after the time limit, reporting as timed out");
                Some(TIMEOUT_EXIT_CODE)
            }
            code => code,
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            stdout_truncated,
            stderr_truncated,
        };

        debug!(
            exit_code = ?output.exit_code,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Sandbox exited"
        );
        Ok(output)
    }

    /// Kills the runtime client and asks the runtime to kill the container.
    async fn stop(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Runtime client already gone");
        }
        let name = self.invocation.sandbox_name.as_str();
        if !run_quietly(&self.invocation.program, &["kill", name]).await {
            debug!("Runtime kill failed, the container may already be gone");
        }
    }
}

/// Reads `reader` to EOF, keeping at most `cap` bytes.
async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok((kept, truncated))
}
