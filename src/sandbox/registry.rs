//! Process-wide set of live sandbox names.
//!
//! Every sandbox is registered before it is launched and unregistered during
//! teardown, so at any instant the registry is a superset of the sandboxes this
//! process may have left running. On a termination signal [`SandboxRegistry::drain_all`]
//! force-stops and removes all of them and closes the registry; later registrations
//! are refused so nothing can be launched untracked while the process winds down.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::SandboxError;

/// Upper bound on each `kill`/`rm` during a drain.
const DRAIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct RegistryState {
    names: HashSet<String>,
    closed: bool,
}

/// Outcome of [`SandboxRegistry::drain_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Names that were tracked when the drain began.
    pub attempted: usize,
    /// Names for which `kill` or `rm -f` succeeded.
    pub cleaned: usize,
    /// Names for which both commands failed.
    pub failed: usize,
}

/// Shared registry handle. Clones refer to the same set.
///
/// The lock is a plain `std::sync::Mutex` and is never held across an `.await`.
#[derive(Debug, Clone)]
pub struct SandboxRegistry {
    runtime: String,
    inner: Arc<Mutex<RegistryState>>,
}

impl SandboxRegistry {
    /// Creates an empty, open registry that stops sandboxes through `runtime`.
    #[must_use]
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            inner: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    // A panic while holding the lock cannot leave the set half-updated, so a
    // poisoned lock is still safe to use.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks a sandbox name.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::ShuttingDown` once a drain has begun.
    pub fn register(&self, name: &str) -> Result<(), SandboxError> {
        let mut state = self.state();
        if state.closed {
            return Err(SandboxError::ShuttingDown {
                name: name.to_string(),
            });
        }
        state.names.insert(name.to_string());
        trace!(name, live = state.names.len(), "Sandbox registered");
        Ok(())
    }

    /// Stops tracking a sandbox name. Returns false if it was not tracked.
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.state();
        let removed = state.names.remove(name);
        trace!(name, removed, live = state.names.len(), "Sandbox unregistered");
        removed
    }

    /// Snapshot of the number of tracked sandboxes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().names.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().names.is_empty()
    }

    /// Returns true if `name` is tracked.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.state().names.contains(name)
    }

    /// Snapshot of the tracked names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().names.iter().cloned().collect();
        names.sort();
        names
    }

    /// Returns true once a drain has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Forcibly stops and removes every tracked sandbox, then closes the registry.
    ///
    /// All sandboxes are handled concurrently. A failure for one name is logged and
    /// counted but never stops the others.
    #[instrument(skip(self), fields(runtime = %self.runtime))]
    pub async fn drain_all(&self) -> DrainReport {
        let names: Vec<String> = {
            let mut state = self.state();
            state.closed = true;
            state.names.drain().collect()
        };

        let mut report = DrainReport {
            attempted: names.len(),
            ..Default::default()
        };

        if names.is_empty() {
            debug!("No sandboxes to drain");
            return report;
        }

        info!(count = names.len(), "Draining sandboxes");

        let mut tasks = JoinSet::new();
        for name in names {
            let runtime = self.runtime.clone();
            tasks.spawn(async move {
                let killed = run_quietly(&runtime, &["kill", &name]).await;
                let removed = run_quietly(&runtime, &["rm", "-f", &name]).await;
                (name, killed || removed)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, true)) => {
                    debug!(%name, "Sandbox stopped");
                    report.cleaned += 1;
                }
                Ok((name, false)) => {
                    warn!(%name, "Failed to stop sandbox");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Drain task failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            cleaned = report.cleaned,
            failed = report.failed,
            "Drain complete"
        );
        report
    }

    /// Synchronously sends `kill` to every tracked sandbox.
    ///
    /// For the normal-exit path, where no async runtime may be left to drive
    /// [`drain_all`](Self::drain_all). Best-effort; returns the number of successful kills.
    pub fn kill_all_blocking(&self) -> usize {
        self.names()
            .iter()
            .filter(|name| self.kill_blocking(name))
            .count()
    }

    /// Synchronously sends `kill` to one sandbox, tracked or not.
    ///
    /// Used where no `.await` is possible, such as drop guards.
    pub fn kill_blocking(&self, name: &str) -> bool {
        let status = std::process::Command::new(&self.runtime)
            .args(["kill", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => true,
            Ok(s) => {
                debug!(name, code = ?s.code(), "Kill failed");
                false
            }
            Err(e) => {
                debug!(name, error = %e, "Kill failed");
                false
            }
        }
    }
}

/// Runs a runtime subcommand with output discarded. Returns true on exit status 0.
pub(super) async fn run_quietly(runtime: &str, args: &[&str]) -> bool {
    let child = tokio::process::Command::new(runtime)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(DRAIN_COMMAND_TIMEOUT, child).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(runtime, ?args, error = %e, "Runtime command could not be spawned");
            false
        }
        Err(_) => {
            warn!(runtime, ?args, "Runtime command timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = SandboxRegistry::new("true");
        registry.register("code-runner-a").expect("open registry");
        registry.register("code-runner-b").expect("open registry");

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("code-runner-a"));
        assert_eq!(registry.names(), vec!["code-runner-a", "code-runner-b"]);

        assert!(registry.unregister("code-runner-a"));
        assert!(!registry.unregister("code-runner-a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = SandboxRegistry::new("true");
        let clone = registry.clone();
        clone.register("code-runner-x").expect("open registry");
        assert!(registry.contains("code-runner-x"));
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister_returns_to_zero() {
        let registry = SandboxRegistry::new("true");
        let mut tasks = JoinSet::new();

        for i in 0..50 {
            let registry = registry.clone();
            tasks.spawn(async move {
                let name = format!("code-runner-{i}");
                registry.register(&name).expect("open registry");
                tokio::task::yield_now().await;
                assert!(registry.unregister(&name));
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.expect("task panicked");
        }

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drain_clears_and_closes() {
        let registry = SandboxRegistry::new("true");
        registry.register("code-runner-1").expect("open registry");
        registry.register("code-runner-2").expect("open registry");

        let report = registry.drain_all().await;
        assert_eq!(
            report,
            DrainReport {
                attempted: 2,
                cleaned: 2,
                failed: 0
            }
        );
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert!(matches!(
            registry.register("code-runner-3"),
            Err(SandboxError::ShuttingDown { .. })
        ));
    }

    #[tokio::test]
    async fn test_drain_counts_failures_without_aborting() {
        let registry = SandboxRegistry::new("false");
        registry.register("code-runner-1").expect("open registry");
        registry.register("code-runner-2").expect("open registry");

        let report = registry.drain_all().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drain_with_missing_runtime() {
        let registry = SandboxRegistry::new("/nonexistent/runtime-binary");
        registry.register("code-runner-1").expect("open registry");

        let report = registry.drain_all().await;
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_kill_all_blocking() {
        let registry = SandboxRegistry::new("true");
        registry.register("code-runner-1").expect("open registry");
        assert_eq!(registry.kill_all_blocking(), 1);

        let registry = SandboxRegistry::new("false");
        registry.register("code-runner-1").expect("open registry");
        assert_eq!(registry.kill_all_blocking(), 0);
    }
}
