//! Per-request sessions and their filesystem workspaces.
//!
//! Every accepted request gets exactly one [`Session`]: a random id, the sandbox name
//! derived from it, and a workspace directory holding the files the sandbox will read.
//!
//! # Storage Layout
//!
//! Workspaces live directly under the executor directory:
//!
//! ```text
//! ./executor/
//! └── {session-uuid}/
//!     ├── unit-test-runner.py   # harness entry point (read-only)
//!     ├── unittestlib.py        # harness support library (read-only)
//!     ├── usercode.py           # submitted solution (read-only)
//!     └── unittests.py          # submitted tests (read-only)
//! ```
//!
//! The directory is mounted read-only into the sandbox and removed when the session is
//! torn down, whatever the outcome.
//!
//! # Example
//!
//! ```no_run
//! use runalyzer::session::{Session, SessionConfig, WorkspaceFile, WorkspaceManager};
//!
//! # async fn demo() -> Result<(), runalyzer::error::SessionError> {
//! let manager = WorkspaceManager::open(SessionConfig::default())?;
//! let session = Session::new("code-runner");
//!
//! let paths = manager.create(&session.id).await?;
//! manager
//!     .populate(&paths, &[WorkspaceFile::new("usercode.py", "def solution(): ...")])
//!     .await?;
//!
//! // ... run the sandbox ...
//!
//! manager.destroy(&paths).await;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod state;
mod storage;

pub use lifecycle::{WorkspaceFile, WorkspaceManager};
pub use state::SessionState;
pub use storage::{WorkspacePaths, get_default_base_dir};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{trace, warn};
use uuid::Uuid;

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// One request's unit of isolation.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier (UUID v4, never time-derived).
    pub id: SessionId,
    /// Name used to launch and, if needed, forcibly kill the sandbox.
    pub sandbox_name: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the request was accepted.
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session with a fresh random id.
    ///
    /// The sandbox name is `{prefix}-{id}`.
    #[must_use]
    pub fn new(sandbox_prefix: &str) -> Self {
        Self::with_id(Uuid::new_v4(), sandbox_prefix)
    }

    /// Creates a session for a known id.
    #[must_use]
    pub fn with_id(id: SessionId, sandbox_prefix: &str) -> Self {
        Self {
            id,
            sandbox_name: sandbox_name(sandbox_prefix, &id),
            state: SessionState::Validating,
            started_at: Utc::now(),
        }
    }

    /// Moves the session to `next`.
    ///
    /// Illegal transitions are logged and ignored, leaving the state unchanged.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if self.state.can_transition_to(next) {
            trace!(id = %self.id, from = %self.state, to = %next, "Session state transition");
            self.state = next;
            true
        } else {
            warn!(id = %self.id, from = %self.state, to = %next, "Rejected session state transition");
            false
        }
    }

    /// Milliseconds since the session was accepted.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

/// Derives the sandbox name for a session id.
#[must_use]
pub fn sandbox_name(prefix: &str, id: &SessionId) -> String {
    format!("{prefix}-{id}")
}

/// Configuration for workspace management.
///
/// # Example
///
/// ```
/// use runalyzer::session::SessionConfig;
///
/// let config = SessionConfig::default().with_base_dir("/var/lib/runalyzer/executor");
/// assert!(config.sweep_on_start);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory under which per-session workspaces are created.
    ///
    /// Defaults to `./executor`.
    pub base_dir: PathBuf,

    /// Remove leftover workspaces from a previous run when the manager opens.
    pub sweep_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_dir: storage::get_default_base_dir(),
            sweep_on_start: true,
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base directory for workspaces.
    #[must_use]
    pub fn with_base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = path.into();
        self
    }

    /// Enables or disables the startup sweep.
    #[must_use]
    pub fn with_sweep_on_start(mut self, sweep: bool) -> Self {
        self.sweep_on_start = sweep;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert!(config.sweep_on_start);
        assert!(config.base_dir.to_string_lossy().contains("executor"));
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new()
            .with_base_dir("/tmp/test-executor")
            .with_sweep_on_start(false);

        assert_eq!(config.base_dir, PathBuf::from("/tmp/test-executor"));
        assert!(!config.sweep_on_start);
    }

    #[test]
    fn test_sandbox_name_is_derived_from_id() {
        let id = Uuid::new_v4();
        let session = Session::with_id(id, "code-runner");
        assert_eq!(session.sandbox_name, format!("code-runner-{id}"));
        assert_eq!(session.sandbox_name, sandbox_name("code-runner", &id));
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = Session::new("code-runner");
        let b = Session::new("code-runner");
        assert_ne!(a.id, b.id);
        assert_ne!(a.sandbox_name, b.sandbox_name);
    }

    #[test]
    fn test_advance_rejects_illegal_transition() {
        let mut session = Session::new("code-runner");
        assert!(!session.advance(SessionState::Completed));
        assert_eq!(session.state, SessionState::Validating);

        assert!(session.advance(SessionState::WorkspaceReady));
        assert!(session.advance(SessionState::TornDown));
        assert!(session.state.is_terminal());
    }
}
