//! Per-request session state machine.

use serde::{Deserialize, Serialize};

/// State of a session in its lifecycle.
///
/// ```text
/// Validating -> WorkspaceReady -> SandboxRunning -> {Completed | TimedOut | Crashed} -> TornDown
/// ```
///
/// `WorkspaceReady` and `SandboxRunning` may also go straight to `TornDown` when an
/// internal fault aborts the session before classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Request is being checked; nothing is allocated yet.
    #[default]
    Validating,
    /// Workspace exists and holds the harness and user files.
    WorkspaceReady,
    /// Sandbox process launched and registered.
    SandboxRunning,
    /// Sandbox exited on its own.
    Completed,
    /// Sandbox hit its enforced wall-clock limit.
    TimedOut,
    /// Sandbox could not be launched or collected.
    Crashed,
    /// Sandbox unregistered and workspace removed.
    TornDown,
}

impl SessionState {
    /// Returns true if `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Validating, WorkspaceReady)
                | (WorkspaceReady, SandboxRunning)
                | (WorkspaceReady, TornDown)
                | (SandboxRunning, Completed)
                | (SandboxRunning, TimedOut)
                | (SandboxRunning, Crashed)
                | (SandboxRunning, TornDown)
                | (Completed, TornDown)
                | (TimedOut, TornDown)
                | (Crashed, TornDown)
        )
    }

    /// Returns true once the session can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == SessionState::TornDown
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::WorkspaceReady => write!(f, "workspace_ready"),
            Self::SandboxRunning => write!(f, "sandbox_running"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Crashed => write!(f, "crashed"),
            Self::TornDown => write!(f, "torn_down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            SessionState::Validating,
            SessionState::WorkspaceReady,
            SessionState::SandboxRunning,
            SessionState::Completed,
            SessionState::TornDown,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_validating_cannot_skip_to_teardown() {
        // Rejections before allocation have nothing to tear down.
        assert!(!SessionState::Validating.can_transition_to(SessionState::TornDown));
        assert!(!SessionState::Validating.can_transition_to(SessionState::SandboxRunning));
    }

    #[test]
    fn test_torn_down_is_terminal() {
        assert!(SessionState::TornDown.is_terminal());
        for next in [
            SessionState::Validating,
            SessionState::WorkspaceReady,
            SessionState::SandboxRunning,
            SessionState::Completed,
            SessionState::TornDown,
        ] {
            assert!(!SessionState::TornDown.can_transition_to(next));
        }
    }

    #[test]
    fn test_outcomes_lead_only_to_teardown() {
        for outcome in [
            SessionState::Completed,
            SessionState::TimedOut,
            SessionState::Crashed,
        ] {
            assert!(outcome.can_transition_to(SessionState::TornDown));
            assert!(!outcome.can_transition_to(SessionState::SandboxRunning));
        }
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Validating), "validating");
        assert_eq!(format!("{}", SessionState::TimedOut), "timed_out");
        assert_eq!(format!("{}", SessionState::TornDown), "torn_down");
    }
}
