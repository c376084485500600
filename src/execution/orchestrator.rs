//! One request in, one isolated execution out.
//!
//! [`Orchestrator::execute`] drives a session through its states:
//!
//! ```text
//! Validating -> WorkspaceReady -> SandboxRunning -> {Completed | TimedOut | Crashed} -> TornDown
//! ```
//!
//! Per session the order is fixed: population, then registration, then launch,
//! then wait, then classification, then teardown. Teardown (unregister the sandbox
//! name, remove the workspace) runs exactly once on every path after the workspace
//! exists. If the future is dropped or panics before that, [`SessionGuard`] does a
//! synchronous best-effort teardown instead.

use tracing::{Span, debug, error, field, info, instrument, warn};

use super::classifier::{ExecutionResult, FailureReason, classify};
use super::harness::HarnessKind;
use super::request::{RunRequest, ValidatedRequest};
use crate::error::RequestError;
use crate::sandbox::{
    MountPolicyGuard, SandboxContainer, SandboxLimits, SandboxPolicy, SandboxRegistry,
    build_invocation,
};
use crate::session::{Session, SessionState, WorkspaceManager, WorkspacePaths};

/// Runs validated requests in sandboxes.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    workspaces: WorkspaceManager,
    registry: SandboxRegistry,
    policy: SandboxPolicy,
    defaults: SandboxLimits,
    api_key: String,
    mount_guard: MountPolicyGuard,
}

impl Orchestrator {
    /// Creates an orchestrator over shared collaborators.
    #[must_use]
    pub fn new(
        workspaces: WorkspaceManager,
        registry: SandboxRegistry,
        policy: SandboxPolicy,
        defaults: SandboxLimits,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            workspaces,
            registry,
            policy,
            defaults,
            api_key: api_key.into(),
            mount_guard: MountPolicyGuard::new(),
        }
    }

    /// The registry sandboxes are tracked in.
    #[must_use]
    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    /// The workspace manager.
    #[must_use]
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Service-wide default limits.
    #[must_use]
    pub fn defaults(&self) -> &SandboxLimits {
        &self.defaults
    }

    /// Executes one request.
    ///
    /// Infrastructure faults are reported as `Ok(ExecutionResult::Failure)` with
    /// [`FailureReason::InternalError`]; only request rejections are `Err`.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::InvalidRequest` or `RequestError::Unauthorized` before
    /// anything is allocated.
    #[instrument(skip(self, request), fields(%kind, session_id = field::Empty))]
    pub async fn execute(
        &self,
        request: RunRequest,
        kind: HarnessKind,
    ) -> Result<ExecutionResult, RequestError> {
        let validated = request
            .validate(&self.defaults, &self.api_key)
            .inspect_err(|e| debug!(error = %e, "Request rejected"))?;

        let mut session = Session::new(&self.policy.name_prefix);
        Span::current().record("session_id", field::display(session.id));

        let paths = match self.workspaces.create(&session.id).await {
            Ok(paths) => paths,
            Err(e) => {
                error!(error = %e, "Failed to create workspace");
                return Ok(ExecutionResult::internal(e.to_string()));
            }
        };
        session.advance(SessionState::WorkspaceReady);

        let mut guard = SessionGuard::new(self, paths);
        let result = self
            .run_session(&mut session, &mut guard, validated, kind)
            .await;

        guard.teardown().await;
        session.advance(SessionState::TornDown);

        match result.failure_reason() {
            None => info!(elapsed_ms = session.elapsed_ms(), "Session completed"),
            Some(reason) => info!(
                elapsed_ms = session.elapsed_ms(),
                %reason,
                exit_code = ?result.exit_code(),
                "Session failed"
            ),
        }

        Ok(result)
    }

    async fn run_session(
        &self,
        session: &mut Session,
        guard: &mut SessionGuard<'_>,
        request: ValidatedRequest,
        kind: HarnessKind,
    ) -> ExecutionResult {
        let files = kind.workspace_files(&request.user_code, &request.tests);
        if let Err(e) = self.workspaces.populate(&guard.paths, &files).await {
            error!(error = %e, "Failed to populate workspace");
            return ExecutionResult::internal(e.to_string());
        }

        let mount_source = match self
            .mount_guard
            .validate_session_mount(self.workspaces.base_dir(), &guard.paths.root)
        {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Workspace rejected by mount policy");
                return ExecutionResult::internal(e.to_string());
            }
        };

        let invocation = build_invocation(
            &session.id,
            &mount_source,
            &request.limits,
            &self.policy,
            kind.entry_point(),
        );

        if let Err(e) = self.registry.register(&invocation.sandbox_name) {
            warn!(error = %e, "Sandbox not launched");
            return ExecutionResult::internal(e.to_string());
        }
        guard.sandbox_name = Some(invocation.sandbox_name.clone());
        session.advance(SessionState::SandboxRunning);

        debug!(
            timeout_secs = request.limits.timeout_secs(),
            memory_mb = request.limits.memory_mb(),
            cpus = request.limits.cpus(),
            "Launching sandbox"
        );

        let output = match SandboxContainer::new(invocation, self.policy.max_output_bytes)
            .with_registry(self.registry.clone())
            .run()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Sandbox run failed");
                session.advance(SessionState::Crashed);
                return ExecutionResult::internal(e.to_string());
            }
        };

        let result = classify(&output);
        session.advance(match result.failure_reason() {
            Some(FailureReason::TimedOut) => SessionState::TimedOut,
            _ => SessionState::Completed,
        });
        result
    }
}

/// Teardown obligation for one session.
///
/// Call [`teardown`](Self::teardown) on the normal path. If the guard is dropped
/// without it, the sandbox is unregistered and killed and the workspace removed
/// synchronously.
struct SessionGuard<'a> {
    orchestrator: &'a Orchestrator,
    paths: WorkspacePaths,
    /// Set once the name is registered; from then on the sandbox may be running.
    sandbox_name: Option<String>,
    armed: bool,
}

impl<'a> SessionGuard<'a> {
    fn new(orchestrator: &'a Orchestrator, paths: WorkspacePaths) -> Self {
        Self {
            orchestrator,
            paths,
            sandbox_name: None,
            armed: true,
        }
    }

    async fn teardown(mut self) {
        self.armed = false;
        if let Some(name) = &self.sandbox_name {
            self.orchestrator.registry.unregister(name);
        }
        self.orchestrator.workspaces.destroy(&self.paths).await;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(session_id = %self.paths.session_id, "Session abandoned, tearing down");
        if let Some(name) = &self.sandbox_name {
            self.orchestrator.registry.unregister(name);
            self.orchestrator.registry.kill_blocking(name);
        }
        self.orchestrator.workspaces.destroy_blocking(&self.paths);
    }
}
