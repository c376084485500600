//! Process-wide service state.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::execution::Orchestrator;
use crate::sandbox::{DrainReport, SandboxRegistry};
use crate::session::WorkspaceManager;

/// Owns the sandbox registry, workspace manager and orchestrator.
///
/// Built once at startup and shared by every request handler. Two contexts in one
/// process share nothing.
#[derive(Debug)]
pub struct ServiceContext {
    config: ServiceConfig,
    orchestrator: Orchestrator,
    started_at: DateTime<Utc>,
}

impl ServiceContext {
    /// Validates the configuration and prepares the executor directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid settings or `Error::Session` if the
    /// executor directory cannot be prepared.
    #[instrument(skip(config), fields(base_dir = %config.session.base_dir.display()))]
    pub fn init(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let workspaces = WorkspaceManager::open(config.session.clone())?;
        let registry = SandboxRegistry::new(&config.policy.runtime);
        let orchestrator = Orchestrator::new(
            workspaces,
            registry,
            config.policy.clone(),
            config.default_limits,
            config.api_key.clone(),
        );

        info!(
            base_dir = %orchestrator.workspaces().base_dir().display(),
            runtime = %config.policy.runtime,
            image = %config.policy.image,
            user = %config.policy.effective_user(),
            "Service context ready"
        );

        Ok(Self {
            config,
            orchestrator,
            started_at: Utc::now(),
        })
    }

    /// The configuration the context was built from.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// The sandbox registry.
    #[must_use]
    pub fn registry(&self) -> &SandboxRegistry {
        self.orchestrator.registry()
    }

    /// Number of sandboxes currently tracked.
    #[must_use]
    pub fn running_sandboxes(&self) -> usize {
        self.registry().len()
    }

    /// When the context was built.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stops every tracked sandbox and refuses new launches.
    pub async fn drain(&self) -> DrainReport {
        self.registry().drain_all().await
    }
}
