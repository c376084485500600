//! Service configuration.

use std::net::{Ipv4Addr, SocketAddr};

use crate::error::ConfigError;
use crate::sandbox::{SandboxLimits, SandboxPolicy};
use crate::session::SessionConfig;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// Default cap on request body size (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Everything the service needs to start.
///
/// # Example
///
/// ```
/// use runalyzer::config::ServiceConfig;
/// use runalyzer::sandbox::SandboxPolicy;
///
/// let config = ServiceConfig::new("s3cret")
///     .with_policy(SandboxPolicy::default().with_image("python:3.12-slim"))
///     .with_max_body_bytes(256 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on.
    pub bind_addr: SocketAddr,

    /// Shared secret every request must present.
    pub api_key: String,

    /// Workspace settings.
    pub session: SessionConfig,

    /// Sandbox launch policy.
    pub policy: SandboxPolicy,

    /// Limits applied where a request does not override them.
    pub default_limits: SandboxLimits,

    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl ServiceConfig {
    /// Creates a configuration with defaults and the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            api_key: api_key.into(),
            session: SessionConfig::default(),
            policy: SandboxPolicy::default(),
            default_limits: SandboxLimits::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the workspace configuration.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the sandbox policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the default limits.
    #[must_use]
    pub fn with_default_limits(mut self, limits: SandboxLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Sets the request body cap.
    #[must_use]
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Checks values that cannot be enforced by construction.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingApiKey` for an empty or blank key and
    /// `ConfigError::RootUser` for a root sandbox identity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        self.policy.validate()
    }
}
