//! Sandbox policy and resource limits.
//!
//! [`SandboxPolicy`] holds the service-wide, operator-controlled settings that every
//! sandbox launch inherits. [`ResourceLimits`] is the optional per-request override as
//! it arrives on the wire, and [`SandboxLimits`] is the validated, fully-resolved set
//! that the command builder consumes.

use std::ops::RangeInclusive;
use std::str::FromStr;

use nix::unistd::{getgid, getuid};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LimitViolation};

/// Directory inside the sandbox where the workspace is mounted.
pub const WORKSPACE_MOUNT_POINT: &str = "/code";

/// Accepted wall-clock limits, in whole seconds.
pub const TIMEOUT_RANGE: RangeInclusive<u32> = 1..=300;
/// Accepted memory ceilings, in whole megabytes.
pub const MEMORY_RANGE: RangeInclusive<u32> = 64..=2048;
/// Accepted CPU shares. Values must also be a multiple of [`CPUS_STEP`].
pub const CPUS_RANGE: RangeInclusive<f64> = 0.5..=4.0;
/// Granularity of the CPU share.
pub const CPUS_STEP: f64 = 0.5;
/// Accepted `/tmp` sizes, in whole megabytes.
pub const TMP_SIZE_RANGE: RangeInclusive<u32> = 10..=1024;

/// Fallback identity when the service itself runs as root.
const UNPRIVILEGED_FALLBACK: SandboxUser = SandboxUser {
    uid: 1000,
    gid: 1000,
};

/// Numeric identity the sandboxed process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxUser {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}

impl SandboxUser {
    /// Returns true for uid 0 or gid 0.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.uid == 0 || self.gid == 0
    }

    /// The identity of the current process, with root mapped to `1000:1000`.
    #[must_use]
    pub fn current_or_fallback() -> Self {
        let current = Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
        };
        if current.is_root() {
            UNPRIVILEGED_FALLBACK
        } else {
            current
        }
    }
}

impl FromStr for SandboxUser {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uid, gid) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidUser(s.to_string()))?;
        let uid = uid
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidUser(s.to_string()))?;
        let gid = gid
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidUser(s.to_string()))?;
        Ok(Self { uid, gid })
    }
}

impl std::fmt::Display for SandboxUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Service-wide sandbox settings.
///
/// None of these can be influenced by request data.
///
/// # Example
///
/// ```
/// use runalyzer::sandbox::SandboxPolicy;
///
/// let policy = SandboxPolicy::default()
///     .with_runtime("podman")
///     .with_image("python:3.12-slim")
///     .with_pids_limit(32);
/// assert_eq!(policy.name_prefix, "code-runner");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    /// Docker-compatible CLI used to run, kill and remove sandboxes.
    pub runtime: String,

    /// Container image providing `bash`, `timeout` and `python3`.
    pub image: String,

    /// Identity inside the sandbox. `None` means the service's own, never root.
    pub user: Option<SandboxUser>,

    /// Prefix of sandbox names (`{prefix}-{session-id}`).
    pub name_prefix: String,

    /// Maximum number of processes inside one sandbox.
    pub pids_limit: u32,

    /// Bytes of stdout and of stderr kept per execution. Output beyond this is read
    /// and discarded.
    pub max_output_bytes: usize,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            runtime: String::from("docker"),
            image: String::from("python:3.10-slim"),
            user: None,
            name_prefix: String::from("code-runner"),
            pids_limit: 64,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxPolicy {
    /// Creates a new policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime binary.
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Sets the container image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets an explicit sandbox identity.
    #[must_use]
    pub fn with_user(mut self, user: SandboxUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Sets the sandbox name prefix.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Sets the process limit.
    #[must_use]
    pub fn with_pids_limit(mut self, pids: u32) -> Self {
        self.pids_limit = pids;
        self
    }

    /// Sets the per-stream capture cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// The identity the sandbox will actually run as.
    #[must_use]
    pub fn effective_user(&self) -> SandboxUser {
        match self.user {
            Some(user) if !user.is_root() => user,
            _ => SandboxUser::current_or_fallback(),
        }
    }

    /// Checks operator-supplied values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::RootUser` if the configured identity is root.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user.is_some_and(|u| u.is_root()) {
            return Err(ConfigError::RootUser);
        }
        Ok(())
    }
}

/// Fully-resolved resource ceilings for one sandbox.
///
/// Only constructible through [`SandboxLimits::new`] or [`ResourceLimits::resolve`],
/// so every value is inside its accepted range. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SandboxLimits {
    timeout_secs: u32,
    memory_mb: u32,
    cpus: f64,
    tmp_size_mb: u32,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            memory_mb: 256,
            cpus: 0.5,
            tmp_size_mb: 100,
        }
    }
}

impl SandboxLimits {
    /// Builds a validated limit set.
    ///
    /// # Errors
    ///
    /// Returns `LimitViolation` for the first field outside its range.
    pub fn new(
        timeout_secs: u32,
        memory_mb: u32,
        cpus: f64,
        tmp_size_mb: u32,
    ) -> Result<Self, LimitViolation> {
        ResourceLimits {
            timeout: Some(f64::from(timeout_secs)),
            memory: Some(f64::from(memory_mb)),
            cpus: Some(cpus),
            tmp_size: Some(f64::from(tmp_size_mb)),
        }
        .resolve(&Self::default())
    }

    /// Wall-clock limit enforced inside the sandbox.
    #[must_use]
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Memory ceiling in megabytes.
    #[must_use]
    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }

    /// CPU share.
    #[must_use]
    pub fn cpus(&self) -> f64 {
        self.cpus
    }

    /// Size of the `/tmp` tmpfs in megabytes.
    #[must_use]
    pub fn tmp_size_mb(&self) -> u32 {
        self.tmp_size_mb
    }
}

/// Per-request limit overrides as they arrive on the wire.
///
/// Every field is optional; absent fields fall back to the service defaults.
/// Numbers are accepted as JSON numbers and checked for range and integrality in
/// [`validate`](Self::validate), so `5.0` is a valid timeout and `5.5` is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock limit in seconds.
    #[serde(default, alias = "timeoutSeconds", alias = "timeout_seconds")]
    pub timeout: Option<f64>,

    /// Memory ceiling in megabytes.
    #[serde(default, alias = "memoryMB", alias = "memory_mb")]
    pub memory: Option<f64>,

    /// CPU share.
    #[serde(default)]
    pub cpus: Option<f64>,

    /// `/tmp` size in megabytes.
    #[serde(default, alias = "tmpSizeMB", alias = "tmp_size_mb")]
    pub tmp_size: Option<f64>,
}

impl ResourceLimits {
    /// Checks every present field against its range.
    ///
    /// # Errors
    ///
    /// Returns `LimitViolation` for the first offending field.
    pub fn validate(&self) -> Result<(), LimitViolation> {
        if let Some(v) = self.timeout {
            whole_in_range("timeout", "an integer between 1 and 300", v, &TIMEOUT_RANGE)?;
        }
        if let Some(v) = self.memory {
            whole_in_range("memory", "an integer between 64 and 2048", v, &MEMORY_RANGE)?;
        }
        if let Some(v) = self.cpus {
            let on_step = (v / CPUS_STEP).fract() == 0.0;
            if !(v.is_finite() && CPUS_RANGE.contains(&v) && on_step) {
                return Err(LimitViolation {
                    field: "cpus",
                    expected: "a multiple of 0.5 between 0.5 and 4.0",
                    value: v,
                });
            }
        }
        if let Some(v) = self.tmp_size {
            whole_in_range("tmp_size", "an integer between 10 and 1024", v, &TMP_SIZE_RANGE)?;
        }
        Ok(())
    }

    /// Validates and merges field-wise over `defaults`.
    ///
    /// # Errors
    ///
    /// Returns `LimitViolation` if any present field is out of range.
    pub fn resolve(&self, defaults: &SandboxLimits) -> Result<SandboxLimits, LimitViolation> {
        self.validate()?;
        // Validated values are whole and bounded by u32 ranges, so the casts are exact.
        Ok(SandboxLimits {
            timeout_secs: self.timeout.map_or(defaults.timeout_secs, |v| v as u32),
            memory_mb: self.memory.map_or(defaults.memory_mb, |v| v as u32),
            cpus: self.cpus.unwrap_or(defaults.cpus),
            tmp_size_mb: self.tmp_size.map_or(defaults.tmp_size_mb, |v| v as u32),
        })
    }
}

fn whole_in_range(
    field: &'static str,
    expected: &'static str,
    value: f64,
    range: &RangeInclusive<u32>,
) -> Result<(), LimitViolation> {
    let ok = value.is_finite()
        && value.fract() == 0.0
        && value >= f64::from(*range.start())
        && value <= f64::from(*range.end());
    if ok {
        Ok(())
    } else {
        Err(LimitViolation {
            field,
            expected,
            value,
        })
    }
}
