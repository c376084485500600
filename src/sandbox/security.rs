//! Policy checks for host paths mounted into sandboxes.
//!
//! The only host path ever mounted is a session workspace, read-only, at `/code`.
//! Before a launch its source is validated so a misconfigured executor directory can
//! never expose credentials to submitted code.
//!
//! # Forbidden Paths
//!
//! These are never accepted as a mount source, nor anything beneath them:
//! - `~/.ssh`, `~/.aws`, `~/.gnupg`, `~/.kube`, `~/.docker`, `~/.config/gh`,
//!   `~/.config/gcloud`
//! - `~/.netrc`, `~/.git-credentials`, `~/.cargo/credentials*`, `~/.npmrc`, `~/.pypirc`
//! - `/etc/ssh`, `/etc/shadow`, `/etc/gshadow`, `/etc/sudoers`, `/run/secrets`
//! - any path containing `keyring`, `secret`, `credential` or `token`
//!
//! The Docker socket directory is rejected too: a workspace under it would hand
//! the sandbox control of the runtime.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::error::MountError;

/// Forbidden path prefixes relative to the home directory.
const FORBIDDEN_HOME_PREFIXES: &[&str] = &[
    ".ssh",
    ".aws",
    ".gnupg",
    ".kube",
    ".config/gh",
    ".config/gcloud",
    ".docker",
    ".netrc",
    ".git-credentials",
    ".cargo/credentials",
    ".cargo/credentials.toml",
    ".npmrc",
    ".pypirc",
];

/// Forbidden absolute path prefixes.
const FORBIDDEN_ABSOLUTE_PREFIXES: &[&str] = &[
    "/etc/ssh",
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/sudoers",
    "/run/secrets",
    "/var/run/docker.sock",
    "/run/docker.sock",
];

/// Forbidden substrings, matched case-insensitively against the canonical path.
const FORBIDDEN_PATTERNS: &[&str] = &["keyring", "secret", "credential", "token"];

/// Characters that would change the meaning of a `--volume src:dst:ro` argument.
const VOLUME_SPEC_DELIMITERS: &[char] = &[':', ','];

/// Why a prefix is denied, used in violation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeniedKind {
    Credentials,
    System,
}

impl DeniedKind {
    fn describe(self) -> &'static str {
        match self {
            Self::Credentials => "credential",
            Self::System => "system",
        }
    }
}

/// Validates host paths before they are bind-mounted.
#[derive(Debug, Clone)]
pub struct MountPolicyGuard {
    denied_prefixes: Vec<(PathBuf, DeniedKind)>,
}

impl MountPolicyGuard {
    /// Creates a guard with the home-relative and absolute deny lists resolved.
    #[must_use]
    pub fn new() -> Self {
        let home = get_home_dir();
        let home_prefixes = home.iter().flat_map(|home| {
            FORBIDDEN_HOME_PREFIXES
                .iter()
                .map(move |p| (home.join(p), DeniedKind::Credentials))
        });
        let system_prefixes = FORBIDDEN_ABSOLUTE_PREFIXES
            .iter()
            .map(|p| (PathBuf::from(p), DeniedKind::System));

        let denied_prefixes = home_prefixes
            .chain(system_prefixes)
            .map(|(path, kind)| (fs::canonicalize(&path).unwrap_or(path), kind))
            .collect();

        Self { denied_prefixes }
    }

    /// Checks a path that is about to become a mount source and returns its
    /// canonical form.
    ///
    /// # Errors
    ///
    /// Returns `MountError::SecurityViolation` if the path is relative, a symlink,
    /// unresolvable, or falls under a denied location.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn validate_mount_source(&self, path: &Path) -> Result<PathBuf, MountError> {
        let violation = |what: &str| {
            MountError::SecurityViolation(format!("{what}: {}", path.display()))
        };

        if !path.is_absolute() {
            return Err(violation("mount source must be absolute path"));
        }
        if path.is_symlink() {
            return Err(violation("mount source cannot be a symlink"));
        }

        let canonical = fs::canonicalize(path)
            .map_err(|e| violation(&format!("cannot resolve mount source ({e})")))?;
        debug!(canonical = %canonical.display(), "Resolved mount source");

        if let Some((prefix, kind)) = self
            .denied_prefixes
            .iter()
            .find(|(prefix, _)| canonical.starts_with(prefix))
        {
            return Err(MountError::SecurityViolation(format!(
                "mount source is under forbidden {} path: {}",
                kind.describe(),
                prefix.display()
            )));
        }

        let lowered = canonical.to_string_lossy().to_lowercase();
        if let Some(pattern) = FORBIDDEN_PATTERNS.iter().find(|p| lowered.contains(*p)) {
            warn!(pattern, path = %canonical.display(), "Mount source matches a denied pattern");
            return Err(MountError::SecurityViolation(format!(
                "mount source contains forbidden pattern '{pattern}': {}",
                canonical.display()
            )));
        }

        Ok(canonical)
    }

    /// Validates a directory that will hold session workspaces or be mounted as one.
    ///
    /// On top of [`validate_mount_source`](Self::validate_mount_source) the path must
    /// be a directory and must not contain characters that would corrupt the
    /// runtime's volume syntax. World-writable locations are accepted with a warning.
    ///
    /// # Errors
    ///
    /// Returns `MountError::SecurityViolation` if any check fails.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn validate_workspace(&self, path: &Path) -> Result<PathBuf, MountError> {
        let canonical = self.validate_mount_source(path)?;

        if !canonical.is_dir() {
            return Err(MountError::SecurityViolation(format!(
                "workspace must be a directory: {}",
                canonical.display()
            )));
        }

        if canonical.to_string_lossy().contains(VOLUME_SPEC_DELIMITERS) {
            return Err(MountError::SecurityViolation(format!(
                "workspace path must not contain ':' or ',': {}",
                canonical.display()
            )));
        }

        if let Ok(metadata) = fs::metadata(&canonical)
            && metadata.permissions().mode() & 0o002 != 0
        {
            warn!(
                path = %canonical.display(),
                mode = format!("{:o}", metadata.permissions().mode()),
                "Workspace directory is world-writable"
            );
        }

        Ok(canonical)
    }

    /// Validates a session workspace and checks it sits directly under `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `MountError::SecurityViolation` if the workspace fails
    /// [`validate_workspace`](Self::validate_workspace) or resolves outside `base_dir`.
    #[instrument(skip(self, base_dir), fields(path = %path.display()))]
    pub fn validate_session_mount(
        &self,
        base_dir: &Path,
        path: &Path,
    ) -> Result<PathBuf, MountError> {
        let canonical = self.validate_workspace(path)?;
        if canonical.parent() != Some(base_dir) {
            return Err(MountError::SecurityViolation(format!(
                "workspace {} is not a direct child of {}",
                canonical.display(),
                base_dir.display()
            )));
        }
        Ok(canonical)
    }
}

impl Default for MountPolicyGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the canonical home directory, if available.
pub fn get_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .and_then(|p| fs::canonicalize(&p).ok())
}
