//! Filesystem layout for session workspaces.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::SessionError;
use crate::session::SessionId;

/// Executor directory permissions: owner rwx, others may traverse (0711).
///
/// Listing is denied so one session cannot enumerate its neighbours' ids.
pub(crate) const BASE_DIR_PERMISSIONS: u32 = 0o711;

/// Workspace directory permissions (0755).
///
/// The sandbox runs under an unprivileged identity that may differ from the service
/// user, so the workspace must be world-readable.
pub(crate) const WORKSPACE_PERMISSIONS: u32 = 0o755;

/// Permissions of populated files (0444).
pub(crate) const FILE_PERMISSIONS: u32 = 0o444;

/// Paths for a session's workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    /// Session this workspace belongs to.
    pub session_id: SessionId,
    /// Workspace directory (`{base_dir}/{session-id}/`).
    pub root: PathBuf,
}

impl WorkspacePaths {
    /// Computes the workspace paths for a session. Creates nothing.
    #[must_use]
    pub fn new(base_dir: &Path, session_id: SessionId) -> Self {
        Self {
            session_id,
            root: base_dir.join(session_id.to_string()),
        }
    }

    /// Path of a file inside the workspace.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Checks if this workspace exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.exists()
    }
}

/// Returns the default executor directory, `./executor`.
///
/// `RUNALYZER_EXECUTOR_DIR` overrides it.
#[must_use]
pub fn get_default_base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RUNALYZER_EXECUTOR_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("./executor")
}

/// Creates the executor directory if missing and restricts it to 0711.
///
/// An existing directory is left as found.
///
/// # Errors
///
/// Returns `SessionError::IoError` if the directory cannot be created or chmodded.
pub fn ensure_base_dir(base_dir: &Path) -> Result<(), SessionError> {
    if base_dir.is_dir() {
        return Ok(());
    }

    let io_error = |action: &str, source| SessionError::IoError {
        context: format!("failed to {action} executor directory {}", base_dir.display()),
        source,
    };

    fs::DirBuilder::new()
        .recursive(true)
        .create(base_dir)
        .map_err(|e| io_error("create", e))?;
    fs::set_permissions(base_dir, fs::Permissions::from_mode(BASE_DIR_PERMISSIONS))
        .map_err(|e| io_error("restrict", e))
}

/// Rejects file names that could escape the workspace or hide from listing.
pub(crate) fn validate_file_name(name: &str) -> Result<(), SessionError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(SessionError::InvalidFileName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_workspace_paths_new() {
        let base_dir = PathBuf::from("/tmp/test-executor");
        let session_id = Uuid::new_v4();
        let paths = WorkspacePaths::new(&base_dir, session_id);

        assert_eq!(paths.root, base_dir.join(session_id.to_string()));
        assert_eq!(paths.file("usercode.py"), paths.root.join("usercode.py"));
        assert_eq!(paths.session_id, session_id);
    }

    #[test]
    fn test_ensure_base_dir_sets_permissions() {
        let temp = tempfile::tempdir().expect("failed to create tempdir");
        let base_dir = temp.path().join("executor");

        ensure_base_dir(&base_dir).expect("failed to create base dir");

        let mode = fs::metadata(&base_dir)
            .expect("failed to read metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, BASE_DIR_PERMISSIONS);

        // Second call is a no-op.
        ensure_base_dir(&base_dir).expect("second call should succeed");
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("usercode.py").is_ok());
        assert!(validate_file_name("unit-test-runner.py").is_ok());

        for bad in ["", ".hidden", "../escape.py", "a/b.py", "..", "nul\0.py"] {
            assert!(
                matches!(
                    validate_file_name(bad),
                    Err(SessionError::InvalidFileName { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_get_default_base_dir() {
        let base_dir = get_default_base_dir();
        assert!(!base_dir.as_os_str().is_empty());
    }
}
