//! Workspace lifecycle management.
//!
//! [`WorkspaceManager`] creates, populates and destroys the per-session workspace
//! directories. Creation and population are fallible and surface `SessionError`;
//! destruction never fails from the caller's point of view, because a stray
//! directory is a disk-space leak and must not mask the execution result.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::SessionError;
use crate::sandbox::MountPolicyGuard;
use crate::session::SessionId;
use crate::session::storage::{
    FILE_PERMISSIONS, WORKSPACE_PERMISSIONS, WorkspacePaths, ensure_base_dir, validate_file_name,
};

use super::SessionConfig;

/// A file to place in a workspace before launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFile {
    /// Plain file name, no directory components.
    pub name: String,
    /// File contents.
    pub contents: String,
}

impl WorkspaceFile {
    /// Creates a workspace file.
    #[must_use]
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Manages per-session workspace directories under a single executor directory.
///
/// Workspaces never share a path: the leaf directory is named after the session id
/// and created non-recursively, so a second `create` for the same id fails instead of
/// silently reusing the directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    config: SessionConfig,
    /// Canonical executor directory.
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Opens the executor directory, creating it if needed.
    ///
    /// The directory is canonicalized (the container runtime requires absolute mount
    /// sources) and checked against the mount policy. If `sweep_on_start` is set,
    /// workspaces left behind by a previous process are removed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::IoError` if the directory cannot be created or resolved,
    /// or `SessionError::Mount` if it sits under a forbidden path.
    #[instrument(skip(config), fields(base_dir = %config.base_dir.display()))]
    pub fn open(config: SessionConfig) -> Result<Self, SessionError> {
        ensure_base_dir(&config.base_dir)?;

        let canonical = fs::canonicalize(&config.base_dir).map_err(|e| SessionError::IoError {
            context: format!(
                "failed to resolve base directory: {}",
                config.base_dir.display()
            ),
            source: e,
        })?;

        let base_dir = MountPolicyGuard::new().validate_workspace(&canonical)?;

        let manager = Self { config, base_dir };

        if manager.config.sweep_on_start {
            let swept = manager.sweep_stale();
            if swept > 0 {
                warn!(swept, "Removed workspaces left over from a previous run");
            }
        }

        debug!(base_dir = %manager.base_dir.display(), "Workspace manager ready");
        Ok(manager)
    }

    /// Returns the canonical executor directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Computes the workspace paths for a session without touching the disk.
    #[must_use]
    pub fn paths_for(&self, id: &SessionId) -> WorkspacePaths {
        WorkspacePaths::new(&self.base_dir, *id)
    }

    /// Creates the workspace directory for a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyExists` if the session already has a workspace,
    /// or `SessionError::IoError` if the executor directory is not writable.
    #[instrument(skip(self), fields(%id))]
    pub async fn create(&self, id: &SessionId) -> Result<WorkspacePaths, SessionError> {
        let paths = self.paths_for(id);

        match tokio::fs::create_dir(&paths.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SessionError::AlreadyExists { id: id.to_string() });
            }
            Err(e) => {
                return Err(SessionError::IoError {
                    context: format!("failed to create workspace: {}", paths.root.display()),
                    source: e,
                });
            }
        }

        tokio::fs::set_permissions(
            &paths.root,
            fs::Permissions::from_mode(WORKSPACE_PERMISSIONS),
        )
        .await
        .map_err(|e| SessionError::IoError {
            context: format!("failed to set permissions on: {}", paths.root.display()),
            source: e,
        })?;

        trace!(root = %paths.root.display(), "Workspace created");
        Ok(paths)
    }

    /// Writes files into a workspace.
    ///
    /// Each file is written under a hidden temporary name, flushed, renamed into
    /// place and made read-only, so a reader never observes a partial file.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidFileName` for names with path components, or
    /// `SessionError::IoError` if a write fails.
    #[instrument(skip(self, files), fields(session_id = %paths.session_id, count = files.len()))]
    pub async fn populate(
        &self,
        paths: &WorkspacePaths,
        files: &[WorkspaceFile],
    ) -> Result<(), SessionError> {
        for file in files {
            validate_file_name(&file.name)?;
        }

        for file in files {
            let target = paths.file(&file.name);
            let temp = paths.file(&format!(".{}.tmp", file.name));

            let mut handle =
                tokio::fs::File::create(&temp)
                    .await
                    .map_err(|e| SessionError::IoError {
                        context: format!("failed to create file: {}", temp.display()),
                        source: e,
                    })?;

            handle
                .write_all(file.contents.as_bytes())
                .await
                .map_err(|e| SessionError::IoError {
                    context: format!("failed to write file: {}", temp.display()),
                    source: e,
                })?;

            handle.sync_all().await.map_err(|e| SessionError::IoError {
                context: format!("failed to sync file: {}", temp.display()),
                source: e,
            })?;
            drop(handle);

            tokio::fs::set_permissions(&temp, fs::Permissions::from_mode(FILE_PERMISSIONS))
                .await
                .map_err(|e| SessionError::IoError {
                    context: format!("failed to set permissions on: {}", temp.display()),
                    source: e,
                })?;

            tokio::fs::rename(&temp, &target)
                .await
                .map_err(|e| SessionError::IoError {
                    context: format!(
                        "failed to rename {} to {}",
                        temp.display(),
                        target.display()
                    ),
                    source: e,
                })?;

            trace!(file = %file.name, bytes = file.contents.len(), "Workspace file written");
        }

        debug!("Workspace populated");
        Ok(())
    }

    /// Removes a workspace and everything in it.
    ///
    /// Never fails: errors are logged at `warn`. Returns true if a directory was
    /// removed, false if there was nothing to remove or removal failed.
    #[instrument(skip(self), fields(session_id = %paths.session_id))]
    pub async fn destroy(&self, paths: &WorkspacePaths) -> bool {
        match tokio::fs::remove_dir_all(&paths.root).await {
            Ok(()) => {
                trace!("Workspace removed");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Workspace already removed or never existed");
                false
            }
            Err(e) => {
                warn!(root = %paths.root.display(), error = %e, "Failed to remove workspace");
                false
            }
        }
    }

    /// Blocking variant of [`destroy`](Self::destroy) for drop guards.
    pub fn destroy_blocking(&self, paths: &WorkspacePaths) -> bool {
        match fs::remove_dir_all(&paths.root) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(root = %paths.root.display(), error = %e, "Failed to remove workspace");
                false
            }
        }
    }

    /// Lists the session ids that currently have a workspace on disk.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::IoError` if reading the directory fails.
    #[instrument(skip(self))]
    pub fn list_sessions(&self) -> Result<Vec<SessionId>, SessionError> {
        let entries = fs::read_dir(&self.base_dir).map_err(|e| SessionError::IoError {
            context: format!(
                "failed to read base directory: {}",
                self.base_dir.display()
            ),
            source: e,
        })?;

        let mut session_ids = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| SessionError::IoError {
                context: "failed to read directory entry".to_string(),
                source: e,
            })?;

            let path = entry.path();
            if path.is_dir()
                && let Some(id) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| Uuid::parse_str(n).ok())
            {
                session_ids.push(id);
            }
        }

        trace!(count = session_ids.len(), "Found workspaces");
        Ok(session_ids)
    }

    /// Removes every session workspace under the executor directory.
    ///
    /// Only directories named like a session id are touched. Meant for startup,
    /// before any request is accepted. Returns the number removed.
    #[instrument(skip(self))]
    pub fn sweep_stale(&self) -> usize {
        let mut cleaned_count = 0;

        for entry in WalkDir::new(&self.base_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }

            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|n| Uuid::parse_str(n).ok())
            else {
                continue;
            };

            if self.destroy_blocking(&self.paths_for(&id)) {
                debug!(%id, "Removed stale workspace");
                cleaned_count += 1;
            }
        }

        cleaned_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, WorkspaceManager) {
        let temp = tempfile::tempdir().expect("failed to create tempdir");
        let config = SessionConfig::new().with_base_dir(temp.path().join("executor"));
        let manager = WorkspaceManager::open(config).expect("failed to open manager");
        (temp, manager)
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let (_temp, manager) = manager();
        let id = Uuid::new_v4();

        manager.create(&id).await.expect("first create should succeed");
        let second = manager.create(&id).await;
        assert!(matches!(second, Err(SessionError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_populate_leaves_no_temp_files() {
        let (_temp, manager) = manager();
        let paths = manager
            .create(&Uuid::new_v4())
            .await
            .expect("failed to create workspace");

        manager
            .populate(
                &paths,
                &[
                    WorkspaceFile::new("usercode.py", "def solution(a, b):\n    return a + b\n"),
                    WorkspaceFile::new("unittests.py", "print('tests')\n"),
                ],
            )
            .await
            .expect("failed to populate");

        let mut names: Vec<String> = fs::read_dir(&paths.root)
            .expect("failed to list workspace")
            .map(|e| e.expect("bad entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["unittests.py", "usercode.py"]);

        let mode = fs::metadata(paths.file("usercode.py"))
            .expect("failed to stat file")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, FILE_PERMISSIONS);
    }

    #[tokio::test]
    async fn test_populate_rejects_path_components_before_writing() {
        let (_temp, manager) = manager();
        let paths = manager
            .create(&Uuid::new_v4())
            .await
            .expect("failed to create workspace");

        let result = manager
            .populate(
                &paths,
                &[
                    WorkspaceFile::new("usercode.py", "ok"),
                    WorkspaceFile::new("../outside.py", "nope"),
                ],
            )
            .await;

        assert!(matches!(result, Err(SessionError::InvalidFileName { .. })));
        assert!(!paths.file("usercode.py").exists());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (_temp, manager) = manager();
        let paths = manager
            .create(&Uuid::new_v4())
            .await
            .expect("failed to create workspace");

        assert!(manager.destroy(&paths).await);
        assert!(!manager.destroy(&paths).await);
        assert!(!manager.destroy_blocking(&paths));
        assert!(!paths.exists());
    }

    #[test]
    fn test_sweep_only_touches_session_directories() {
        let temp = tempfile::tempdir().expect("failed to create tempdir");
        let base = temp.path().join("executor");
        fs::create_dir_all(base.join(Uuid::new_v4().to_string())).expect("mkdir");
        fs::create_dir_all(base.join(Uuid::new_v4().to_string())).expect("mkdir");
        fs::create_dir_all(base.join("keep-me")).expect("mkdir");

        let manager = WorkspaceManager::open(
            SessionConfig::new()
                .with_base_dir(&base)
                .with_sweep_on_start(false),
        )
        .expect("failed to open manager");

        assert_eq!(manager.list_sessions().expect("list").len(), 2);
        assert_eq!(manager.sweep_stale(), 2);
        assert!(manager.list_sessions().expect("list").is_empty());
        assert!(base.join("keep-me").exists());
    }
}
