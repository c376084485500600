//! Host requirements checking implementation.

use std::path::Path;
use std::process::{Command, Stdio};

use nix::unistd::{AccessFlags, access};
use tracing::{debug, instrument};

use crate::error::{Result, SystemRequirementsError};

/// Results of all host checks.
#[derive(Debug, Clone)]
pub struct SystemRequirements {
    /// Runtime binary that was checked.
    pub runtime: String,
    /// Server version reported by the runtime daemon.
    pub runtime_version: String,
    /// Kernel release (e.g. "6.8.0-45-generic"), for the startup log.
    pub kernel_version: String,
    /// Whether the executor directory is writable by this process.
    pub executor_dir_writable: bool,
}

/// Runs every host check and returns the collected results.
///
/// # Errors
///
/// Returns the first failing requirement.
#[instrument]
pub fn check_all(runtime: &str, executor_dir: &Path) -> Result<SystemRequirements> {
    let runtime_version = check_runtime(runtime)?;
    let kernel_version = kernel_release()?;
    check_executor_dir(executor_dir)?;

    Ok(SystemRequirements {
        runtime: runtime.to_string(),
        runtime_version,
        kernel_version,
        executor_dir_writable: true,
    })
}

/// Checks that the runtime CLI exists and its daemon answers.
///
/// # Returns
///
/// The daemon's server version.
///
/// # Errors
///
/// Returns `SystemRequirementsError::RuntimeUnavailable` if the binary cannot be
/// started or `version` fails.
pub fn check_runtime(runtime: &str) -> Result<String> {
    let output = Command::new(runtime)
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SystemRequirementsError::RuntimeUnavailable {
            runtime: runtime.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SystemRequirementsError::RuntimeUnavailable {
            runtime: runtime.to_string(),
            reason: first_line(&stderr)
                .unwrap_or("`version` exited unsuccessfully")
                .to_string(),
        }
        .into());
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(runtime, %version, "Container runtime reachable");
    Ok(version)
}

/// Checks that the executor directory, or its nearest existing ancestor, is
/// writable and searchable by this process.
///
/// # Errors
///
/// Returns `SystemRequirementsError::ExecutorDirUnwritable` otherwise.
pub fn check_executor_dir(path: &Path) -> Result<()> {
    let existing = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("."));

    access(existing, AccessFlags::W_OK | AccessFlags::X_OK).map_err(|_| {
        SystemRequirementsError::ExecutorDirUnwritable {
            path: path.display().to_string(),
        }
    })?;

    debug!(path = %path.display(), checked = %existing.display(), "Executor directory writable");
    Ok(())
}

/// Reads the kernel release via `uname`.
///
/// # Errors
///
/// Returns `SystemRequirementsError::ReadFailed` if the syscall fails.
pub fn kernel_release() -> Result<String> {
    let uname = nix::sys::utsname::uname().map_err(|e| SystemRequirementsError::ReadFailed {
        context: "uname syscall".to_string(),
        source: std::io::Error::from_raw_os_error(e as i32),
    })?;
    Ok(uname.release().to_string_lossy().to_string())
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_missing_runtime_is_unavailable() {
        let result = check_runtime("/nonexistent/runtime-binary");
        assert!(matches!(
            result,
            Err(Error::SystemRequirements(
                SystemRequirementsError::RuntimeUnavailable { .. }
            ))
        ));
    }

    #[test]
    fn test_failing_runtime_is_unavailable() {
        // `false` ignores its arguments and exits 1.
        let result = check_runtime("false");
        assert!(matches!(
            result,
            Err(Error::SystemRequirements(
                SystemRequirementsError::RuntimeUnavailable { .. }
            ))
        ));
    }

    #[test]
    fn test_executor_dir_checks_nearest_ancestor() {
        let temp = tempfile::tempdir().expect("failed to create tempdir");
        let not_yet_created = temp.path().join("executor").join("nested");
        assert!(check_executor_dir(&not_yet_created).is_ok());
    }

    #[test]
    fn test_kernel_release_real() {
        let release = kernel_release().expect("uname should work on Linux");
        assert!(!release.is_empty());
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("\n  Cannot connect\nmore"), Some("Cannot connect"));
        assert_eq!(first_line("  \n"), None);
    }
}
