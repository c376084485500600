//! Translation of a session into a container runtime invocation.
//!
//! [`build_invocation`] is pure: it reads no environment, touches no disk and returns
//! the same argument vector for the same inputs. Request data only reaches it through
//! [`SandboxLimits`], which is range-checked, so user content never appears in the
//! arguments.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use super::config::{SandboxLimits, SandboxPolicy, WORKSPACE_MOUNT_POINT};
use crate::session::{SessionId, sandbox_name};

/// Exit status of coreutils `timeout` when the wrapped command ran out of time.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit status of a process ended by SIGKILL (128 + 9): the memory cgroup, or
/// `timeout` escalating after [`KILL_AFTER_SECS`].
pub const KILLED_EXIT_CODE: i32 = 137;

/// Seconds between the in-sandbox SIGTERM and the SIGKILL that follows it.
pub const KILL_AFTER_SECS: u32 = 2;

/// Time allowed for the runtime to create and start the container.
pub const STARTUP_ALLOWANCE: Duration = Duration::from_secs(2);

/// A ready-to-spawn runtime command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInvocation {
    /// Runtime binary.
    pub program: String,
    /// Arguments passed to the runtime.
    pub args: Vec<String>,
    /// Name the sandbox is launched under.
    pub sandbox_name: String,
    /// Wall-clock limit enforced inside the sandbox.
    pub time_limit: Duration,
}

impl SandboxInvocation {
    /// Point after launch at which the sandbox is stopped from outside.
    ///
    /// Past the in-sandbox SIGTERM and SIGKILL, plus the container startup time.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.time_limit + Duration::from_secs(u64::from(KILL_AFTER_SECS)) + STARTUP_ALLOWANCE
    }

    /// Converts into a process command with stdin closed and both output streams piped.
    #[must_use]
    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Builds the `run` invocation for one session.
///
/// `workspace` must be the absolute, already-validated workspace directory and
/// `entry_point` the harness file name inside it.
#[must_use]
pub fn build_invocation(
    session_id: &SessionId,
    workspace: &Path,
    limits: &SandboxLimits,
    policy: &SandboxPolicy,
    entry_point: &str,
) -> SandboxInvocation {
    let name = sandbox_name(&policy.name_prefix, session_id);
    let memory = format!("{}m", limits.memory_mb());

    let mut args: Vec<String> = vec!["run".into(), "--rm".into(), "--name".into(), name.clone()];

    // Isolation
    args.extend([
        "--network".into(),
        "none".into(),
        "--read-only".into(),
        "--tmpfs".into(),
        format!("/tmp:rw,noexec,nosuid,size={}m", limits.tmp_size_mb()),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--user".into(),
        policy.effective_user().to_string(),
    ]);

    // Resources
    args.extend([
        "--pids-limit".into(),
        policy.pids_limit.to_string(),
        "--cpus".into(),
        limits.cpus().to_string(),
        "--memory".into(),
        memory.clone(),
        "--memory-swap".into(),
        memory,
    ]);

    // Workspace
    args.extend([
        "--env".into(),
        "PYTHONDONTWRITEBYTECODE=1".into(),
        "--volume".into(),
        format!("{}:{WORKSPACE_MOUNT_POINT}:ro", workspace.display()),
        "--workdir".into(),
        WORKSPACE_MOUNT_POINT.into(),
    ]);

    args.extend([
        policy.image.clone(),
        "bash".into(),
        "-c".into(),
        format!(
            "exec timeout --kill-after={KILL_AFTER_SECS}s {}s python3 {entry_point}",
            limits.timeout_secs()
        ),
    ]);

    SandboxInvocation {
        program: policy.runtime.clone(),
        args,
        sandbox_name: name,
        time_limit: Duration::from_secs(u64::from(limits.timeout_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxUser;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    fn invocation(limits: &SandboxLimits) -> (Uuid, SandboxInvocation) {
        let id = Uuid::new_v4();
        let workspace = PathBuf::from(format!("/srv/executor/{id}"));
        let policy = SandboxPolicy::default().with_user(SandboxUser { uid: 1000, gid: 1000 });
        (
            id,
            build_invocation(&id, &workspace, limits, &policy, "unit-test-runner.py"),
        )
    }

    #[test]
    fn test_same_inputs_same_arguments() {
        let id = Uuid::new_v4();
        let workspace = PathBuf::from("/srv/executor").join(id.to_string());
        let limits = SandboxLimits::default();
        let policy = SandboxPolicy::default();

        let a = build_invocation(&id, &workspace, &limits, &policy, "unit-test-runner.py");
        let b = build_invocation(&id, &workspace, &limits, &policy, "unit-test-runner.py");
        assert_eq!(a, b);
    }

    #[test]
    fn test_isolation_flags_always_present() {
        let (id, inv) = invocation(&SandboxLimits::default());

        assert_eq!(inv.program, "docker");
        assert_eq!(inv.args[0], "run");
        assert!(inv.args.contains(&"--rm".to_string()));
        assert!(inv.args.contains(&"--read-only".to_string()));
        assert_eq!(flag_value(&inv.args, "--name"), Some(inv.sandbox_name.as_str()));
        assert_eq!(inv.sandbox_name, format!("code-runner-{id}"));
        assert_eq!(flag_value(&inv.args, "--network"), Some("none"));
        assert_eq!(flag_value(&inv.args, "--cap-drop"), Some("ALL"));
        assert_eq!(
            flag_value(&inv.args, "--security-opt"),
            Some("no-new-privileges")
        );
        assert_eq!(flag_value(&inv.args, "--user"), Some("1000:1000"));
        assert_eq!(flag_value(&inv.args, "--workdir"), Some("/code"));
        assert_eq!(
            flag_value(&inv.args, "--volume"),
            Some(format!("/srv/executor/{id}:/code:ro").as_str())
        );
    }

    #[test]
    fn test_limits_are_applied() {
        let limits = SandboxLimits::new(30, 512, 1.5, 50).expect("valid limits");
        let (_, inv) = invocation(&limits);

        assert_eq!(flag_value(&inv.args, "--cpus"), Some("1.5"));
        assert_eq!(flag_value(&inv.args, "--memory"), Some("512m"));
        assert_eq!(flag_value(&inv.args, "--memory-swap"), Some("512m"));
        assert_eq!(flag_value(&inv.args, "--pids-limit"), Some("64"));
        assert_eq!(
            flag_value(&inv.args, "--tmpfs"),
            Some("/tmp:rw,noexec,nosuid,size=50m")
        );
        assert_eq!(
            inv.args.last().map(String::as_str),
            Some("exec timeout --kill-after=2s 30s python3 unit-test-runner.py")
        );
        assert_eq!(inv.time_limit, Duration::from_secs(30));
    }

    #[test]
    fn test_deadline_covers_kill_escalation() {
        let limits = SandboxLimits::new(1, 256, 0.5, 100).expect("valid limits");
        let (_, inv) = invocation(&limits);

        assert_eq!(inv.deadline(), Duration::from_secs(5));
        assert!(inv.deadline() > inv.time_limit + Duration::from_secs(u64::from(KILL_AFTER_SECS)));
    }

    #[test]
    fn test_image_precedes_entry_command() {
        let (_, inv) = invocation(&SandboxLimits::default());
        let image_pos = inv
            .args
            .iter()
            .position(|a| a == "python:3.10-slim")
            .expect("image present");
        assert_eq!(inv.args[image_pos + 1], "bash");
        assert_eq!(inv.args[image_pos + 2], "-c");
        assert_eq!(inv.args.len(), image_pos + 4);
    }
}
