//! Shared fixtures for the integration tests.
//!
//! A small shell script stands in for the Docker CLI. For `run` it finds the
//! workspace from the `--volume` argument and executes `usercode.py` as a shell
//! script, so each test controls the sandbox's stdout, stderr and exit code through
//! the submitted code. `kill` SIGKILLs the process recorded for the sandbox name.
//!
//! A second script, `local-docker`, runs the real in-sandbox command line on the
//! host instead, so the bundled harness grades submissions with the host's
//! `python3` and `timeout`.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use runalyzer::config::ServiceConfig;
use runalyzer::context::ServiceContext;
use runalyzer::execution::RunRequest;
use runalyzer::sandbox::SandboxPolicy;
use runalyzer::session::SessionConfig;

pub const API_KEY: &str = "integration-test-key";

pub const FAKE_RUNTIME: &str = r#"#!/bin/sh
state="$(dirname "$0")/state"
cmd="$1"
shift
case "$cmd" in
  kill)
    if [ -f "$state/$1.pid" ]; then kill -9 "$(cat "$state/$1.pid")" 2>/dev/null; fi
    exit 0 ;;
  rm) exit 0 ;;
  version) echo "0.0.0-fake"; exit 0 ;;
  run) ;;
  *) echo "unknown command: $cmd" >&2; exit 125 ;;
esac
name=""
ws=""
prev=""
for arg in "$@"; do
  case "$prev" in
    --name) name="$arg" ;;
    --volume) ws="${arg%%:*}" ;;
  esac
  prev="$arg"
done
echo $$ > "$state/$name.pid"
cd "$ws" || exit 125
exec sh ./usercode.py
"#;

/// Runs the last `run` argument, the sandbox's `bash -c` command, in the workspace.
pub const LOCAL_RUNTIME: &str = r#"#!/bin/sh
state="$(dirname "$0")/state"
cmd="$1"
shift
case "$cmd" in
  kill)
    if [ -f "$state/$1.pid" ]; then kill -9 "$(cat "$state/$1.pid")" 2>/dev/null; fi
    exit 0 ;;
  rm) exit 0 ;;
  version) echo "0.0.0-local"; exit 0 ;;
  run) ;;
  *) echo "unknown command: $cmd" >&2; exit 125 ;;
esac
name=""
ws=""
prev=""
last=""
for arg in "$@"; do
  case "$prev" in
    --name) name="$arg" ;;
    --volume) ws="${arg%%:*}" ;;
  esac
  prev="$arg"
  last="$arg"
done
echo $$ > "$state/$name.pid"
cd "$ws" || exit 125
export PYTHONDONTWRITEBYTECODE=1
# Relay the exit status like the Docker CLI does, keeping this shell's own
# "Killed" notices out of the sandbox's stderr.
exec 3>&2 2>/dev/null
bash -c 'exec 2>&3 3>&-; exec bash -c "$1"' sandbox "$last"
"#;

pub const REPORT: &str = r#"{"test_result": {"success": true, "message": "Points: 1 / 1", "results": [], "total_points": 1, "max_points": 1}, "stdout": "", "stderr": "", "truncated": false}"#;

/// Writes the fake runtime once per test binary.
///
/// Every test goes through here before spawning anything, so no child process can
/// inherit the script's write handle (which would make exec fail with ETXTBSY).
pub fn fake_runtime() -> &'static Path {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    let dir = DIR.get_or_init(|| {
        let dir = tempfile::tempdir().expect("failed to create runtime dir");
        std::fs::create_dir(dir.path().join("state")).expect("failed to create state dir");
        for (file, body) in [("fake-docker", FAKE_RUNTIME), ("local-docker", LOCAL_RUNTIME)] {
            let script = dir.path().join(file);
            std::fs::write(&script, body).expect("failed to write fake runtime");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod fake runtime");
        }
        dir
    });
    dir.path()
}

pub fn runtime_binary() -> PathBuf {
    fake_runtime().join("fake-docker")
}

/// Whether `python3` and `timeout` are available for the local runtime.
pub fn host_can_grade() -> bool {
    fake_runtime();
    let runs = |program: &str| {
        std::process::Command::new(program)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    };
    runs("python3") && runs("timeout") && runs("bash")
}

/// Helper to create a context that grades with the bundled harness on the host.
pub fn local_context() -> (tempfile::TempDir, Arc<ServiceContext>) {
    context_with_runtime(&fake_runtime().join("local-docker").display().to_string())
}

/// Helper to create a context backed by the fake runtime.
pub fn test_context() -> (tempfile::TempDir, Arc<ServiceContext>) {
    context_with_runtime(&runtime_binary().display().to_string())
}

/// Helper to create a context over a unique executor directory.
pub fn context_with_runtime(runtime: &str) -> (tempfile::TempDir, Arc<ServiceContext>) {
    // Write the script before any test can spawn a process.
    fake_runtime();

    let temp = tempfile::tempdir().expect("failed to create tempdir");
    let config = ServiceConfig::new(API_KEY)
        .with_session(SessionConfig::new().with_base_dir(temp.path().join("executor")))
        .with_policy(SandboxPolicy::new().with_runtime(runtime));
    let ctx = ServiceContext::init(config).expect("failed to init context");
    (temp, Arc::new(ctx))
}

pub fn request(user_code: &str) -> RunRequest {
    RunRequest {
        user_code: user_code.to_string(),
        tests: "# tests".to_string(),
        credential: API_KEY.to_string(),
        limits: None,
    }
}
