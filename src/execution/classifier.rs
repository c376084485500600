//! Mapping raw sandbox output to a graded result.
//!
//! [`classify`] is total: every combination of exit status and output bytes maps to
//! exactly one [`ExecutionResult`], and nothing here can panic or return an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::sandbox::{CommandOutput, KILLED_EXIT_CODE, TIMEOUT_EXIT_CODE};

/// Key under which the harness reports its own load failures.
const HARNESS_ERROR_KEY: &str = "runalyzer_errors";

/// Summary the harness computes from the submitted tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the submission passed.
    pub success: bool,
    /// Message intended for the submitter.
    #[serde(default)]
    pub message: String,
    /// Per-test details, passed through verbatim.
    #[serde(default)]
    pub results: Vec<Value>,
    /// Points earned.
    pub total_points: serde_json::Number,
    /// Points available. Absent when the harness stopped at the first error.
    #[serde(default, alias = "max_total_points", skip_serializing_if = "Option::is_none")]
    pub max_points: Option<serde_json::Number>,
}

/// The JSON document a harness prints on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    /// Grading summary.
    pub test_result: TestResult,
    /// Submission stdout captured by the harness (already truncated).
    #[serde(default)]
    pub stdout: String,
    /// Submission stderr captured by the harness (already truncated).
    #[serde(default)]
    pub stderr: String,
    /// True if the harness truncated either capture.
    #[serde(default)]
    pub truncated: bool,
    /// Anything else the harness reported, e.g. `duration`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The in-sandbox timeout fired.
    TimedOut,
    /// The sandbox exited non-zero or was killed.
    NonZeroExit,
    /// Exit 0 but stdout was not a harness report.
    MalformedOutput,
    /// The service could not run the sandbox at all.
    InternalError,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed_out"),
            Self::NonZeroExit => write!(f, "non_zero_exit"),
            Self::MalformedOutput => write!(f, "malformed_output"),
            Self::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The harness ran to completion and reported.
    Success {
        /// Parsed harness report.
        output: HarnessReport,
        /// Sandbox stderr.
        stderr: String,
    },
    /// Anything else.
    Failure {
        /// Failure category.
        reason: FailureReason,
        /// Human-readable explanation.
        message: String,
        /// Stdout, if it parsed as any JSON value.
        output: Option<Value>,
        /// Raw stdout, kept when it did not parse.
        stdout: Option<String>,
        /// Sandbox stderr.
        stderr: String,
        /// Exit code, if the sandbox produced one.
        exit_code: Option<i32>,
    },
}

impl ExecutionResult {
    /// An infrastructure failure with no sandbox output.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Failure {
            reason: FailureReason::InternalError,
            message: message.into(),
            output: None,
            stdout: None,
            stderr: String::new(),
            exit_code: None,
        }
    }

    /// Returns true for [`ExecutionResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason, .. } => Some(*reason),
        }
    }

    /// The sandbox exit code, if one was observed.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Success { .. } => Some(0),
            Self::Failure { exit_code, .. } => *exit_code,
        }
    }

    /// Response body for HTTP callers.
    ///
    /// Internal error details are logged by the caller, never echoed.
    #[must_use]
    pub fn response_body(&self) -> Value {
        match self {
            Self::Success { output, stderr } => json!({
                "success": true,
                "output": output,
                "stderr": stderr,
                "exitCode": 0,
            }),
            Self::Failure {
                reason: FailureReason::InternalError,
                ..
            } => json!({
                "success": false,
                "reason": FailureReason::InternalError,
                "error": "Internal server error",
            }),
            Self::Failure {
                reason,
                message,
                output,
                stdout,
                stderr,
                exit_code,
            } => {
                let mut body = json!({
                    "success": false,
                    "reason": reason,
                    "error": message,
                    "stderr": stderr,
                });
                if let Some(obj) = body.as_object_mut() {
                    if let Some(output) = output {
                        obj.insert("output".into(), output.clone());
                    }
                    if let Some(stdout) = stdout {
                        obj.insert("stdout".into(), Value::String(stdout.clone()));
                    }
                    if let Some(code) = exit_code {
                        obj.insert("exitCode".into(), Value::from(*code));
                    }
                }
                body
            }
        }
    }
}

/// Classifies one sandbox run.
#[must_use]
pub fn classify(output: &CommandOutput) -> ExecutionResult {
    let stdout = output.stdout.trim();
    let harness_message = harness_error(stdout);
    let stderr_message = Some(output.stderr.trim())
        .filter(|s| !s.is_empty())
        .or(harness_message.as_deref());

    match output.exit_code {
        Some(0) => match serde_json::from_str::<HarnessReport>(stdout) {
            Ok(report) => ExecutionResult::Success {
                output: report,
                stderr: output.stderr.clone(),
            },
            Err(e) => ExecutionResult::Failure {
                reason: FailureReason::MalformedOutput,
                message: format!("Harness produced invalid output: {e}"),
                output: serde_json::from_str(stdout).ok(),
                stdout: Some(output.stdout.clone()),
                stderr: output.stderr.clone(),
                exit_code: Some(0),
            },
        },
        Some(TIMEOUT_EXIT_CODE) => {
            failure(output, FailureReason::TimedOut, stderr_message.unwrap_or("Time limit exceeded"))
        }
        Some(KILLED_EXIT_CODE) if stderr_message.is_none() => failure(
            output,
            FailureReason::NonZeroExit,
            "Process was killed, most likely for exceeding the memory limit",
        ),
        Some(code) => {
            let message = stderr_message
                .map(str::to_string)
                .unwrap_or_else(|| format!("Process exited with code {code}"));
            failure(output, FailureReason::NonZeroExit, &message)
        }
        None => failure(
            output,
            FailureReason::NonZeroExit,
            stderr_message.unwrap_or("Process terminated by signal"),
        ),
    }
}

/// Extracts the harness's own error message from a stdout JSON document.
fn harness_error(stdout: &str) -> Option<String> {
    let document: Value = serde_json::from_str(stdout).ok()?;
    document
        .get(HARNESS_ERROR_KEY)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn failure(output: &CommandOutput, reason: FailureReason, message: &str) -> ExecutionResult {
    ExecutionResult::Failure {
        reason,
        message: message.to_string(),
        output: serde_json::from_str(output.stdout.trim()).ok(),
        stdout: None,
        stderr: output.stderr.clone(),
        exit_code: output.exit_code,
    }
}
