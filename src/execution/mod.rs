//! Grading executions: request validation, orchestration and result classification.

mod classifier;
mod harness;
mod orchestrator;
mod request;

pub use classifier::{ExecutionResult, FailureReason, HarnessReport, TestResult, classify};
pub use harness::{HarnessKind, USER_CODE_FILE};
pub use orchestrator::Orchestrator;
pub use request::{RunRequest, ValidatedRequest};
