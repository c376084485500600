//! The grading programs that run inside a sandbox.
//!
//! Harness sources are compiled into the binary and copied into each workspace next
//! to the submission, so a sandbox only ever sees files this service wrote.

use serde::{Deserialize, Serialize};

use crate::session::WorkspaceFile;

const UNIT_TEST_RUNNER: &str = include_str!("../../harness/unit-test-runner.py");
const UNIT_TEST_LIB: &str = include_str!("../../harness/unittestlib.py");
const PERFORMANCE_TEST_RUNNER: &str = include_str!("../../harness/performance-test-runner.py");
const PERFORMANCE_TEST_LIB: &str = include_str!("../../harness/performancelib.py");

/// File the submitted solution is written to.
pub const USER_CODE_FILE: &str = "usercode.py";

/// Which grading program a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarnessKind {
    /// Correctness tests built with `unittestlib`.
    UnitTests,
    /// Timing and memory tests built with `performancelib`.
    PerformanceTests,
}

impl HarnessKind {
    /// File the sandbox executes.
    #[must_use]
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::UnitTests => "unit-test-runner.py",
            Self::PerformanceTests => "performance-test-runner.py",
        }
    }

    /// File the submitted tests are written to.
    #[must_use]
    pub fn tests_file(self) -> &'static str {
        match self {
            Self::UnitTests => "unittests.py",
            Self::PerformanceTests => "performance_tests.py",
        }
    }

    /// Support library imported by the submitted tests.
    fn library(self) -> (&'static str, &'static str) {
        match self {
            Self::UnitTests => ("unittestlib.py", UNIT_TEST_LIB),
            Self::PerformanceTests => ("performancelib.py", PERFORMANCE_TEST_LIB),
        }
    }

    fn runner_source(self) -> &'static str {
        match self {
            Self::UnitTests => UNIT_TEST_RUNNER,
            Self::PerformanceTests => PERFORMANCE_TEST_RUNNER,
        }
    }

    /// Every file a workspace needs for this harness, submission included.
    #[must_use]
    pub fn workspace_files(self, user_code: &str, tests: &str) -> Vec<WorkspaceFile> {
        let (lib_name, lib_source) = self.library();
        vec![
            WorkspaceFile::new(self.entry_point(), self.runner_source()),
            WorkspaceFile::new(lib_name, lib_source),
            WorkspaceFile::new(USER_CODE_FILE, user_code),
            WorkspaceFile::new(self.tests_file(), tests),
        ]
    }
}

impl std::fmt::Display for HarnessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnitTests => write!(f, "unit-tests"),
            Self::PerformanceTests => write!(f, "performance-tests"),
        }
    }
}
