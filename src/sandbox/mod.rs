//! Container sandboxes driven through a Docker-compatible CLI.
//!
//! Isolation itself is delegated to the container runtime. This module decides
//! *how* a sandbox is launched ([`build_invocation`]), runs it and collects its
//! output ([`SandboxContainer`]), and keeps track of every sandbox that may still be
//! alive ([`SandboxRegistry`]) so none outlives the service.
//!
//! # Example
//!
//! ```no_run
//! use runalyzer::sandbox::{
//!     SandboxContainer, SandboxLimits, SandboxPolicy, SandboxRegistry, build_invocation,
//! };
//! use std::path::Path;
//! use uuid::Uuid;
//!
//! # async fn demo() -> Result<(), runalyzer::error::SandboxError> {
//! let policy = SandboxPolicy::default();
//! let registry = SandboxRegistry::new(&policy.runtime);
//! let id = Uuid::new_v4();
//!
//! let invocation = build_invocation(
//!     &id,
//!     Path::new("/srv/executor").join(id.to_string()).as_path(),
//!     &SandboxLimits::default(),
//!     &policy,
//!     "unit-test-runner.py",
//! );
//!
//! registry.register(&invocation.sandbox_name)?;
//! let name = invocation.sandbox_name.clone();
//! let output = SandboxContainer::new(invocation, policy.max_output_bytes).run().await;
//! registry.unregister(&name);
//!
//! println!("exit code: {:?}", output?.exit_code);
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod container;
mod registry;
mod security;

pub use command::{
    KILL_AFTER_SECS, KILLED_EXIT_CODE, STARTUP_ALLOWANCE, SandboxInvocation, TIMEOUT_EXIT_CODE,
    build_invocation,
};
pub use config::{
    CPUS_RANGE, CPUS_STEP, MEMORY_RANGE, ResourceLimits, SandboxLimits, SandboxPolicy,
    SandboxUser, TIMEOUT_RANGE, TMP_SIZE_RANGE, WORKSPACE_MOUNT_POINT,
};
pub use container::{CommandOutput, SandboxContainer};
pub use registry::{DrainReport, SandboxRegistry};
pub use security::{MountPolicyGuard, get_home_dir};
