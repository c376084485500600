//! Host requirements validation.
//!
//! This module checks that the host can run sandboxes before the service starts
//! accepting requests: the container runtime answers and the executor directory is
//! writable.

mod requirements;

pub use requirements::{
    SystemRequirements, check_all, check_executor_dir, check_runtime, kernel_release,
};
