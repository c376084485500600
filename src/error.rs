//! Error types for runalyzer.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//! Execution-level outcomes (timeouts, failing user code) are *not* errors; they are
//! values of [`crate::execution::ExecutionResult`]. The enums here cover request
//! rejection and infrastructure faults.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// System requirements not met
    #[error("System requirements check failed")]
    #[diagnostic(code(runalyzer::system::requirements))]
    SystemRequirements(#[from] SystemRequirementsError),

    /// Invalid service configuration
    #[error("Invalid configuration")]
    #[diagnostic(code(runalyzer::config))]
    Config(#[from] ConfigError),

    /// HTTP server error
    #[error("HTTP server error")]
    #[diagnostic(code(runalyzer::server))]
    Server(#[from] ServerError),

    /// Workspace management error
    #[error("Session workspace error")]
    #[diagnostic(code(runalyzer::session))]
    Session(#[from] SessionError),

    /// Sandbox launch/tracking error
    #[error("Sandbox error")]
    #[diagnostic(code(runalyzer::sandbox))]
    Sandbox(#[from] SandboxError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(runalyzer::io))]
    Io(#[from] std::io::Error),
}

/// Errors related to host requirements validation.
#[derive(Error, Debug, Diagnostic)]
pub enum SystemRequirementsError {
    /// The container runtime CLI is missing or its daemon is unreachable
    #[error("Container runtime `{runtime}` is not usable: {reason}")]
    #[diagnostic(
        code(runalyzer::system::runtime),
        help("Install Docker (or a compatible CLI) and make sure the daemon is running")
    )]
    RuntimeUnavailable { runtime: String, reason: String },

    /// The executor directory cannot be written
    #[error("Executor directory {path} is not writable")]
    #[diagnostic(
        code(runalyzer::system::executor_dir),
        help("Point --executor-dir at a directory owned by the service user")
    )]
    ExecutorDirUnwritable { path: String },

    /// Failed to read system information
    #[error("Failed to read system information: {context}")]
    #[diagnostic(code(runalyzer::system::read_failed))]
    ReadFailed {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors in the service configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// No API key configured
    #[error("API key must not be empty")]
    #[diagnostic(
        code(runalyzer::config::api_key),
        help("Set --api-key or the API_KEY environment variable")
    )]
    MissingApiKey,

    /// A default resource limit lies outside its accepted range
    #[error("Default limit out of range: {0}")]
    #[diagnostic(code(runalyzer::config::limits))]
    InvalidDefaultLimit(#[from] LimitViolation),

    /// Malformed sandbox user specification
    #[error("Invalid sandbox user `{0}`, expected UID:GID")]
    #[diagnostic(code(runalyzer::config::user))]
    InvalidUser(String),

    /// The sandbox must never run as root
    #[error("Sandbox user must not be root")]
    #[diagnostic(code(runalyzer::config::root_user))]
    RootUser,
}

/// Errors related to the HTTP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to bind the listener
    #[error("Failed to bind {addr}: {source}")]
    #[diagnostic(code(runalyzer::server::bind))]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server loop failed
    #[error("Server failed: {0}")]
    #[diagnostic(code(runalyzer::server::serve))]
    Serve(#[source] std::io::Error),
}

/// Errors related to session workspaces.
#[derive(Error, Debug, Diagnostic)]
pub enum SessionError {
    /// Filesystem operation failed
    #[error("{context}: {source}")]
    #[diagnostic(code(runalyzer::session::io))]
    IoError {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A workspace for this session id already exists
    #[error("Workspace for session {id} already exists")]
    #[diagnostic(code(runalyzer::session::exists))]
    AlreadyExists { id: String },

    /// A workspace file name would escape or pollute the workspace
    #[error("Invalid workspace file name: {name:?}")]
    #[diagnostic(code(runalyzer::session::file_name))]
    InvalidFileName { name: String },

    /// Workspace root rejected by the mount policy
    #[error(transparent)]
    #[diagnostic(transparent)]
    Mount(#[from] MountError),
}

/// Errors related to mounting host paths into a sandbox.
#[derive(Error, Debug, Diagnostic)]
pub enum MountError {
    /// Path violates the mount policy
    #[error("Mount policy violation: {0}")]
    #[diagnostic(
        code(runalyzer::mount::policy),
        help("Workspaces must live in a dedicated directory away from credentials")
    )]
    SecurityViolation(String),
}

/// Errors related to launching and tracking sandboxes.
#[derive(Error, Debug, Diagnostic)]
pub enum SandboxError {
    /// The runtime process could not be spawned
    #[error("Failed to spawn sandbox {name}: {source}")]
    #[diagnostic(code(runalyzer::sandbox::spawn))]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or reading from the runtime process failed
    #[error("Failed to collect sandbox {name}: {source}")]
    #[diagnostic(code(runalyzer::sandbox::wait))]
    WaitFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Registration refused because the registry is draining
    #[error("Sandbox registry is shutting down, refusing {name}")]
    #[diagnostic(code(runalyzer::sandbox::shutting_down))]
    ShuttingDown { name: String },

    /// Workspace mount source rejected
    #[error(transparent)]
    #[diagnostic(transparent)]
    Mount(#[from] MountError),
}

/// A resource limit outside its accepted range.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
#[error("{field} must be {expected}, got {value}")]
#[diagnostic(code(runalyzer::limits::range))]
pub struct LimitViolation {
    /// Wire name of the offending field.
    pub field: &'static str,
    /// Human-readable description of the accepted values.
    pub expected: &'static str,
    /// The rejected value.
    pub value: f64,
}

/// Request-level rejections. Nothing has been allocated when these are returned.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Body is not JSON or does not match the request schema
    #[error("{0}")]
    #[diagnostic(code(runalyzer::request::invalid))]
    InvalidRequest(String),

    /// Credential mismatch
    #[error("Invalid API key")]
    #[diagnostic(code(runalyzer::request::unauthorized))]
    Unauthorized,
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
