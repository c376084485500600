//! Request decoding, validation and authorization.
//!
//! Nothing is allocated for a request until [`RunRequest::validate`] succeeds, so a
//! rejected request never touches the disk or the container runtime.

use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::error::RequestError;
use crate::sandbox::{ResourceLimits, SandboxLimits};

/// A run request as decoded from the wire.
///
/// Fields default to empty so that a missing field is reported by `validate` with
/// the same message as an empty one.
#[derive(Clone, Default, Deserialize)]
pub struct RunRequest {
    /// Submitted Python source defining `solution`.
    #[serde(default)]
    pub user_code: String,

    /// Submitted tests for the selected harness.
    #[serde(default, alias = "unit_tests", alias = "performance_tests")]
    pub tests: String,

    /// Shared secret presented by the caller.
    #[serde(default, alias = "api_key")]
    pub credential: String,

    /// Optional resource overrides.
    #[serde(default, alias = "config")]
    pub limits: Option<ResourceLimits>,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("user_code_len", &self.user_code.len())
            .field("tests_len", &self.tests.len())
            .field("credential", &"<redacted>")
            .field("limits", &self.limits)
            .finish()
    }
}

/// A request that passed validation and authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    /// Submitted Python source.
    pub user_code: String,
    /// Submitted tests.
    pub tests: String,
    /// Limits merged over the service defaults.
    pub limits: SandboxLimits,
}

impl RunRequest {
    /// Decodes a request body.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::InvalidRequest` if the body is not a JSON object of the
    /// expected shape.
    pub fn from_json(body: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(body)
            .map_err(|e| RequestError::InvalidRequest(format!("Invalid request body: {e}")))
    }

    /// Checks the request shape, then the credential.
    ///
    /// Shape problems are reported before a credential mismatch, so a malformed
    /// request is a 400 even when its key is also wrong.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::InvalidRequest` for empty fields or out-of-range limits,
    /// and `RequestError::Unauthorized` if the credential does not match `api_key`.
    pub fn validate(
        self,
        defaults: &SandboxLimits,
        api_key: &str,
    ) -> Result<ValidatedRequest, RequestError> {
        for (field, value) in [
            ("user_code", &self.user_code),
            ("tests", &self.tests),
            ("credential", &self.credential),
        ] {
            if value.is_empty() {
                return Err(RequestError::InvalidRequest(format!(
                    "{field} must be a non-empty string"
                )));
            }
        }

        let limits = self
            .limits
            .unwrap_or_default()
            .resolve(defaults)
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;

        if !credentials_match(&self.credential, api_key) {
            return Err(RequestError::Unauthorized);
        }

        Ok(ValidatedRequest {
            user_code: self.user_code,
            tests: self.tests,
            limits,
        })
    }
}

/// Compares two secrets in constant time for equal lengths.
fn credentials_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
