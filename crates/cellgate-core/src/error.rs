//! Authorization error types.

use thiserror::Error;

/// Authorization errors.
///
/// `Malformed` and `NotScannerOwner` are raised before any policy evaluation
/// and are never audited. `AccessDenied` always carries the human-readable
/// reason that was attached to the single retained denial event.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Request is missing its table or its principal.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The policy evaluator denied at least one required resource.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A scanner was used by someone other than the user who opened it.
    #[error("User '{user}' is not the scanner owner!")]
    NotScannerOwner {
        /// Short name of the requesting user.
        user: String,
    },

    /// The policy evaluator itself failed.
    #[error("policy evaluator failure: {0}")]
    Evaluator(String),

    /// A grant or revoke request could not be translated.
    #[error("{0}")]
    InvalidGrant(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while loading configuration or policies.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthzError {
    /// Whether this error is a denial (as opposed to an infrastructure or input failure).
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuthzError::AccessDenied(_) | AuthzError::NotScannerOwner { .. }
        )
    }
}

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;
