use service_core::error::AppError;
use service_core::retry::Retryable;
use thiserror::Error;

/// Failures of the call into the full authenticator itself, as opposed to a
/// well-formed rejection of the credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("auth backend timed out")]
    Timeout,

    #[error("connection to auth backend failed: {0}")]
    Connection(String),

    #[error("auth backend temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("auth backend error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Error code used in audit records and failure accounting.
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Timeout => "TIMEOUT",
            BackendError::Connection(_) => "CONNECTION_ERROR",
            BackendError::Unavailable(_) => "BACKEND_UNAVAILABLE",
            BackendError::Internal(_) => "BACKEND_ERROR",
        }
    }
}

impl Retryable for BackendError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout | BackendError::Connection(_) | BackendError::Unavailable(_)
        )
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Internal(e) => AppError::InternalInvariant(anyhow::anyhow!(e)),
            other => AppError::TransientBackend(other.to_string()),
        }
    }
}
