use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("Circuit open")]
    CircuitOpen,

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a retry loop may attempt the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientBackend(_))
    }

    /// Stable, user-safe label for this error class.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::ConfigError(_) => "configuration_error",
            AppError::TransientBackend(_) => "transient_backend_error",
            AppError::AuthenticationRejected(_) => "authentication_rejected",
            AppError::CircuitOpen => "circuit_open",
            AppError::InternalInvariant(_) => "internal_invariant_error",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}
