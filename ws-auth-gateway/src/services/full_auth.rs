//! The full-authentication capability consumed by the gateway.

use async_trait::async_trait;

use super::error::BackendError;
use crate::models::{ConnectionMetadata, UserIdentity};

/// Response codes a backend uses to say "try again shortly".
pub const TEMPORARY_UNAVAILABLE_CODES: [&str; 3] =
    ["TEMPORARILY_UNAVAILABLE", "SERVICE_UNAVAILABLE", "RATE_LIMITED"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullAuthResponse {
    pub success: bool,
    pub identity: Option<UserIdentity>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl FullAuthResponse {
    pub fn accepted(identity: UserIdentity) -> Self {
        Self {
            success: true,
            identity: Some(identity),
            error_code: None,
            error_message: None,
        }
    }

    pub fn rejected(code: &str, message: &str) -> Self {
        Self {
            success: false,
            identity: None,
            error_code: Some(code.to_string()),
            error_message: Some(message.to_string()),
        }
    }

    pub fn is_temporarily_unavailable(&self) -> bool {
        !self.success
            && self
                .error_code
                .as_deref()
                .is_some_and(|code| TEMPORARY_UNAVAILABLE_CODES.contains(&code))
    }
}

/// Validates a connection's credentials against the real identity backend.
///
/// Implementations must be safe to call concurrently. The gateway wraps every
/// call in a timeout, so an implementation that never returns only costs the
/// caller the configured timeout.
#[async_trait]
pub trait FullAuthenticator: Send + Sync {
    async fn authenticate(
        &self,
        connection: &ConnectionMetadata,
    ) -> Result<FullAuthResponse, BackendError>;

    /// Cheap, non-blocking check that the backend client is usable.
    fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
