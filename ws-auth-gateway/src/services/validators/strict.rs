use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, warn};

use super::LevelValidator;
use crate::models::{AuthContext, AuthOutcome, ConnectionMetadata, PermissivenessLevel, UserIdentity};
use crate::services::backend::BackendCaller;

/// Full authentication through the real backend. No bypasses.
pub struct StrictValidator {
    backend: Arc<BackendCaller>,
}

impl StrictValidator {
    pub fn new(backend: Arc<BackendCaller>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl LevelValidator for StrictValidator {
    fn level(&self) -> PermissivenessLevel {
        PermissivenessLevel::Strict
    }

    async fn validate(&self, connection: &ConnectionMetadata, _context: &AuthContext) -> AuthOutcome {
        let level = PermissivenessLevel::Strict;

        match self.backend.authenticate(connection).await {
            Ok(response) if response.success => {
                let identity = response
                    .identity
                    .unwrap_or_else(|| UserIdentity::new("unknown"));
                debug!(user_id = %identity.user_id, "Strict authentication succeeded");
                AuthOutcome::success(level, identity, "strict_full_validation")
            }
            Ok(response) => {
                let code = response
                    .error_code
                    .unwrap_or_else(|| "AUTHENTICATION_FAILED".to_string());
                debug!(error_code = %code, "Strict authentication rejected");
                let kind = AppError::AuthenticationRejected(code.clone()).kind();
                AuthOutcome::failure(level, "strict_validation_failed")
                    .with_audit("errorCode", code)
                    .with_audit("errorKind", kind)
                    .with_audit(
                        "errorMessage",
                        response
                            .error_message
                            .unwrap_or_else(|| "Authentication failed".to_string()),
                    )
            }
            Err(e) => {
                warn!(error = %e, error_code = e.code(), "Auth backend call failed");
                let kind = AppError::from(e.clone()).kind();
                AuthOutcome::failure(level, "strict_backend_error")
                    .with_audit("errorCode", e.code())
                    .with_audit("errorKind", kind)
                    .with_audit("errorMessage", e.to_string())
            }
        }
    }
}
