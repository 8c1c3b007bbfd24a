use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

use super::{LevelValidator, StrictValidator};
use crate::models::{AuthContext, AuthOutcome, ConnectionMetadata, PermissivenessLevel, UserIdentity};
use crate::services::token::{decode_unverified_claims, find_token_shaped, token_digest};

pub const RELAXED_WARNING: &str = "Using relaxed authentication - not suitable for production";

const RELAXED_PERMISSIONS: [&str; 2] = ["read", "chat"];

/// Strict first, then an unverified token-shaped credential.
pub struct RelaxedValidator {
    strict: Arc<StrictValidator>,
}

impl RelaxedValidator {
    pub fn new(strict: Arc<StrictValidator>) -> Self {
        Self { strict }
    }

    fn from_token_shape(connection: &ConnectionMetadata, strict_code: &str) -> AuthOutcome {
        let level = PermissivenessLevel::Relaxed;

        let Some(token) = find_token_shaped(connection) else {
            return AuthOutcome::failure(level, "relaxed_failed")
                .with_audit("errorCode", "NO_TOKEN_FOUND")
                .with_audit("strictErrorCode", strict_code);
        };

        let mut identity = UserIdentity::new(format!("relaxed_{}", token_digest(&token)))
            .with_permissions(RELAXED_PERMISSIONS);
        if let Some(email) = decode_unverified_claims(&token).ok().and_then(|c| c.email) {
            identity = identity.with_email(email);
        }

        info!(user_id = %identity.user_id, strict_error_code = strict_code, "Relaxed authentication accepted unverified token");

        AuthOutcome::success(level, identity, "relaxed_fallback")
            .with_warning(RELAXED_WARNING)
            .with_audit("strictErrorCode", strict_code)
            .with_audit("tokenVerified", false)
    }
}

#[async_trait]
impl LevelValidator for RelaxedValidator {
    fn level(&self) -> PermissivenessLevel {
        PermissivenessLevel::Relaxed
    }

    async fn validate(&self, connection: &ConnectionMetadata, context: &AuthContext) -> AuthOutcome {
        let strict = AssertUnwindSafe(self.strict.validate(connection, context))
            .catch_unwind()
            .await;

        let strict_code = match strict {
            Ok(outcome) if outcome.success => {
                let mut relaxed = AuthOutcome {
                    level: PermissivenessLevel::Relaxed,
                    method: "relaxed_strict_success".to_string(),
                    ..outcome
                };
                relaxed.audit.insert("strictValidation".into(), true.into());
                return relaxed;
            }
            Ok(outcome) => outcome
                .error_code()
                .unwrap_or("AUTHENTICATION_FAILED")
                .to_string(),
            Err(_) => {
                warn!("Strict delegate panicked during relaxed authentication");
                "DELEGATE_EXCEPTION".to_string()
            }
        };

        Self::from_token_shape(connection, &strict_code)
    }

    async fn validate_degraded(
        &self,
        connection: &ConnectionMetadata,
        _context: &AuthContext,
    ) -> AuthOutcome {
        Self::from_token_shape(connection, "CIRCUIT_OPEN")
    }
}
