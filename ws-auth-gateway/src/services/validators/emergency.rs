use async_trait::async_trait;
use chrono::Utc;
use tracing::error;

use super::LevelValidator;
use crate::models::{AuthContext, AuthOutcome, ConnectionMetadata, PermissivenessLevel, UserIdentity};

/// Read-only access while the auth backend is down or an operator has declared
/// an emergency. Never available in production.
pub struct EmergencyValidator;

#[async_trait]
impl LevelValidator for EmergencyValidator {
    fn level(&self) -> PermissivenessLevel {
        PermissivenessLevel::Emergency
    }

    async fn validate(&self, _connection: &ConnectionMetadata, context: &AuthContext) -> AuthOutcome {
        let level = PermissivenessLevel::Emergency;

        if context.is_production() {
            error!(environment = %context.environment, "Emergency bypass attempted in production");
            return AuthOutcome::failure(level, "emergency_blocked_production")
                .with_audit("errorCode", "EMERGENCY_BLOCKED_PRODUCTION");
        }

        let reason = if context.emergency_mode_enabled {
            "emergency_flag"
        } else if !context.auth_backend_reachable {
            "backend_unreachable"
        } else {
            return AuthOutcome::failure(level, "emergency_not_justified")
                .with_audit("errorCode", "EMERGENCY_NOT_JUSTIFIED");
        };

        let identity = UserIdentity::new(format!("emergency_{}", Utc::now().timestamp()))
            .with_permissions(["read"]);

        error!(
            user_id = %identity.user_id,
            reason,
            client_ip = context.client_ip.as_deref().unwrap_or("unknown"),
            "Emergency authentication bypass granted"
        );

        AuthOutcome::success(level, identity, "emergency_bypass")
            .with_bypass_reason(reason)
            .with_warning("Emergency authentication bypass is active")
            .with_warning("Requires immediate operator attention")
    }
}
