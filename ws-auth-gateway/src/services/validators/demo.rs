use async_trait::async_trait;
use tracing::{error, info};

use super::LevelValidator;
use crate::models::{AuthContext, AuthOutcome, ConnectionMetadata, PermissivenessLevel, UserIdentity};

pub const DEMO_USER_ID: &str = "demo-user-001";

pub struct DemoValidator;

#[async_trait]
impl LevelValidator for DemoValidator {
    fn level(&self) -> PermissivenessLevel {
        PermissivenessLevel::Demo
    }

    async fn validate(&self, _connection: &ConnectionMetadata, context: &AuthContext) -> AuthOutcome {
        let level = PermissivenessLevel::Demo;

        if context.is_production() {
            error!(environment = %context.environment, "Demo authentication attempted in production");
            return AuthOutcome::failure(level, "demo_blocked_production")
                .with_audit("errorCode", "DEMO_BLOCKED_PRODUCTION");
        }

        if context.demo_mode_explicitly_disabled {
            return AuthOutcome::failure(level, "demo_disabled")
                .with_audit("errorCode", "DEMO_DISABLED");
        }

        info!(environment = %context.environment, "Demo authentication granted");

        let identity = UserIdentity::new(DEMO_USER_ID)
            .with_email("demo@example.com")
            .with_permissions(["read", "chat", "demo"]);

        AuthOutcome::success(level, identity, "demo_bypass")
            .with_bypass_reason("demo_mode")
            .with_warning("Demo mode is active")
            .with_warning("Demo authentication is not suitable for production")
    }
}
