mod common;

use common::*;
use std::sync::Arc;
use ws_auth_gateway::config::{ConfigLoader, GatewaySettings};
use ws_auth_gateway::models::{AuthContext, ConnectionMetadata, PermissivenessLevel};
use ws_auth_gateway::services::validators::{
    DEMO_USER_ID, LevelValidator, RELAXED_WARNING, ValidatorSet,
};
use ws_auth_gateway::services::{BackendCaller, BackendError};

fn validators(backend: Arc<MockFullAuthenticator>) -> ValidatorSet {
    let loader = Arc::new(ConfigLoader::from_settings(GatewaySettings {
        environment: "staging".to_string(),
        ..GatewaySettings::safe_defaults()
    }));
    ValidatorSet::new(Arc::new(BackendCaller::new(backend, loader)))
}

fn context(environment: &str) -> AuthContext {
    AuthContext {
        environment: environment.to_string(),
        is_managed_runtime: false,
        has_reverse_proxy: false,
        auth_backend_reachable: true,
        demo_mode_enabled: false,
        demo_mode_explicitly_disabled: false,
        emergency_mode_enabled: false,
        connection_source: "direct".to_string(),
        client_ip: Some("203.0.113.10".to_string()),
        headers_present: true,
        subprotocol_present: false,
    }
}

#[tokio::test]
async fn test_strict_success() {
    let set = validators(Arc::new(accepting_backend()));
    let outcome = set
        .get(PermissivenessLevel::Strict)
        .validate(&bearer_connection("abc.def.ghi"), &context("production"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.level, PermissivenessLevel::Strict);
    assert_eq!(outcome.method, "strict_full_validation");
    assert_eq!(outcome.user_id(), Some("user-42"));
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn test_strict_rejection_keeps_delegate_code() {
    let set = validators(Arc::new(MockFullAuthenticator::rejecting(
        "TOKEN_EXPIRED",
        "token expired",
    )));
    let outcome = set
        .get(PermissivenessLevel::Strict)
        .validate(&bearer_connection("abc.def.ghi"), &context("production"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, "strict_validation_failed");
    assert_eq!(outcome.error_code(), Some("TOKEN_EXPIRED"));
    assert_eq!(outcome.audit["errorMessage"], "token expired");
    assert_eq!(outcome.audit["errorKind"], "authentication_rejected");
}

#[tokio::test(start_paused = true)]
async fn test_strict_backend_error() {
    let backend = Arc::new(failing_backend());
    let set = validators(backend.clone());
    let outcome = set
        .get(PermissivenessLevel::Strict)
        .validate(&bearer_connection("abc.def.ghi"), &context("production"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, "strict_backend_error");
    assert_eq!(outcome.error_code(), Some("CONNECTION_ERROR"));
    assert_eq!(outcome.audit["errorKind"], "transient_backend_error");
    assert_eq!(backend.call_count(), 4);
}

#[tokio::test]
async fn test_relaxed_prefers_strict() {
    let set = validators(Arc::new(accepting_backend()));
    let outcome = set
        .get(PermissivenessLevel::Relaxed)
        .validate(&bearer_connection("abc.def.ghi"), &context("staging"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.level, PermissivenessLevel::Relaxed);
    assert_eq!(outcome.method, "relaxed_strict_success");
    assert_eq!(outcome.user_id(), Some("user-42"));
}

#[tokio::test(start_paused = true)]
async fn test_relaxed_falls_back_to_token_shape_on_timeout() {
    let backend = Arc::new(MockFullAuthenticator::new(MockBehavior::Hang));
    let set = validators(backend);
    let connection = ConnectionMetadata::new().with_header("x-auth-token", "abc.def.ghi");

    let outcome = set
        .get(PermissivenessLevel::Relaxed)
        .validate(&connection, &context("staging"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.level, PermissivenessLevel::Relaxed);
    assert_eq!(outcome.method, "relaxed_fallback");
    assert_eq!(outcome.warnings, vec![RELAXED_WARNING.to_string()]);
    assert_eq!(outcome.audit["strictErrorCode"], "TIMEOUT");

    let user_id = outcome.user_id().unwrap();
    assert!(user_id.starts_with("relaxed_"));
    assert_eq!(user_id.len(), "relaxed_".len() + 16);
}

#[tokio::test]
async fn test_relaxed_identity_is_stable_and_labelled_from_claims() {
    let set = validators(Arc::new(MockFullAuthenticator::rejecting(
        "INVALID_SIGNATURE",
        "bad signature",
    )));
    let relaxed = set.get(PermissivenessLevel::Relaxed);

    let first = relaxed
        .validate(&bearer_connection(UNSIGNED_JWT), &context("staging"))
        .await;
    let second = relaxed
        .validate(&bearer_connection(UNSIGNED_JWT), &context("staging"))
        .await;

    assert_eq!(first.user_id(), second.user_id());
    let identity = first.identity.unwrap();
    assert_eq!(identity.email.as_deref(), Some("test@example.com"));
    assert!(identity.has_permission("read"));
    assert!(!identity.has_permission("write"));
}

#[tokio::test]
async fn test_relaxed_without_token_fails() {
    let set = validators(Arc::new(MockFullAuthenticator::rejecting(
        "MISSING_TOKEN",
        "no token",
    )));
    let outcome = set
        .get(PermissivenessLevel::Relaxed)
        .validate(&anonymous_connection(), &context("staging"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, "relaxed_failed");
    assert_eq!(outcome.audit["strictErrorCode"], "MISSING_TOKEN");
}

#[tokio::test]
async fn test_relaxed_survives_panicking_delegate() {
    let set = validators(Arc::new(MockFullAuthenticator::new(MockBehavior::Panic(
        "client state corrupted".into(),
    ))));
    let outcome = set
        .get(PermissivenessLevel::Relaxed)
        .validate(&bearer_connection("abc.def.ghi"), &context("staging"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.method, "relaxed_fallback");
    assert_eq!(outcome.audit["strictErrorCode"], "DELEGATE_EXCEPTION");
}

#[tokio::test]
async fn test_relaxed_degraded_skips_backend() {
    let backend = Arc::new(accepting_backend());
    let set = validators(backend.clone());
    let outcome = set
        .get(PermissivenessLevel::Relaxed)
        .validate_degraded(&bearer_connection("abc.def.ghi"), &context("staging"))
        .await;

    assert_eq!(outcome.method, "relaxed_fallback");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_demo_rules() {
    let set = validators(Arc::new(accepting_backend()));
    let demo = set.get(PermissivenessLevel::Demo);
    let connection = anonymous_connection();

    let granted = demo.validate(&connection, &context("development")).await;
    assert!(granted.success);
    assert_eq!(granted.method, "demo_bypass");
    assert_eq!(granted.user_id(), Some(DEMO_USER_ID));
    assert_eq!(granted.warnings.len(), 2);

    let disabled = AuthContext {
        demo_mode_explicitly_disabled: true,
        ..context("development")
    };
    let refused = demo.validate(&connection, &disabled).await;
    assert!(!refused.success);
    assert_eq!(refused.method, "demo_disabled");
}

#[tokio::test]
async fn test_emergency_requires_justification() {
    let set = validators(Arc::new(accepting_backend()));
    let emergency = set.get(PermissivenessLevel::Emergency);
    let connection = anonymous_connection();

    let unjustified = emergency.validate(&connection, &context("staging")).await;
    assert!(!unjustified.success);
    assert_eq!(unjustified.method, "emergency_not_justified");

    let backend_down = AuthContext {
        auth_backend_reachable: false,
        ..context("staging")
    };
    let granted = emergency.validate(&connection, &backend_down).await;
    assert!(granted.success);
    assert_eq!(granted.method, "emergency_bypass");
    assert_eq!(granted.bypass_reason.as_deref(), Some("backend_unreachable"));

    let identity = granted.identity.unwrap();
    assert!(identity.user_id.starts_with("emergency_"));
    assert!(identity.has_permission("read"));
    assert!(!identity.has_permission("chat"));
}

#[tokio::test]
async fn test_production_blocks_demo_and_emergency() {
    let set = validators(Arc::new(accepting_backend()));
    let connection = anonymous_connection();

    for environment in ["production", "prod", "PRODUCTION"] {
        let everything_on = AuthContext {
            demo_mode_enabled: true,
            emergency_mode_enabled: true,
            auth_backend_reachable: false,
            ..context(environment)
        };

        let demo = set
            .get(PermissivenessLevel::Demo)
            .validate(&connection, &everything_on)
            .await;
        assert!(!demo.success);
        assert_eq!(demo.method, "demo_blocked_production");

        let emergency = set
            .get(PermissivenessLevel::Emergency)
            .validate(&connection, &everything_on)
            .await;
        assert!(!emergency.success);
        assert_eq!(emergency.method, "emergency_blocked_production");
    }
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_map_to_codes() {
    for (error, code) in [
        (BackendError::Internal("bad response".into()), "BACKEND_ERROR"),
        (BackendError::Unavailable("draining".into()), "BACKEND_UNAVAILABLE"),
    ] {
        let set = validators(Arc::new(MockFullAuthenticator::failing(error)));
        let outcome = set
            .get(PermissivenessLevel::Strict)
            .validate(&bearer_connection("abc.def.ghi"), &context("staging"))
            .await;
        assert_eq!(outcome.error_code(), Some(code));
    }
}
