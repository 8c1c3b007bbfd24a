mod common;

use common::*;
use ws_auth_gateway::models::PermissivenessLevel;

#[tokio::test]
async fn test_detected_level_is_dispatched_and_audited() {
    let app = TestGateway::new(production_source(), accepting_backend());
    let outcome = app
        .gateway
        .router()
        .validate_with_permissiveness(&bearer_connection("abc.def.ghi"), None)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.level, PermissivenessLevel::Strict);
    assert_eq!(outcome.method, "strict_full_validation");
    assert_eq!(outcome.audit["levelSource"], "detected");
    assert_eq!(outcome.audit["environment"], "production");
    assert!(outcome.audit["validationDurationMs"].as_f64().unwrap() >= 0.0);
    assert!(uuid::Uuid::parse_str(outcome.audit["attemptId"].as_str().unwrap()).is_ok());
}

#[tokio::test]
async fn test_override_wins_over_detection() {
    let app = TestGateway::new(production_source(), accepting_backend());
    let outcome = app
        .gateway
        .authenticate_at(&anonymous_connection(), PermissivenessLevel::Demo)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.level, PermissivenessLevel::Demo);
    assert_eq!(outcome.method, "demo_blocked_production");
    assert_eq!(outcome.audit["levelSource"], "override");
}

#[tokio::test]
async fn test_validator_panic_becomes_validation_exception() {
    let backend = MockFullAuthenticator::new(MockBehavior::Panic("decoder invariant broken".into()));
    let app = TestGateway::new(production_source(), backend);

    let outcome = app
        .gateway
        .router()
        .validate_with_permissiveness(&bearer_connection("abc.def.ghi"), None)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, "validation_exception");
    assert_eq!(outcome.error_code(), Some("VALIDATION_EXCEPTION"));
    assert_eq!(outcome.audit["exceptionMessage"], "decoder invariant broken");
    assert!(
        outcome
            .warnings
            .iter()
            .all(|w| !w.contains("decoder invariant broken"))
    );
}

#[tokio::test]
async fn test_stats_count_per_level_and_reset() {
    let app = TestGateway::new(staging_source(), accepting_backend());
    let router = app.gateway.router();

    router
        .validate_with_permissiveness(&bearer_connection("abc.def.ghi"), None)
        .await;
    router
        .validate_with_permissiveness(&anonymous_connection(), Some(PermissivenessLevel::Emergency))
        .await;
    router
        .validate_with_permissiveness(&anonymous_connection(), Some(PermissivenessLevel::Demo))
        .await;

    let stats = app.gateway.stats();
    assert_eq!(stats.total_attempts, 3);
    assert_eq!(stats.total_successes, 2);
    assert_eq!(stats.total_failures, 1);
    assert_eq!(stats.per_level_counts[&PermissivenessLevel::Relaxed].successes, 1);
    assert_eq!(stats.per_level_counts[&PermissivenessLevel::Emergency].failures, 1);
    assert_eq!(stats.per_level_counts[&PermissivenessLevel::Demo].successes, 1);
    assert!((stats.success_rate_percent - 200.0 / 3.0).abs() < 1e-9);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["perLevelCounts"]["relaxed"]["attempts"], 1);

    app.gateway.reset_stats();
    let stats = app.gateway.stats();
    assert_eq!(stats.total_attempts, 0);
    assert_eq!(stats.success_rate_percent, 0.0);
}
