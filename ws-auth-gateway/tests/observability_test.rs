mod common;

use common::*;
use service_core::observability::{init_metrics, init_tracing, render_metrics};
use ws_auth_gateway::models::PermissivenessLevel;

#[tokio::test]
async fn test_outcomes_are_exported_as_prometheus_metrics() {
    init_tracing("ws-auth-gateway-test", "warn", None);
    init_metrics().unwrap();
    init_metrics().unwrap();

    let app = TestGateway::staging();
    app.gateway.authenticate(&bearer_connection("abc.def.ghi")).await;
    app.gateway
        .authenticate_at(&anonymous_connection(), PermissivenessLevel::Emergency)
        .await;

    let rendered = render_metrics();
    assert!(rendered.contains("ws_auth_validations_total"));
    assert!(rendered.contains("method=\"relaxed_strict_success\""));
    assert!(rendered.contains("method=\"emergency_not_justified\""));
    assert!(rendered.contains("ws_auth_circuit_state"));
}
