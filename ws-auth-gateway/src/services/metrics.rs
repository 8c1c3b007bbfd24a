use metrics::{Label, counter, gauge, histogram};
use std::time::Duration;

use crate::models::{AuthOutcome, PermissivenessLevel};

pub fn record_validation(outcome: &AuthOutcome, duration: Duration) {
    let labels = vec![
        Label::new("level", outcome.level.as_str()),
        Label::new("method", outcome.method.clone()),
        Label::new("success", outcome.success.to_string()),
    ];

    counter!("ws_auth_validations_total", labels).increment(1);
    histogram!("ws_auth_validation_duration_seconds", "level" => outcome.level.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_validation_exception(level: PermissivenessLevel) {
    counter!("ws_auth_validation_exceptions_total", "level" => level.as_str()).increment(1);
}

pub fn record_circuit_transition(from: &'static str, to: &'static str, manual: bool) {
    counter!(
        "ws_auth_circuit_transitions_total",
        "from" => from,
        "to" => to,
        "manual" => manual.to_string()
    )
    .increment(1);
}

/// 0 = closed, 1 = half open, 2 = open.
pub fn record_circuit_state(state_code: u8) {
    gauge!("ws_auth_circuit_state").set(state_code as f64);
}

pub fn record_fallback(strategy: &'static str, success: bool) {
    counter!(
        "ws_auth_fallback_attempts_total",
        "strategy" => strategy,
        "success" => success.to_string()
    )
    .increment(1);
}

pub fn record_fallback_cache_hit() {
    counter!("ws_auth_fallback_cache_hits_total").increment(1);
}
