use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use super::detector::EnvironmentDetector;
use super::metrics;
use super::panic_message;
use super::validators::ValidatorSet;
use crate::models::{AuthOutcome, ConnectionMetadata, PermissivenessLevel};

const EXCEPTION_WARNING: &str = "Authentication could not be completed";

#[derive(Default)]
struct LevelCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub per_level_counts: BTreeMap<PermissivenessLevel, LevelStats>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate_percent: f64,
}

/// Picks a permissiveness level for each attempt and dispatches to its validator.
pub struct PermissivenessRouter {
    detector: Arc<EnvironmentDetector>,
    validators: ValidatorSet,
    counters: [LevelCounters; 4],
}

impl PermissivenessRouter {
    pub fn new(detector: Arc<EnvironmentDetector>, validators: ValidatorSet) -> Self {
        Self {
            detector,
            validators,
            counters: Default::default(),
        }
    }

    pub fn detector(&self) -> &Arc<EnvironmentDetector> {
        &self.detector
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Never panics. A panic inside the selected validator becomes a
    /// `validation_exception` failure.
    pub async fn validate_with_permissiveness(
        &self,
        connection: &ConnectionMetadata,
        level_override: Option<PermissivenessLevel>,
    ) -> AuthOutcome {
        let start = Instant::now();
        let attempt_id = Uuid::new_v4();

        let (context, decision) = self.detector.detect(connection);
        let (level, level_source) = match level_override {
            Some(level) => (level, "override"),
            None => (decision.level, "detected"),
        };

        let validator = self.validators.get(level);
        let outcome = match AssertUnwindSafe(validator.validate(connection, &context))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    attempt_id = %attempt_id,
                    level = %level,
                    error = %message,
                    "Validator panicked"
                );
                metrics::record_validation_exception(level);
                AuthOutcome::failure(level, "validation_exception")
                    .with_warning(EXCEPTION_WARNING)
                    .with_audit("errorCode", "VALIDATION_EXCEPTION")
                    .with_audit("exceptionMessage", message)
            }
        };

        let elapsed = start.elapsed();
        let outcome = outcome
            .with_audit("validationDurationMs", elapsed.as_secs_f64() * 1000.0)
            .with_audit("levelSource", level_source)
            .with_audit("levelReason", decision.reason)
            .with_audit("environment", context.environment.clone())
            .with_audit("attemptId", attempt_id.to_string());

        self.count(&outcome);
        metrics::record_validation(&outcome, elapsed);

        info!(
            attempt_id = %attempt_id,
            level = %outcome.level,
            method = %outcome.method,
            success = outcome.success,
            duration_ms = elapsed.as_millis() as u64,
            "Authentication attempt validated"
        );

        outcome
    }

    fn count(&self, outcome: &AuthOutcome) {
        let counters = &self.counters[outcome.level.index()];
        counters.attempts.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> RouterStats {
        let per_level_counts: BTreeMap<_, _> = PermissivenessLevel::ALL
            .iter()
            .map(|level| {
                let counters = &self.counters[level.index()];
                let stats = LevelStats {
                    attempts: counters.attempts.load(Ordering::Relaxed),
                    successes: counters.successes.load(Ordering::Relaxed),
                    failures: counters.failures.load(Ordering::Relaxed),
                };
                (*level, stats)
            })
            .collect();

        let total_attempts = per_level_counts.values().map(|s| s.attempts).sum();
        let total_successes = per_level_counts.values().map(|s| s.successes).sum();
        let total_failures = per_level_counts.values().map(|s| s.failures).sum();

        RouterStats {
            per_level_counts,
            total_attempts,
            total_successes,
            total_failures,
            success_rate_percent: percent(total_successes, total_attempts),
        }
    }

    /// Operator action. Counters otherwise live for the process lifetime.
    pub fn reset_stats(&self) {
        for counters in &self.counters {
            counters.attempts.store(0, Ordering::Relaxed);
            counters.successes.store(0, Ordering::Relaxed);
            counters.failures.store(0, Ordering::Relaxed);
        }
        info!("Router statistics reset");
    }
}

pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
