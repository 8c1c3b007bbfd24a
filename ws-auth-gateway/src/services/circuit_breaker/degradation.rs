use futures::FutureExt;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use super::cache::ResultCache;
use crate::config::{ConfigLoader, DegradationConfig, GatewaySettings};
use crate::models::{AuthContext, AuthOutcome, ConnectionMetadata, PermissivenessLevel};
use crate::services::detector::EnvironmentDetector;
use crate::services::metrics;
use crate::services::panic_message;
use crate::services::router::percent;
use crate::services::validators::ValidatorSet;

const UNAVAILABLE_WARNING: &str = "Authentication service is temporarily unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    Relaxed,
    Demo,
    Emergency,
}

impl FallbackStrategy {
    /// Priority order.
    pub const ALL: [FallbackStrategy; 3] = [
        FallbackStrategy::Relaxed,
        FallbackStrategy::Demo,
        FallbackStrategy::Emergency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FallbackStrategy::Relaxed => "relaxed",
            FallbackStrategy::Demo => "demo",
            FallbackStrategy::Emergency => "emergency",
        }
    }

    pub fn level(self) -> PermissivenessLevel {
        match self {
            FallbackStrategy::Relaxed => PermissivenessLevel::Relaxed,
            FallbackStrategy::Demo => PermissivenessLevel::Demo,
            FallbackStrategy::Emergency => PermissivenessLevel::Emergency,
        }
    }

    pub fn for_level(level: PermissivenessLevel) -> Option<Self> {
        match level {
            PermissivenessLevel::Relaxed => Some(FallbackStrategy::Relaxed),
            PermissivenessLevel::Demo => Some(FallbackStrategy::Demo),
            PermissivenessLevel::Emergency => Some(FallbackStrategy::Emergency),
            PermissivenessLevel::Strict => None,
        }
    }

    /// Whether an outcome produced by this strategy may still be handed out.
    /// Demo and emergency grants are never served in production.
    fn permits(self, settings: &GatewaySettings) -> bool {
        let bypass = matches!(self, FallbackStrategy::Demo | FallbackStrategy::Emergency);
        self.is_enabled(&settings.degradation) && !(bypass && settings.is_production())
    }

    fn is_enabled(self, config: &DegradationConfig) -> bool {
        match self {
            FallbackStrategy::Relaxed => config.relaxed_fallback_enabled,
            FallbackStrategy::Demo => config.demo_fallback_enabled,
            FallbackStrategy::Emergency => config.emergency_fallback_enabled,
        }
    }

    fn index(self) -> usize {
        match self {
            FallbackStrategy::Relaxed => 0,
            FallbackStrategy::Demo => 1,
            FallbackStrategy::Emergency => 2,
        }
    }
}

#[derive(Default)]
struct StrategyCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub successes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationStats {
    pub per_strategy: BTreeMap<FallbackStrategy, StrategyStats>,
    pub enabled_strategies: Vec<FallbackStrategy>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub all_fallbacks_failed: u64,
    pub cache_hits: u64,
    pub cached_outcomes: usize,
    pub success_rate_percent: f64,
}

/// Serves authentication attempts while the circuit breaker keeps the real
/// pipeline out of the path.
pub struct DegradationManager {
    detector: Arc<EnvironmentDetector>,
    validators: ValidatorSet,
    loader: Arc<ConfigLoader>,
    cache: ResultCache,
    strategies: [StrategyCounters; 3],
    requests: AtomicU64,
    successes: AtomicU64,
    exhausted: AtomicU64,
    cache_hits: AtomicU64,
}

impl DegradationManager {
    pub fn new(
        detector: Arc<EnvironmentDetector>,
        validators: ValidatorSet,
        loader: Arc<ConfigLoader>,
    ) -> Self {
        let cache = ResultCache::new(&loader.snapshot().cache);
        Self {
            detector,
            validators,
            loader,
            cache,
            strategies: Default::default(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub async fn authenticate_with_fallback(&self, connection: &ConnectionMetadata) -> AuthOutcome {
        let settings = self.loader.snapshot();
        let epoch = self.loader.epoch();
        self.cache.configure(&settings.cache);
        self.requests.fetch_add(1, Ordering::Relaxed);

        let fingerprint = connection.fingerprint();
        if let Some(cached) = self.cached_outcome(&fingerprint, epoch, &settings) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.successes.fetch_add(1, Ordering::Relaxed);
            metrics::record_fallback_cache_hit();
            debug!("Serving cached fallback outcome");
            return cached.with_audit("cacheHit", true);
        }

        // The breaker only routes here after observing backend failures.
        let context = AuthContext {
            auth_backend_reachable: false,
            ..self.detector.build_context(connection)
        };

        let enabled: Vec<FallbackStrategy> = FallbackStrategy::ALL
            .into_iter()
            .filter(|s| s.is_enabled(&settings.degradation))
            .collect();

        let mut failure_codes = serde_json::Map::new();
        for strategy in &enabled {
            let strategy = *strategy;
            let counters = &self.strategies[strategy.index()];
            counters.attempts.fetch_add(1, Ordering::Relaxed);

            let validator = self.validators.get(strategy.level());
            let outcome = match AssertUnwindSafe(validator.validate_degraded(connection, &context))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => {
                    error!(
                        strategy = strategy.as_str(),
                        error = %panic_message(payload.as_ref()),
                        "Fallback strategy panicked"
                    );
                    AuthOutcome::failure(strategy.level(), "fallback_exception")
                        .with_audit("errorCode", "FALLBACK_EXCEPTION")
                }
            };

            metrics::record_fallback(strategy.as_str(), outcome.success);

            if outcome.success {
                counters.successes.fetch_add(1, Ordering::Relaxed);
                self.successes.fetch_add(1, Ordering::Relaxed);
                info!(
                    strategy = strategy.as_str(),
                    method = %outcome.method,
                    "Fallback authentication succeeded"
                );

                let outcome = outcome
                    .with_audit("fallbackStrategy", strategy.as_str())
                    .with_audit("circuitBreakerActive", true);
                self.cache.insert(fingerprint, outcome.clone(), epoch);
                return outcome;
            }

            failure_codes.insert(
                strategy.as_str().to_string(),
                outcome.error_code().unwrap_or(outcome.method.as_str()).into(),
            );
        }

        self.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(attempted = enabled.len(), "All fallback strategies failed");

        let attempted: Vec<serde_json::Value> =
            enabled.iter().map(|s| s.as_str().into()).collect();
        let stats = serde_json::to_value(self.get_stats()).unwrap_or_default();
        let level = enabled
            .last()
            .map(|s| s.level())
            .unwrap_or(PermissivenessLevel::Strict);

        AuthOutcome::failure(level, "all_fallbacks_failed")
            .with_warning(UNAVAILABLE_WARNING)
            .with_audit("errorCode", "ALL_FALLBACKS_FAILED")
            .with_audit("errorKind", AppError::CircuitOpen.kind())
            .with_audit("circuitBreakerActive", true)
            .with_audit("attemptedStrategies", attempted)
            .with_audit("fallbackFailures", failure_codes)
            .with_audit("degradationStats", stats)
    }

    fn cached_outcome(
        &self,
        fingerprint: &str,
        epoch: u64,
        settings: &GatewaySettings,
    ) -> Option<AuthOutcome> {
        let cached = self.cache.get(fingerprint, epoch)?;
        let permitted = FallbackStrategy::for_level(cached.level).is_some_and(|s| s.permits(settings));
        if !permitted {
            warn!(level = %cached.level, "Discarding cached fallback outcome no longer permitted");
            self.cache.remove(fingerprint);
            return None;
        }
        Some(cached)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn get_stats(&self) -> DegradationStats {
        let config = self.loader.snapshot().degradation.clone();
        let per_strategy = FallbackStrategy::ALL
            .into_iter()
            .map(|strategy| {
                let counters = &self.strategies[strategy.index()];
                let stats = StrategyStats {
                    attempts: counters.attempts.load(Ordering::Relaxed),
                    successes: counters.successes.load(Ordering::Relaxed),
                };
                (strategy, stats)
            })
            .collect();

        let total_requests = self.requests.load(Ordering::Relaxed);
        let successful_requests = self.successes.load(Ordering::Relaxed);

        DegradationStats {
            per_strategy,
            enabled_strategies: FallbackStrategy::ALL
                .into_iter()
                .filter(|s| s.is_enabled(&config))
                .collect(),
            total_requests,
            successful_requests,
            all_fallbacks_failed: self.exhausted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cached_outcomes: self.cache.len(),
            success_rate_percent: percent(successful_requests, total_requests),
        }
    }
}
