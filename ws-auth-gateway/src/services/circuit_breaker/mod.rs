//! Circuit breaker around the permissiveness router.
//!
//! `Closed` calls the router and records results; `Open` serves fallbacks until
//! the open timeout elapses; `HalfOpen` lets a bounded number of probes through
//! and closes after enough of them succeed.
//!
//! All mutable state sits behind one `tokio::sync::Mutex`. The lock is released
//! before the router is called and re-acquired to record the result. Every
//! transition bumps a generation counter, so results admitted under an earlier
//! state cannot drive a transition.

mod cache;
mod degradation;
mod failure_detector;

pub use cache::ResultCache;
pub use degradation::{DegradationManager, DegradationStats, FallbackStrategy, StrategyStats};
pub use failure_detector::{FailureAnalysis, FailureDetector, HISTORY_LIMIT};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::metrics;
use super::panic_message;
use super::router::PermissivenessRouter;
use crate::config::{ConfigLoader, DegradationConfig};
use crate::models::{AuthOutcome, ConnectionMetadata, PermissivenessLevel};

pub const TRANSITION_HISTORY_LIMIT: usize = 100;

const EXCEPTION_WARNING: &str = "Authentication could not be completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
    pub at: DateTime<Utc>,
    pub manual_override: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HalfOpenStatus {
    pub probes_issued: u32,
    pub max_probes: u32,
    pub successes: u32,
    pub failures: u32,
    pub success_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub state_changed_at: DateTime<Utc>,
    pub time_in_state_seconds: f64,
    pub generation: u64,
    pub failure_analysis: FailureAnalysis,
    pub half_open: HalfOpenStatus,
    pub degradation: DegradationStats,
    pub config: DegradationConfig,
    pub recent_transitions: Vec<StateTransition>,
}

enum Admission {
    Call { generation: u64, state: CircuitState },
    Fallback { state: CircuitState },
}

struct BreakerInner {
    state: CircuitState,
    state_changed_at: Instant,
    state_changed_wall: DateTime<Utc>,
    /// Start of the current half-open probe budget.
    budget_started_at: Instant,
    generation: u64,
    probes_issued: u32,
    half_open_successes: u32,
    half_open_failures: u32,
    detector: FailureDetector,
    transitions: VecDeque<StateTransition>,
    config: DegradationConfig,
    config_epoch: u64,
}

impl BreakerInner {
    fn new(config: DegradationConfig, epoch: u64) -> Self {
        let now = Instant::now();
        Self {
            state: CircuitState::Closed,
            state_changed_at: now,
            state_changed_wall: Utc::now(),
            budget_started_at: now,
            generation: 0,
            probes_issued: 0,
            half_open_successes: 0,
            half_open_failures: 0,
            detector: FailureDetector::new(&config),
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY_LIMIT),
            config,
            config_epoch: epoch,
        }
    }

    fn half_open_status(&self) -> HalfOpenStatus {
        HalfOpenStatus {
            probes_issued: self.probes_issued,
            max_probes: self.config.half_open_max_probes,
            successes: self.half_open_successes,
            failures: self.half_open_failures,
            success_threshold: self.config.success_threshold,
        }
    }
}

/// One breaker per gateway, owned by [`crate::AuthGateway`].
pub struct CircuitBreaker {
    router: Arc<PermissivenessRouter>,
    degradation: Arc<DegradationManager>,
    loader: Arc<ConfigLoader>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        router: Arc<PermissivenessRouter>,
        degradation: Arc<DegradationManager>,
        loader: Arc<ConfigLoader>,
    ) -> Self {
        let inner = BreakerInner::new(loader.snapshot().degradation.clone(), loader.epoch());
        metrics::record_circuit_state(CircuitState::Closed.gauge_value());
        Self {
            router,
            degradation,
            loader,
            inner: Mutex::new(inner),
        }
    }

    pub fn degradation(&self) -> &Arc<DegradationManager> {
        &self.degradation
    }

    /// Never panics. Anything that unwinds out of the pipeline is recorded as a
    /// `CIRCUIT_EXCEPTION` failure.
    pub async fn authenticate(&self, connection: &ConnectionMetadata) -> AuthOutcome {
        match AssertUnwindSafe(self.authenticate_guarded(connection))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(error = %message, "Circuit breaker caught a panic");
                self.record_panic(&message).await;

                AuthOutcome::failure(PermissivenessLevel::Strict, "circuit_exception")
                    .with_warning(EXCEPTION_WARNING)
                    .with_audit("errorCode", "CIRCUIT_EXCEPTION")
                    .with_audit("exceptionMessage", message)
            }
        }
    }

    async fn authenticate_guarded(&self, connection: &ConnectionMetadata) -> AuthOutcome {
        match self.admit().await {
            Admission::Fallback { state } => self
                .degradation
                .authenticate_with_fallback(connection)
                .await
                .with_audit("circuitState", state.as_str()),
            Admission::Call { generation, state } => {
                let outcome = self.router.validate_with_permissiveness(connection, None).await;
                self.record_result(generation, &outcome).await;
                outcome.with_audit("circuitState", state.as_str())
            }
        }
    }

    async fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().await;
        self.refresh_config(&mut inner);

        if inner.state == CircuitState::Open {
            if inner.state_changed_at.elapsed() < inner.config.open_timeout() {
                return Admission::Fallback {
                    state: CircuitState::Open,
                };
            }
            self.transition(&mut inner, CircuitState::HalfOpen, "open_timeout_elapsed", false);
        }

        match inner.state {
            CircuitState::Closed => Admission::Call {
                generation: inner.generation,
                state: CircuitState::Closed,
            },
            _ => {
                if inner.probes_issued >= inner.config.half_open_max_probes
                    && inner.half_open_successes > 0
                    && inner.budget_started_at.elapsed() >= inner.config.open_timeout()
                {
                    info!(
                        successes = inner.half_open_successes,
                        "Renewing half-open probe budget"
                    );
                    inner.probes_issued = 0;
                    inner.half_open_successes = 0;
                    inner.half_open_failures = 0;
                    inner.budget_started_at = Instant::now();
                }

                if inner.probes_issued < inner.config.half_open_max_probes {
                    inner.probes_issued += 1;
                    debug!(probe = inner.probes_issued, "Admitting half-open probe");
                    Admission::Call {
                        generation: inner.generation,
                        state: CircuitState::HalfOpen,
                    }
                } else {
                    Admission::Fallback {
                        state: CircuitState::HalfOpen,
                    }
                }
            }
        }
    }

    async fn record_result(&self, generation: u64, outcome: &AuthOutcome) {
        let mut inner = self.inner.lock().await;

        if generation != inner.generation {
            debug!(
                admitted_generation = generation,
                current_generation = inner.generation,
                "Ignoring result admitted under a previous breaker state"
            );
            return;
        }

        if outcome.success {
            inner.detector.record_success();
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= inner.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, "half_open_probes_succeeded", false);
                }
            }
            return;
        }

        let code = outcome.error_code().unwrap_or("AUTHENTICATION_FAILED");
        self.record_failure(&mut inner, code, &outcome.method);
    }

    /// A panic that escaped the pipeline counts as a failure in whatever state
    /// the breaker is in now, including a half-open probe slot it consumed.
    async fn record_panic(&self, message: &str) {
        let mut inner = self.inner.lock().await;
        self.record_failure(&mut inner, "CIRCUIT_EXCEPTION", message);
    }

    fn record_failure(&self, inner: &mut BreakerInner, code: &str, message: &str) {
        inner.detector.record_failure(code, message);

        match inner.state {
            CircuitState::Closed => {
                if inner.detector.should_trip() {
                    warn!(
                        consecutive_failures = inner.detector.consecutive_failures(),
                        failure_rate = inner.detector.failure_rate(),
                        "Failure threshold exceeded"
                    );
                    self.transition(inner, CircuitState::Open, "failure_threshold_exceeded", false);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_failures += 1;
                if inner.probes_issued >= inner.config.half_open_max_probes
                    && inner.half_open_successes == 0
                {
                    self.transition(inner, CircuitState::Open, "half_open_probes_failed", false);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Operator or test override. Always appends a transition entry.
    pub async fn force_state(&self, state: CircuitState, reason: &str) {
        let mut inner = self.inner.lock().await;
        warn!(to = %state, reason, "Circuit state forced");
        self.transition(&mut inner, state, reason, true);
    }

    pub async fn get_status(&self) -> CircuitStatus {
        let mut status = {
            let inner = self.inner.lock().await;
            CircuitStatus {
                state: inner.state,
                state_changed_at: inner.state_changed_wall,
                time_in_state_seconds: inner.state_changed_at.elapsed().as_secs_f64(),
                generation: inner.generation,
                failure_analysis: inner.detector.analysis(),
                half_open: inner.half_open_status(),
                degradation: DegradationStats::default(),
                config: inner.config.clone(),
                recent_transitions: inner.transitions.iter().cloned().collect(),
            }
        };

        status.degradation = self.degradation.get_stats();
        status
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    fn refresh_config(&self, inner: &mut BreakerInner) {
        let epoch = self.loader.epoch();
        if epoch != inner.config_epoch {
            let config = self.loader.snapshot().degradation.clone();
            inner.detector.configure(&config);
            inner.config = config;
            inner.config_epoch = epoch;
            debug!(epoch, "Circuit breaker picked up new configuration");
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, reason: &str, manual: bool) {
        let from = inner.state;
        let now = Instant::now();

        inner.state = to;
        inner.state_changed_at = now;
        inner.state_changed_wall = Utc::now();
        inner.budget_started_at = now;
        inner.generation += 1;
        inner.probes_issued = 0;
        inner.half_open_successes = 0;
        inner.half_open_failures = 0;

        if to == CircuitState::Closed {
            inner.detector.reset();
            self.degradation.clear_cache();
        }

        if inner.transitions.len() == TRANSITION_HISTORY_LIMIT {
            inner.transitions.pop_front();
        }
        inner.transitions.push_back(StateTransition {
            from,
            to,
            reason: reason.to_string(),
            at: inner.state_changed_wall,
            manual_override: manual,
        });

        metrics::record_circuit_transition(from.as_str(), to.as_str(), manual);
        metrics::record_circuit_state(to.gauge_value());

        match to {
            CircuitState::Open => warn!(from = %from, reason, manual, "Circuit opened"),
            _ => info!(from = %from, to = %to, reason, manual, "Circuit state changed"),
        }
    }
}
