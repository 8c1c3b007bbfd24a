use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::DegradationConfig;

pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
struct FailureRecord {
    at: Instant,
    error_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAnalysis {
    pub total_failures: u64,
    pub total_successes: u64,
    pub consecutive_failures: u32,
    pub failure_rate: f64,
    pub window_samples: usize,
    pub last_failure_timestamp: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub error_code_histogram: BTreeMap<String, u64>,
    pub should_trip: bool,
}

/// Failure pattern of the protected pipeline.
///
/// Not synchronized; the circuit breaker only touches it under its own lock.
#[derive(Debug)]
pub struct FailureDetector {
    failure_threshold: u32,
    failure_rate_threshold: f64,
    window: Duration,
    total_failures: u64,
    total_successes: u64,
    consecutive_failures: u32,
    failure_rate: f64,
    last_failure_at: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    error_codes: BTreeMap<String, u64>,
    failures: VecDeque<FailureRecord>,
    successes: VecDeque<Instant>,
}

impl FailureDetector {
    pub fn new(config: &DegradationConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failure_rate_threshold: config.failure_rate_threshold,
            window: config.failure_window(),
            total_failures: 0,
            total_successes: 0,
            consecutive_failures: 0,
            failure_rate: 0.0,
            last_failure_at: None,
            last_error_message: None,
            error_codes: BTreeMap::new(),
            failures: VecDeque::with_capacity(HISTORY_LIMIT),
            successes: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    /// Apply new thresholds without discarding history.
    pub fn configure(&mut self, config: &DegradationConfig) {
        self.failure_threshold = config.failure_threshold;
        self.failure_rate_threshold = config.failure_rate_threshold;
        self.window = config.failure_window();
        self.recompute_rate();
    }

    pub fn record_failure(&mut self, error_code: &str, message: &str) {
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Utc::now());
        self.last_error_message = Some(message.to_string());
        *self.error_codes.entry(error_code.to_string()).or_insert(0) += 1;

        if self.failures.len() == HISTORY_LIMIT {
            self.failures.pop_front();
        }
        self.failures.push_back(FailureRecord {
            at: Instant::now(),
            error_code: error_code.to_string(),
        });

        self.recompute_rate();
    }

    pub fn record_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_failures = 0;

        if self.successes.len() == HISTORY_LIMIT {
            self.successes.pop_front();
        }
        self.successes.push_back(Instant::now());

        self.recompute_rate();
    }

    /// Consecutive failures reach the threshold, or the windowed failure rate
    /// does once the window holds at least `failure_threshold` samples.
    pub fn should_trip(&self) -> bool {
        if self.consecutive_failures >= self.failure_threshold {
            return true;
        }
        let samples = self.window_counts();
        samples.0 + samples.1 >= self.failure_threshold as usize
            && self.failure_rate >= self.failure_rate_threshold
    }

    pub fn reset(&mut self) {
        self.total_failures = 0;
        self.total_successes = 0;
        self.consecutive_failures = 0;
        self.failure_rate = 0.0;
        self.last_failure_at = None;
        self.last_error_message = None;
        self.error_codes.clear();
        self.failures.clear();
        self.successes.clear();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Most recent failure codes, oldest first.
    pub fn recent_error_codes(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.error_code.as_str()).collect()
    }

    pub fn analysis(&self) -> FailureAnalysis {
        let (failures, successes) = self.window_counts();
        FailureAnalysis {
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            consecutive_failures: self.consecutive_failures,
            failure_rate: self.failure_rate,
            window_samples: failures + successes,
            last_failure_timestamp: self.last_failure_at,
            last_error_message: self.last_error_message.clone(),
            error_code_histogram: self.error_codes.clone(),
            should_trip: self.should_trip(),
        }
    }

    fn window_counts(&self) -> (usize, usize) {
        let now = Instant::now();
        let in_window = |at: &Instant| now.duration_since(*at) <= self.window;
        let failures = self.failures.iter().filter(|f| in_window(&f.at)).count();
        let successes = self.successes.iter().filter(|at| in_window(at)).count();
        (failures, successes)
    }

    fn recompute_rate(&mut self) {
        let (failures, successes) = self.window_counts();
        let total = failures + successes;
        self.failure_rate = if total == 0 {
            0.0
        } else {
            failures as f64 / total as f64
        };
    }
}
