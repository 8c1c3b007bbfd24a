use serde::Serialize;
use service_core::config::ConfigSource;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use validator::Validate;

use crate::models::is_production_environment;

pub mod keys {
    pub const ENVIRONMENT: &str = "ENVIRONMENT";
    pub const DEMO_MODE_ENABLED: &str = "DEMO_MODE_ENABLED";
    pub const EMERGENCY_AUTH_BYPASS: &str = "EMERGENCY_AUTH_BYPASS";
    pub const MANAGED_RUNTIME: &str = "MANAGED_RUNTIME";
    pub const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
    pub const K_SERVICE: &str = "K_SERVICE";

    pub const CIRCUIT_FAILURE_THRESHOLD: &str = "CIRCUIT_FAILURE_THRESHOLD";
    pub const CIRCUIT_FAILURE_RATE_THRESHOLD: &str = "CIRCUIT_FAILURE_RATE_THRESHOLD";
    pub const CIRCUIT_FAILURE_WINDOW_SECONDS: &str = "CIRCUIT_FAILURE_WINDOW_SECONDS";
    pub const CIRCUIT_OPEN_TIMEOUT_SECONDS: &str = "CIRCUIT_OPEN_TIMEOUT_SECONDS";
    pub const CIRCUIT_HALF_OPEN_MAX_PROBES: &str = "CIRCUIT_HALF_OPEN_MAX_PROBES";
    pub const CIRCUIT_SUCCESS_THRESHOLD: &str = "CIRCUIT_SUCCESS_THRESHOLD";

    pub const FALLBACK_RELAXED_ENABLED: &str = "FALLBACK_RELAXED_ENABLED";
    pub const FALLBACK_DEMO_ENABLED: &str = "FALLBACK_DEMO_ENABLED";
    pub const FALLBACK_EMERGENCY_ENABLED: &str = "FALLBACK_EMERGENCY_ENABLED";

    pub const AUTH_BACKEND_TIMEOUT_MS: &str = "AUTH_BACKEND_TIMEOUT_MS";
    pub const AUTH_BACKEND_MAX_RETRIES: &str = "AUTH_BACKEND_MAX_RETRIES";
    pub const AUTH_BACKEND_INITIAL_BACKOFF_MS: &str = "AUTH_BACKEND_INITIAL_BACKOFF_MS";
    pub const AUTH_BACKEND_MAX_BACKOFF_MS: &str = "AUTH_BACKEND_MAX_BACKOFF_MS";

    pub const RESULT_CACHE_TTL_SECONDS: &str = "RESULT_CACHE_TTL_SECONDS";
    pub const RESULT_CACHE_CAPACITY: &str = "RESULT_CACHE_CAPACITY";
}

/// Circuit breaker thresholds and fallback switches.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DegradationConfig {
    #[validate(range(min = 1, max = 10000))]
    pub failure_threshold: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub failure_rate_threshold: f64,
    #[validate(range(min = 1))]
    pub failure_window_seconds: u64,
    #[validate(range(min = 1))]
    pub open_timeout_seconds: u64,
    #[validate(range(min = 1, max = 1000))]
    pub half_open_max_probes: u32,
    #[validate(range(min = 1, max = 1000))]
    pub success_threshold: u32,
    pub relaxed_fallback_enabled: bool,
    pub demo_fallback_enabled: bool,
    pub emergency_fallback_enabled: bool,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            failure_window_seconds: 60,
            open_timeout_seconds: 30,
            half_open_max_probes: 3,
            success_threshold: 2,
            relaxed_fallback_enabled: false,
            demo_fallback_enabled: false,
            emergency_fallback_enabled: false,
        }
    }
}

impl DegradationConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_seconds)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    #[validate(range(min = 1, max = 120000))]
    pub timeout_ms: u64,
    #[validate(range(max = 3))]
    pub max_retries: u32,
    #[validate(range(min = 1))]
    pub initial_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub max_backoff_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
        }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    pub ttl_seconds: u64,
    #[validate(range(min = 1, max = 1000000))]
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            capacity: 1000,
        }
    }
}

/// Immutable snapshot of every setting the gateway reads, for one configuration epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    pub environment: String,
    /// `None` when the flag is unset, `Some(false)` when explicitly disabled.
    pub demo_mode: Option<bool>,
    pub emergency_mode: bool,
    pub managed_runtime: bool,
    pub degradation: DegradationConfig,
    pub backend: BackendSettings,
    pub cache: CacheSettings,
}

impl GatewaySettings {
    pub fn load(source: &dyn ConfigSource) -> Result<Self, AppError> {
        let environment = source
            .get_string(keys::ENVIRONMENT)?
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "production".to_string());
        let is_prod = is_production_environment(&environment);

        let defaults = DegradationConfig::default();
        let degradation = DegradationConfig {
            failure_threshold: read_u32(source, keys::CIRCUIT_FAILURE_THRESHOLD, defaults.failure_threshold)?,
            failure_rate_threshold: read_f64(
                source,
                keys::CIRCUIT_FAILURE_RATE_THRESHOLD,
                defaults.failure_rate_threshold,
            )?,
            failure_window_seconds: read_u64(
                source,
                keys::CIRCUIT_FAILURE_WINDOW_SECONDS,
                defaults.failure_window_seconds,
            )?,
            open_timeout_seconds: read_u64(
                source,
                keys::CIRCUIT_OPEN_TIMEOUT_SECONDS,
                defaults.open_timeout_seconds,
            )?,
            half_open_max_probes: read_u32(
                source,
                keys::CIRCUIT_HALF_OPEN_MAX_PROBES,
                defaults.half_open_max_probes,
            )?,
            success_threshold: read_u32(source, keys::CIRCUIT_SUCCESS_THRESHOLD, defaults.success_threshold)?,
            relaxed_fallback_enabled: read_bool(source, keys::FALLBACK_RELAXED_ENABLED, !is_prod)?,
            demo_fallback_enabled: read_bool(source, keys::FALLBACK_DEMO_ENABLED, false)?,
            emergency_fallback_enabled: read_bool(source, keys::FALLBACK_EMERGENCY_ENABLED, false)?,
        };

        let backend_defaults = BackendSettings::default();
        let backend = BackendSettings {
            timeout_ms: read_u64(source, keys::AUTH_BACKEND_TIMEOUT_MS, backend_defaults.timeout_ms)?,
            max_retries: read_u32(source, keys::AUTH_BACKEND_MAX_RETRIES, backend_defaults.max_retries)?,
            initial_backoff_ms: read_u64(
                source,
                keys::AUTH_BACKEND_INITIAL_BACKOFF_MS,
                backend_defaults.initial_backoff_ms,
            )?,
            max_backoff_ms: read_u64(
                source,
                keys::AUTH_BACKEND_MAX_BACKOFF_MS,
                backend_defaults.max_backoff_ms,
            )?,
        };

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            ttl_seconds: read_u64(source, keys::RESULT_CACHE_TTL_SECONDS, cache_defaults.ttl_seconds)?,
            capacity: read_u64(source, keys::RESULT_CACHE_CAPACITY, cache_defaults.capacity as u64)?
                as usize,
        };

        let managed_runtime = read_bool(source, keys::MANAGED_RUNTIME, false)?
            || source.contains(keys::KUBERNETES_SERVICE_HOST)
            || source.contains(keys::K_SERVICE);

        let settings = GatewaySettings {
            environment,
            demo_mode: source.get_bool(keys::DEMO_MODE_ENABLED)?,
            emergency_mode: read_bool(source, keys::EMERGENCY_AUTH_BYPASS, false)?,
            managed_runtime,
            degradation,
            backend,
            cache,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Most restrictive settings: production, every bypass and fallback off.
    pub fn safe_defaults() -> Self {
        Self {
            environment: "production".to_string(),
            demo_mode: Some(false),
            emergency_mode: false,
            managed_runtime: false,
            degradation: DegradationConfig::default(),
            backend: BackendSettings::default(),
            cache: CacheSettings::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        is_production_environment(&self.environment)
    }

    fn validate(&self) -> Result<(), AppError> {
        self.degradation.validate()?;
        self.backend.validate()?;
        self.cache.validate()?;

        if self.degradation.success_threshold > self.degradation.half_open_max_probes {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CIRCUIT_SUCCESS_THRESHOLD ({}) cannot exceed CIRCUIT_HALF_OPEN_MAX_PROBES ({})",
                self.degradation.success_threshold,
                self.degradation.half_open_max_probes
            )));
        }

        if self.backend.initial_backoff_ms > self.backend.max_backoff_ms {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTH_BACKEND_INITIAL_BACKOFF_MS cannot exceed AUTH_BACKEND_MAX_BACKOFF_MS"
            )));
        }

        if self.is_production() {
            if self.demo_mode == Some(true) {
                tracing::error!("DEMO_MODE_ENABLED is set in production - demo authentication stays blocked");
            }
            if self.emergency_mode {
                tracing::error!("EMERGENCY_AUTH_BYPASS is set in production - emergency authentication stays blocked");
            }
        }

        Ok(())
    }
}

fn read_bool(source: &dyn ConfigSource, key: &str, default: bool) -> Result<bool, AppError> {
    Ok(source.get_bool(key)?.unwrap_or(default))
}

fn read_f64(source: &dyn ConfigSource, key: &str, default: f64) -> Result<f64, AppError> {
    Ok(source.get_float(key)?.unwrap_or(default))
}

fn read_u64(source: &dyn ConfigSource, key: &str, default: u64) -> Result<u64, AppError> {
    match source.get_int(key)? {
        Some(value) => u64::try_from(value).map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} must not be negative, got {}", key, value))
        }),
        None => Ok(default),
    }
}

fn read_u32(source: &dyn ConfigSource, key: &str, default: u32) -> Result<u32, AppError> {
    let value = read_u64(source, key, default as u64)?;
    u32::try_from(value)
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is out of range: {}", key, value)))
}

/// Resolves [`GatewaySettings`] from a [`ConfigSource`] once per epoch.
///
/// The first epoch is resolved at construction; later epochs only on an explicit
/// [`ConfigLoader::reload`]. A load failure installs [`GatewaySettings::safe_defaults`].
pub struct ConfigLoader {
    source: Arc<dyn ConfigSource>,
    current: RwLock<Arc<GatewaySettings>>,
    epoch: AtomicU64,
    using_safe_defaults: AtomicBool,
}

impl ConfigLoader {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        let (settings, fell_back) = match GatewaySettings::load(source.as_ref()) {
            Ok(settings) => (settings, false),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load gateway configuration, using safe defaults");
                (GatewaySettings::safe_defaults(), true)
            }
        };

        tracing::info!(
            environment = %settings.environment,
            safe_defaults = fell_back,
            "Gateway configuration loaded"
        );

        Self {
            source,
            current: RwLock::new(Arc::new(settings)),
            epoch: AtomicU64::new(1),
            using_safe_defaults: AtomicBool::new(fell_back),
        }
    }

    /// Loader over fixed settings, bypassing any source.
    pub fn from_settings(settings: GatewaySettings) -> Self {
        Self {
            source: Arc::new(service_core::config::StaticConfigSource::new()),
            current: RwLock::new(Arc::new(settings)),
            epoch: AtomicU64::new(1),
            using_safe_defaults: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Arc<GatewaySettings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_using_safe_defaults(&self) -> bool {
        self.using_safe_defaults.load(Ordering::SeqCst)
    }

    /// Operator-triggered re-read of the source.
    ///
    /// On failure the safe defaults are installed and the error is returned.
    pub fn reload(&self) -> Result<Arc<GatewaySettings>, AppError> {
        let result = GatewaySettings::load(self.source.as_ref());
        let (settings, outcome) = match result {
            Ok(settings) => {
                let settings = Arc::new(settings);
                (settings.clone(), Ok(settings))
            }
            Err(e) => {
                tracing::error!(error = %e, "Configuration reload failed, using safe defaults");
                (Arc::new(GatewaySettings::safe_defaults()), Err(e))
            }
        };

        self.using_safe_defaults
            .store(outcome.is_err(), Ordering::SeqCst);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = settings;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(epoch, "Gateway configuration reloaded");

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::config::StaticConfigSource;

    #[test]
    fn test_defaults_from_empty_source() {
        let settings = GatewaySettings::load(&StaticConfigSource::new()).unwrap();
        assert_eq!(settings.environment, "production");
        assert_eq!(settings.demo_mode, None);
        assert!(!settings.emergency_mode);
        assert_eq!(settings.degradation.failure_threshold, 5);
        assert!(!settings.degradation.relaxed_fallback_enabled);
        assert_eq!(settings.cache.ttl_seconds, 300);
    }

    #[test]
    fn test_relaxed_fallback_defaults_on_outside_production() {
        let source = StaticConfigSource::new().with(keys::ENVIRONMENT, "Staging");
        let settings = GatewaySettings::load(&source).unwrap();
        assert_eq!(settings.environment, "staging");
        assert!(settings.degradation.relaxed_fallback_enabled);
    }

    #[test]
    fn test_managed_runtime_detected_from_platform_variables() {
        let source = StaticConfigSource::new().with(keys::KUBERNETES_SERVICE_HOST, "10.0.0.1");
        assert!(GatewaySettings::load(&source).unwrap().managed_runtime);
    }

    #[test]
    fn test_out_of_range_thresholds_are_rejected() {
        for (key, value) in [
            (keys::CIRCUIT_FAILURE_THRESHOLD, "0"),
            (keys::CIRCUIT_FAILURE_RATE_THRESHOLD, "1.5"),
            (keys::CIRCUIT_OPEN_TIMEOUT_SECONDS, "-3"),
            (keys::AUTH_BACKEND_MAX_RETRIES, "9"),
            (keys::CIRCUIT_SUCCESS_THRESHOLD, "5"),
        ] {
            let source = StaticConfigSource::new().with(key, value);
            assert!(
                GatewaySettings::load(&source).is_err(),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_loader_falls_back_to_safe_defaults() {
        let source = StaticConfigSource::new()
            .with(keys::ENVIRONMENT, "development")
            .with(keys::DEMO_MODE_ENABLED, "true")
            .with(keys::CIRCUIT_FAILURE_THRESHOLD, "lots");
        let loader = ConfigLoader::new(Arc::new(source));

        assert!(loader.is_using_safe_defaults());
        assert_eq!(*loader.snapshot(), GatewaySettings::safe_defaults());
    }

    #[test]
    fn test_reload_advances_epoch() {
        let loader = ConfigLoader::new(Arc::new(StaticConfigSource::new()));
        assert_eq!(loader.epoch(), 1);
        let reloaded = loader.reload().unwrap();
        assert_eq!(loader.epoch(), 2);
        assert_eq!(*reloaded, *loader.snapshot());
    }
}
