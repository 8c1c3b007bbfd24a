//! Named-setting configuration sources.
//!
//! Components never read the process environment directly. They receive a
//! [`ConfigSource`] and resolve typed values from it once per configuration epoch.

use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use std::collections::HashMap;
use std::path::Path;

/// Synchronous read access to named settings.
///
/// Only [`ConfigSource::get_string`] must be implemented; the typed getters parse
/// the string form. `Ok(None)` means the key is not set at all.
pub trait ConfigSource: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>, AppError>;

    fn get_bool(&self, key: &str) -> Result<Option<bool>, AppError> {
        match self.get_string(key)? {
            Some(raw) => parse_bool(&raw)
                .map(Some)
                .ok_or_else(|| invalid_value(key, &raw, "a boolean")),
            None => Ok(None),
        }
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, AppError> {
        match self.get_string(key)? {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid_value(key, &raw, "an integer")),
            None => Ok(None),
        }
    }

    fn get_float(&self, key: &str) -> Result<Option<f64>, AppError> {
        match self.get_string(key)? {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| invalid_value(key, &raw, "a finite number")),
            None => Ok(None),
        }
    }

    /// Whether the key is set, regardless of its value.
    fn contains(&self, key: &str) -> bool {
        matches!(self.get_string(key), Ok(Some(_)))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid_value(key: &str, raw: &str, expected: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(
        "{} must be {}, got '{}'",
        key,
        expected,
        raw
    ))
}

/// Optional `configuration.*` file overlaid by the process environment.
///
/// Keys are matched case-insensitively, so `CIRCUIT_FAILURE_THRESHOLD` in the
/// environment and `circuit_failure_threshold` in the file are the same setting.
pub struct LayeredConfigSource {
    inner: Cfg,
}

impl LayeredConfigSource {
    /// Load `.env` (if present), then `configuration.{toml,yaml,json}` from the
    /// working directory (if present), then the process environment.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let inner = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::default())
            .build()?;

        Ok(Self { inner })
    }

    /// Load a specific configuration file overlaid by the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let inner = Cfg::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(Environment::default())
            .build()?;

        Ok(Self { inner })
    }
}

impl ConfigSource for LayeredConfigSource {
    fn get_string(&self, key: &str) -> Result<Option<String>, AppError> {
        match self.inner.get_string(&key.to_lowercase()) {
            Ok(value) => Ok(Some(value)),
            Err(config::ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory settings, used by tests and by hosts that resolve configuration
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    values: HashMap<String, String>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_uppercase(), value.to_string());
        self
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        pairs
            .into_iter()
            .fold(Self::new(), |source, (key, value)| source.with(key, value))
    }
}

impl ConfigSource for StaticConfigSource {
    fn get_string(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.values.get(&key.to_uppercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_static_source_is_case_insensitive() {
        let source = StaticConfigSource::new().with("Environment", "staging");
        assert_eq!(
            source.get_string("ENVIRONMENT").unwrap(),
            Some("staging".to_string())
        );
        assert_eq!(source.get_string("MISSING").unwrap(), None);
    }

    #[test]
    fn test_typed_getters() {
        let source = StaticConfigSource::from_pairs([
            ("DEMO", "yes"),
            ("THRESHOLD", " 7 "),
            ("RATE", "0.25"),
        ]);
        assert_eq!(source.get_bool("DEMO").unwrap(), Some(true));
        assert_eq!(source.get_int("THRESHOLD").unwrap(), Some(7));
        assert_eq!(source.get_float("RATE").unwrap(), Some(0.25));
        assert_eq!(source.get_bool("UNSET").unwrap(), None);
    }

    #[test]
    fn test_unparsable_values_are_config_errors() {
        let source = StaticConfigSource::from_pairs([
            ("DEMO", "maybe"),
            ("THRESHOLD", "five"),
            ("RATE", "NaN"),
        ]);
        assert!(matches!(source.get_bool("DEMO"), Err(AppError::ConfigError(_))));
        assert!(matches!(source.get_int("THRESHOLD"), Err(AppError::ConfigError(_))));
        assert!(matches!(source.get_float("RATE"), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_layered_source_reads_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Failed to create temp config");
        writeln!(file, "circuit_failure_threshold = 9").unwrap();
        writeln!(file, "fallback_demo_enabled = true").unwrap();

        let source = LayeredConfigSource::from_file(file.path()).unwrap();
        assert_eq!(source.get_int("CIRCUIT_FAILURE_THRESHOLD").unwrap(), Some(9));
        assert_eq!(source.get_bool("FALLBACK_DEMO_ENABLED").unwrap(), Some(true));
        assert!(source.contains("circuit_failure_threshold"));
        assert!(!source.contains("definitely_not_a_configured_key_xyz"));
    }
}
