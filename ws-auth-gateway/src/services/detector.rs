use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use super::full_auth::FullAuthenticator;
use crate::config::{ConfigLoader, GatewaySettings};
use crate::models::{AuthContext, ConnectionMetadata, PermissivenessLevel};

const PROXY_HEADERS: [&str; 4] = ["x-forwarded-for", "x-real-ip", "forwarded", "via"];
const NON_PRODUCTION_ENVIRONMENTS: [&str; 4] = ["staging", "development", "dev", "test"];

/// Level chosen for a connection and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDecision {
    pub level: PermissivenessLevel,
    pub reason: &'static str,
}

impl LevelDecision {
    fn new(level: PermissivenessLevel, reason: &'static str) -> Self {
        Self { level, reason }
    }
}

/// Derives the [`AuthContext`] and permissiveness level of a connection from
/// configuration and metadata alone.
///
/// The only outbound interaction is the backend's synchronous `probe()`; an error
/// or panic there marks the backend unreachable. Any panic while detecting yields
/// `Strict`.
pub struct EnvironmentDetector {
    loader: Arc<ConfigLoader>,
    backend: Arc<dyn FullAuthenticator>,
}

impl EnvironmentDetector {
    pub fn new(loader: Arc<ConfigLoader>, backend: Arc<dyn FullAuthenticator>) -> Self {
        Self { loader, backend }
    }

    pub fn detect_level(&self, connection: &ConnectionMetadata) -> PermissivenessLevel {
        self.detect(connection).1.level
    }

    pub fn build_context(&self, connection: &ConnectionMetadata) -> AuthContext {
        let settings = self.loader.snapshot();
        catch_unwind(AssertUnwindSafe(|| self.context_from(&settings, connection)))
            .unwrap_or_else(|_| fail_closed_context())
    }

    /// Context and level in one pass, so the backend is probed once per attempt.
    pub fn detect(&self, connection: &ConnectionMetadata) -> (AuthContext, LevelDecision) {
        let settings = self.loader.snapshot();

        let detected = catch_unwind(AssertUnwindSafe(|| {
            let context = self.context_from(&settings, connection);
            let decision = match connection.validate() {
                Ok(()) => decide(&context),
                Err(e) => {
                    warn!(error = %e, "Malformed connection metadata, requiring strict authentication");
                    LevelDecision::new(PermissivenessLevel::Strict, "malformed_metadata")
                }
            };
            (context, decision)
        }));

        match detected {
            Ok((context, decision)) => {
                debug!(
                    level = %decision.level,
                    reason = decision.reason,
                    environment = %context.environment,
                    "Permissiveness level detected"
                );
                (context, decision)
            }
            Err(_) => {
                warn!("Level detection panicked, failing closed to strict");
                (
                    fail_closed_context(),
                    LevelDecision::new(PermissivenessLevel::Strict, "detection_failure"),
                )
            }
        }
    }

    fn backend_reachable(&self) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.backend.probe())) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Auth backend probe failed");
                false
            }
            Err(_) => {
                warn!("Auth backend probe panicked");
                false
            }
        }
    }

    fn context_from(&self, settings: &GatewaySettings, connection: &ConnectionMetadata) -> AuthContext {
        let has_reverse_proxy = PROXY_HEADERS
            .iter()
            .any(|header| connection.header(header).is_some());

        let client_ip = connection
            .header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or_else(|| connection.header("x-real-ip").map(str::trim))
            .map(str::to_string)
            .or_else(|| connection.peer_ip().map(|ip| ip.to_string()));

        let connection_source = if has_reverse_proxy {
            "proxied"
        } else if connection.client_addr().is_some() {
            "direct"
        } else {
            "unknown"
        };

        AuthContext {
            environment: settings.environment.clone(),
            is_managed_runtime: settings.managed_runtime,
            has_reverse_proxy,
            auth_backend_reachable: self.backend_reachable(),
            demo_mode_enabled: settings.demo_mode == Some(true),
            demo_mode_explicitly_disabled: settings.demo_mode == Some(false),
            emergency_mode_enabled: settings.emergency_mode,
            connection_source: connection_source.to_string(),
            client_ip,
            headers_present: !connection.headers().is_empty(),
            subprotocol_present: !connection.subprotocols().is_empty(),
        }
    }
}

/// First matching rule wins.
pub fn decide(context: &AuthContext) -> LevelDecision {
    if context.emergency_mode_enabled {
        return LevelDecision::new(PermissivenessLevel::Emergency, "emergency_flag");
    }
    if !context.auth_backend_reachable {
        return LevelDecision::new(PermissivenessLevel::Emergency, "backend_unreachable");
    }
    if context.demo_mode_enabled {
        return LevelDecision::new(PermissivenessLevel::Demo, "demo_flag");
    }
    if context.is_production() {
        return LevelDecision::new(PermissivenessLevel::Strict, "production_environment");
    }

    let environment = context.environment.trim().to_lowercase();
    if NON_PRODUCTION_ENVIRONMENTS.contains(&environment.as_str()) {
        LevelDecision::new(PermissivenessLevel::Relaxed, "non_production_environment")
    } else {
        warn!(environment = %context.environment, "Unknown environment, using relaxed authentication");
        LevelDecision::new(PermissivenessLevel::Relaxed, "unknown_environment")
    }
}

fn fail_closed_context() -> AuthContext {
    AuthContext {
        environment: "production".to_string(),
        is_managed_runtime: false,
        has_reverse_proxy: false,
        auth_backend_reachable: true,
        demo_mode_enabled: false,
        demo_mode_explicitly_disabled: true,
        emergency_mode_enabled: false,
        connection_source: "unknown".to_string(),
        client_ip: None,
        headers_present: false,
        subprotocol_present: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(environment: &str) -> AuthContext {
        AuthContext {
            environment: environment.to_string(),
            ..fail_closed_context()
        }
    }

    #[test]
    fn test_decision_order() {
        let emergency = AuthContext {
            emergency_mode_enabled: true,
            demo_mode_enabled: true,
            ..context("production")
        };
        assert_eq!(decide(&emergency).level, PermissivenessLevel::Emergency);

        let unreachable = AuthContext {
            auth_backend_reachable: false,
            ..context("staging")
        };
        assert_eq!(decide(&unreachable).reason, "backend_unreachable");

        let demo = AuthContext {
            demo_mode_enabled: true,
            ..context("production")
        };
        assert_eq!(decide(&demo).level, PermissivenessLevel::Demo);

        assert_eq!(decide(&context("prod")).level, PermissivenessLevel::Strict);
        assert_eq!(decide(&context("Production")).level, PermissivenessLevel::Strict);
        assert_eq!(decide(&context("staging")).level, PermissivenessLevel::Relaxed);
        assert_eq!(decide(&context("development")).level, PermissivenessLevel::Relaxed);
    }

    #[test]
    fn test_unknown_environment_is_relaxed() {
        let decision = decide(&context("qa-eu-2"));
        assert_eq!(decision.level, PermissivenessLevel::Relaxed);
        assert_eq!(decision.reason, "unknown_environment");
    }
}
