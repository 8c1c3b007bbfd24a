pub mod config;
pub mod models;
pub mod services;

use service_core::config::ConfigSource;
use service_core::error::AppError;
use std::sync::Arc;

use crate::config::{ConfigLoader, GatewaySettings};
use crate::models::{AuthOutcome, ConnectionMetadata, PermissivenessLevel};
use crate::services::circuit_breaker::DegradationManager;
use crate::services::validators::ValidatorSet;
use crate::services::{
    BackendCaller, CircuitBreaker, CircuitState, CircuitStatus, EnvironmentDetector,
    FullAuthenticator, PermissivenessRouter, RouterStats,
};

/// Composition root handed to the WebSocket handshake layer.
///
/// Owns one configuration loader, router and circuit breaker. Nothing here is
/// global; build one per process and share it behind an `Arc`.
pub struct AuthGateway {
    loader: Arc<ConfigLoader>,
    router: Arc<PermissivenessRouter>,
    breaker: Arc<CircuitBreaker>,
}

impl AuthGateway {
    pub fn new(source: Arc<dyn ConfigSource>, backend: Arc<dyn FullAuthenticator>) -> Self {
        Self::with_loader(Arc::new(ConfigLoader::new(source)), backend)
    }

    pub fn with_settings(settings: GatewaySettings, backend: Arc<dyn FullAuthenticator>) -> Self {
        Self::with_loader(Arc::new(ConfigLoader::from_settings(settings)), backend)
    }

    pub fn with_loader(loader: Arc<ConfigLoader>, backend: Arc<dyn FullAuthenticator>) -> Self {
        let detector = Arc::new(EnvironmentDetector::new(loader.clone(), backend.clone()));
        let caller = Arc::new(BackendCaller::new(backend, loader.clone()));
        let validators = ValidatorSet::new(caller);

        let router = Arc::new(PermissivenessRouter::new(detector.clone(), validators.clone()));
        let degradation = Arc::new(DegradationManager::new(detector, validators, loader.clone()));
        let breaker = Arc::new(CircuitBreaker::new(router.clone(), degradation, loader.clone()));

        tracing::info!(
            environment = %loader.snapshot().environment,
            "Auth gateway initialized"
        );

        Self {
            loader,
            router,
            breaker,
        }
    }

    /// Always returns an outcome, whatever the connection or backend does.
    pub async fn authenticate(&self, connection: &ConnectionMetadata) -> AuthOutcome {
        self.breaker.authenticate(connection).await
    }

    /// Bypasses the circuit breaker and validates at a fixed level.
    pub async fn authenticate_at(
        &self,
        connection: &ConnectionMetadata,
        level: PermissivenessLevel,
    ) -> AuthOutcome {
        self.router
            .validate_with_permissiveness(connection, Some(level))
            .await
    }

    pub async fn status(&self) -> CircuitStatus {
        self.breaker.get_status().await
    }

    pub fn stats(&self) -> RouterStats {
        self.router.get_stats()
    }

    pub fn reset_stats(&self) {
        self.router.reset_stats();
    }

    pub async fn force_state(&self, state: CircuitState, reason: &str) {
        self.breaker.force_state(state, reason).await;
    }

    /// Re-read configuration. On failure the safe defaults stay installed and the
    /// error is returned.
    pub fn reload_config(&self) -> Result<Arc<GatewaySettings>, AppError> {
        self.loader.reload()
    }

    pub fn settings(&self) -> Arc<GatewaySettings> {
        self.loader.snapshot()
    }

    pub fn router(&self) -> &Arc<PermissivenessRouter> {
        &self.router
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
