//! One validator per permissiveness level.
//!
//! Validators never fail: every path ends in an [`AuthOutcome`], with diagnostic
//! detail in `audit` and only user-safe text in `warnings`.

mod demo;
mod emergency;
mod relaxed;
mod strict;

pub use demo::{DEMO_USER_ID, DemoValidator};
pub use emergency::EmergencyValidator;
pub use relaxed::{RELAXED_WARNING, RelaxedValidator};
pub use strict::StrictValidator;

use async_trait::async_trait;
use std::sync::Arc;

use super::backend::BackendCaller;
use crate::models::{AuthContext, AuthOutcome, ConnectionMetadata, PermissivenessLevel};

#[async_trait]
pub trait LevelValidator: Send + Sync {
    fn level(&self) -> PermissivenessLevel;

    async fn validate(&self, connection: &ConnectionMetadata, context: &AuthContext) -> AuthOutcome;

    /// Variant used while the circuit breaker is open. Validators that would
    /// otherwise call the auth backend must not do so here.
    async fn validate_degraded(
        &self,
        connection: &ConnectionMetadata,
        context: &AuthContext,
    ) -> AuthOutcome {
        self.validate(connection, context).await
    }
}

/// The four validators, shared by the router and the degradation manager.
#[derive(Clone)]
pub struct ValidatorSet {
    strict: Arc<StrictValidator>,
    relaxed: Arc<RelaxedValidator>,
    demo: Arc<DemoValidator>,
    emergency: Arc<EmergencyValidator>,
}

impl ValidatorSet {
    pub fn new(backend: Arc<BackendCaller>) -> Self {
        let strict = Arc::new(StrictValidator::new(backend));
        Self {
            relaxed: Arc::new(RelaxedValidator::new(strict.clone())),
            strict,
            demo: Arc::new(DemoValidator),
            emergency: Arc::new(EmergencyValidator),
        }
    }

    pub fn get(&self, level: PermissivenessLevel) -> &dyn LevelValidator {
        match level {
            PermissivenessLevel::Strict => self.strict.as_ref(),
            PermissivenessLevel::Relaxed => self.relaxed.as_ref(),
            PermissivenessLevel::Demo => self.demo.as_ref(),
            PermissivenessLevel::Emergency => self.emergency.as_ref(),
        }
    }
}
