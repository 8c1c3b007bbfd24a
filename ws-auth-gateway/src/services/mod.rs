//! Authentication pipeline for WebSocket handshakes.
//!
//! Detector, level validators and router decide and execute one attempt; the
//! circuit breaker wraps the router and falls back to degraded strategies when
//! the auth backend is failing.

mod backend;
pub mod circuit_breaker;
mod detector;
pub mod error;
mod full_auth;
mod jwt;
pub mod metrics;
mod router;
pub mod token;
pub mod validators;

pub use backend::BackendCaller;
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus, StateTransition};
pub use detector::{EnvironmentDetector, LevelDecision, decide};
pub use error::BackendError;
pub use full_auth::{FullAuthResponse, FullAuthenticator, TEMPORARY_UNAVAILABLE_CODES};
pub use jwt::{AccessTokenClaims, JWT_AUDIENCE, JWT_ISSUER, JWT_PUBLIC_KEY_PATH, JWT_SECRET, JwtAuthenticator};
pub use router::{LevelStats, PermissivenessRouter, RouterStats};

use std::any::Any;

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
