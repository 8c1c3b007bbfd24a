//! Local JWT validation as a [`FullAuthenticator`].

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use service_core::config::ConfigSource;
use service_core::error::AppError;
use std::path::Path;

use super::error::BackendError;
use super::full_auth::{FullAuthResponse, FullAuthenticator};
use super::token::presented_token;
use crate::models::{ConnectionMetadata, UserIdentity};

pub const JWT_SECRET: &str = "JWT_SECRET";
pub const JWT_PUBLIC_KEY_PATH: &str = "JWT_PUBLIC_KEY_PATH";
pub const JWT_ISSUER: &str = "JWT_ISSUER";
pub const JWT_AUDIENCE: &str = "JWT_AUDIENCE";

#[derive(Debug, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Space-separated OAuth scopes, merged into the permission set.
    #[serde(default)]
    pub scope: Option<String>,
}

pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// HS256 with a shared secret.
    pub fn from_secret(secret: &SecretString) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// RS256 with a PEM-encoded public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, AppError> {
        let decoding_key = DecodingKey::from_rsa_pem(pem).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid RSA public key: {}", e))
        })?;

        Ok(Self {
            decoding_key,
            validation: Validation::new(Algorithm::RS256),
        })
    }

    pub fn from_rsa_pem_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let pem = std::fs::read(path.as_ref())?;
        Self::from_rsa_pem(&pem)
    }

    /// Build from `JWT_PUBLIC_KEY_PATH` (preferred) or `JWT_SECRET`, with optional
    /// `JWT_ISSUER` / `JWT_AUDIENCE` checks.
    pub fn from_config(source: &dyn ConfigSource) -> Result<Self, AppError> {
        let mut authenticator = if let Some(path) = source.get_string(JWT_PUBLIC_KEY_PATH)? {
            Self::from_rsa_pem_file(path)?
        } else if let Some(secret) = source.get_string(JWT_SECRET)? {
            Self::from_secret(&SecretString::new(secret))
        } else {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Either {} or {} must be set",
                JWT_PUBLIC_KEY_PATH,
                JWT_SECRET
            )));
        };

        if let Some(issuer) = source.get_string(JWT_ISSUER)? {
            authenticator = authenticator.with_issuer(&issuer);
        }
        if let Some(audience) = source.get_string(JWT_AUDIENCE)? {
            authenticator = authenticator.with_audience(&audience);
        }

        Ok(authenticator)
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self
    }

    pub fn validate_token(&self, token: &str) -> Result<AccessTokenClaims, jsonwebtoken::errors::Error> {
        decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

fn rejection_code(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ExpiredSignature => "TOKEN_EXPIRED",
        ErrorKind::ImmatureSignature => "TOKEN_NOT_YET_VALID",
        ErrorKind::InvalidSignature => "INVALID_SIGNATURE",
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => "INVALID_CLAIMS",
        _ => "INVALID_TOKEN",
    }
}

#[async_trait]
impl FullAuthenticator for JwtAuthenticator {
    async fn authenticate(
        &self,
        connection: &ConnectionMetadata,
    ) -> Result<FullAuthResponse, BackendError> {
        let Some(token) = presented_token(connection) else {
            return Ok(FullAuthResponse::rejected("MISSING_TOKEN", "No bearer token presented"));
        };

        match self.validate_token(token) {
            Ok(claims) => {
                let mut identity = UserIdentity::new(claims.sub)
                    .with_permissions(claims.permissions.iter().map(String::as_str));
                if let Some(scope) = &claims.scope {
                    identity = identity.with_permissions(scope.split_whitespace());
                }
                if let Some(email) = claims.email {
                    identity = identity.with_email(email);
                }
                Ok(FullAuthResponse::accepted(identity))
            }
            Err(e) => {
                tracing::debug!(error = %e, "JWT validation failed");
                Ok(FullAuthResponse::rejected(rejection_code(e.kind()), &e.to_string()))
            }
        }
    }
}
