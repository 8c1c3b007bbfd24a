use serde::Serialize;

/// Operating context of a single connection attempt.
///
/// Built fresh by the detector for every attempt and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub environment: String,
    pub is_managed_runtime: bool,
    pub has_reverse_proxy: bool,
    pub auth_backend_reachable: bool,
    pub demo_mode_enabled: bool,
    /// The demo flag was explicitly set to `false`, as opposed to left unset.
    pub demo_mode_explicitly_disabled: bool,
    pub emergency_mode_enabled: bool,
    pub connection_source: String,
    pub client_ip: Option<String>,
    pub headers_present: bool,
    pub subprotocol_present: bool,
}

impl AuthContext {
    pub fn is_production(&self) -> bool {
        is_production_environment(&self.environment)
    }
}

pub fn is_production_environment(environment: &str) -> bool {
    matches!(
        environment.trim().to_lowercase().as_str(),
        "production" | "prod"
    )
}
