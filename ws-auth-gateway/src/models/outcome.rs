use super::PermissivenessLevel;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub permissions: BTreeSet<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_permissions<'a>(mut self, permissions: impl IntoIterator<Item = &'a str>) -> Self {
        self.permissions
            .extend(permissions.into_iter().map(str::to_string));
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Result of one authentication attempt.
///
/// `method` is a stable tag callers may branch on; `warnings` are safe to show
/// to end users. `audit` is for operators and logs only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutcome {
    pub success: bool,
    pub level: PermissivenessLevel,
    pub identity: Option<UserIdentity>,
    pub method: String,
    pub bypass_reason: Option<String>,
    pub warnings: Vec<String>,
    pub audit: BTreeMap<String, Value>,
}

impl AuthOutcome {
    pub fn success(level: PermissivenessLevel, identity: UserIdentity, method: &str) -> Self {
        Self {
            success: true,
            level,
            identity: Some(identity),
            method: method.to_string(),
            bypass_reason: None,
            warnings: Vec::new(),
            audit: BTreeMap::new(),
        }
    }

    pub fn failure(level: PermissivenessLevel, method: &str) -> Self {
        Self {
            success: false,
            level,
            identity: None,
            method: method.to_string(),
            bypass_reason: None,
            warnings: Vec::new(),
            audit: BTreeMap::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_bypass_reason(mut self, reason: impl Into<String>) -> Self {
        self.bypass_reason = Some(reason.into());
        self
    }

    pub fn with_audit(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.audit.insert(key.to_string(), value.into());
        self
    }

    /// Error code recorded by whichever layer produced a failure, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.audit.get("errorCode").and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_and_serialization() {
        let outcome = AuthOutcome::success(
            PermissivenessLevel::Strict,
            UserIdentity::new("u-1").with_permissions(["read", "write"]),
            "strict_full_validation",
        )
        .with_audit("validationDurationMs", 1.5);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["level"], "strict");
        assert_eq!(json["method"], "strict_full_validation");
        assert_eq!(json["identity"]["user_id"], "u-1");
        assert_eq!(json["audit"]["validationDurationMs"], 1.5);
        assert!(json["bypassReason"].is_null());
    }

    #[test]
    fn test_error_code_reads_audit() {
        let outcome = AuthOutcome::failure(PermissivenessLevel::Strict, "strict_backend_error")
            .with_audit("errorCode", "TIMEOUT");
        assert_eq!(outcome.error_code(), Some("TIMEOUT"));
        assert_eq!(outcome.user_id(), None);
    }
}
