use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How much authentication rigor a connection attempt is held to.
///
/// Ordered by trust: `Strict` is the greatest value, `Emergency` the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissivenessLevel {
    Strict,
    Relaxed,
    Demo,
    Emergency,
}

impl PermissivenessLevel {
    pub const ALL: [PermissivenessLevel; 4] = [
        PermissivenessLevel::Strict,
        PermissivenessLevel::Relaxed,
        PermissivenessLevel::Demo,
        PermissivenessLevel::Emergency,
    ];

    pub fn trust_rank(self) -> u8 {
        match self {
            PermissivenessLevel::Strict => 3,
            PermissivenessLevel::Relaxed => 2,
            PermissivenessLevel::Demo => 1,
            PermissivenessLevel::Emergency => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissivenessLevel::Strict => "strict",
            PermissivenessLevel::Relaxed => "relaxed",
            PermissivenessLevel::Demo => "demo",
            PermissivenessLevel::Emergency => "emergency",
        }
    }

    /// Position in [`PermissivenessLevel::ALL`], used for fixed-size counter tables.
    pub(crate) fn index(self) -> usize {
        match self {
            PermissivenessLevel::Strict => 0,
            PermissivenessLevel::Relaxed => 1,
            PermissivenessLevel::Demo => 2,
            PermissivenessLevel::Emergency => 3,
        }
    }
}

impl PartialOrd for PermissivenessLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PermissivenessLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.trust_rank().cmp(&other.trust_rank())
    }
}

impl fmt::Display for PermissivenessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissivenessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(PermissivenessLevel::Strict),
            "relaxed" => Ok(PermissivenessLevel::Relaxed),
            "demo" => Ok(PermissivenessLevel::Demo),
            "emergency" => Ok(PermissivenessLevel::Emergency),
            _ => Err(format!("Invalid permissiveness level: {}", s)),
        }
    }
}
