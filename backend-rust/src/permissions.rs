//! # permissions
//!
//! Role gate for configuration-section writes. Storage and authentication
//! live elsewhere; this only answers "may role R modify section S?".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PermissionsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Diag,
    Admin,
    Root,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diag => "diag",
            Self::Admin => "admin",
            Self::Root => "root",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diag" => Ok(Self::Diag),
            "admin" => Ok(Self::Admin),
            "root" => Ok(Self::Root),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionChecker {
    admin_editable: Vec<String>,
    root_only: Vec<String>,
}

impl PermissionChecker {
    pub fn new(cfg: &PermissionsConfig) -> Self {
        Self {
            admin_editable: cfg.admin_editable.clone(),
            root_only: cfg.root_only.clone(),
        }
    }

    pub fn can_modify(&self, role: Role, section: &str) -> bool {
        match role {
            Role::Diag => false,
            Role::Root => true,
            Role::Admin => {
                !matches_any(section, &self.root_only) && matches_any(section, &self.admin_editable)
            }
        }
    }
}

/// `a.*` matches `a` and anything under `a.`; other patterns match exactly.
fn matches_any(section: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match p.strip_suffix(".*") {
        Some(prefix) => {
            section == prefix
                || section.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'))
        }
        None => section == p,
    })
}
