//! Security levels for key custody.
//!
//! A level names a custody tier. The first five map one-to-one onto ledger
//! permission names; the browser levels only ever back external sessions
//! and have no ledger counterpart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyManagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    Password,
    Pin,
    Biometric,
    Local,
    Active,
    BrowserLocalStorage,
    BrowserSessionStorage,
}

impl SecurityLevel {
    /// Every level, in index order.
    pub const ALL: [SecurityLevel; 7] = [
        SecurityLevel::Password,
        SecurityLevel::Pin,
        SecurityLevel::Biometric,
        SecurityLevel::Local,
        SecurityLevel::Active,
        SecurityLevel::BrowserLocalStorage,
        SecurityLevel::BrowserSessionStorage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SecurityLevel::Password => "PASSWORD",
            SecurityLevel::Pin => "PIN",
            SecurityLevel::Biometric => "BIOMETRIC",
            SecurityLevel::Local => "LOCAL",
            SecurityLevel::Active => "ACTIVE",
            SecurityLevel::BrowserLocalStorage => "BROWSER_LOCAL_STORAGE",
            SecurityLevel::BrowserSessionStorage => "BROWSER_SESSION_STORAGE",
        }
    }

    /// Levels whose key can only be used after re-presenting a secret.
    pub fn is_challenge_protected(&self) -> bool {
        matches!(self, SecurityLevel::Password | SecurityLevel::Pin)
    }

    /// The ledger permission this level is pushed to, if any.
    pub fn ledger_permission(&self) -> Option<&'static str> {
        match self {
            SecurityLevel::Password => Some("owner"),
            SecurityLevel::Pin => Some("pin"),
            SecurityLevel::Biometric => Some("biometric"),
            SecurityLevel::Local => Some("local"),
            SecurityLevel::Active => Some("active"),
            SecurityLevel::BrowserLocalStorage | SecurityLevel::BrowserSessionStorage => None,
        }
    }

    /// Inverse of [`SecurityLevel::ledger_permission`].
    pub fn from_ledger_permission(permission: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.ledger_permission() == Some(permission))
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityLevel {
    type Err = KeyManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityLevel::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| KeyManagerError::InvalidKeyLevel {
                level: s.to_string(),
            })
    }
}

/// Position of `level` in [`SecurityLevel::ALL`].
pub fn index_of(level: SecurityLevel) -> usize {
    match level {
        SecurityLevel::Password => 0,
        SecurityLevel::Pin => 1,
        SecurityLevel::Biometric => 2,
        SecurityLevel::Local => 3,
        SecurityLevel::Active => 4,
        SecurityLevel::BrowserLocalStorage => 5,
        SecurityLevel::BrowserSessionStorage => 6,
    }
}

/// Parses a level from either its index (`"3"`) or its name (`"LOCAL"`).
pub fn level_from_index_or_name(value: &str) -> Result<SecurityLevel, KeyManagerError> {
    let value = value.trim();
    match value.parse::<usize>() {
        Ok(index) => SecurityLevel::ALL
            .get(index)
            .copied()
            .ok_or_else(|| KeyManagerError::InvalidKeyLevel {
                level: value.to_string(),
            }),
        Err(_) => value.parse(),
    }
}
