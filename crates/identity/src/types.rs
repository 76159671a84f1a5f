//! Persisted identity state.

use serde::{Deserialize, Serialize};
use veritas_core::StorageField;
use veritas_crypto::Salt;

/// Scope of the identity record in the key-value store.
pub const IDENTITY_STORE_SCOPE: &str = "veritas.user.";

/// Lifecycle status of the local identity.
///
/// `Deactivated` mirrors a deactivation reported by the ledger; no local
/// operation sets it. Logging out removes the status instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    CreatingAccount,
    LoggingIn,
    Ready,
    Deactivated,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccountStatus::CreatingAccount => "CREATING_ACCOUNT",
            AccountStatus::LoggingIn => "LOGGING_IN",
            AccountStatus::Ready => "READY",
            AccountStatus::Deactivated => "DEACTIVATED",
        };
        f.write_str(name)
    }
}

/// Fields of the persisted identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Status,
    AccountName,
    Username,
    PasswordSalt,
    Did,
}

impl IdentityField {
    pub const ALL: [IdentityField; 5] = [
        IdentityField::Status,
        IdentityField::AccountName,
        IdentityField::Username,
        IdentityField::PasswordSalt,
        IdentityField::Did,
    ];
}

impl StorageField for IdentityField {
    fn key(&self) -> &'static str {
        match self {
            IdentityField::Status => "status",
            IdentityField::AccountName => "accountName",
            IdentityField::Username => "username",
            IdentityField::PasswordSalt => "passwordSalt",
            IdentityField::Did => "did",
        }
    }
}

/// Snapshot of the persisted identity. Every field is absent until the
/// operation that sets it has succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub status: Option<AccountStatus>,
    pub account_name: Option<String>,
    /// Fully-qualified username.
    pub username: Option<String>,
    pub password_salt: Option<Salt>,
    pub did: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(AccountStatus::CreatingAccount).unwrap(),
            serde_json::json!("CREATING_ACCOUNT")
        );
        for status in [
            AccountStatus::CreatingAccount,
            AccountStatus::LoggingIn,
            AccountStatus::Ready,
            AccountStatus::Deactivated,
        ] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.to_string())
            );
        }
    }

    #[test]
    fn test_field_keys_are_distinct() {
        let keys: std::collections::HashSet<_> =
            IdentityField::ALL.iter().map(|f| f.key()).collect();
        assert_eq!(keys.len(), IdentityField::ALL.len());
    }
}
