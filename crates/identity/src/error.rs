//! Error types for identity lifecycle, credential and relay operations.

use thiserror::Error;
use veritas_core::{CoreError, ErrorCode};
use veritas_crypto::{DidError, KeyManagerError, SecurityLevel};

use crate::communication::RelayError;
use crate::ledger::LedgerError;
use crate::types::AccountStatus;

/// How a local key disagrees with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMismatch {
    /// The ledger has a key the device does not, so another device
    /// finished setting up this permission
    FoundOnChainNotLocally,
    /// The device has a key the ledger does not, so key update never
    /// completed
    FoundLocallyNotOnChain,
    /// Both sides have a key but they differ, so the account was logged in
    /// elsewhere
    KeysDoNotMatch,
}

impl std::fmt::Display for KeyMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            KeyMismatch::FoundOnChainNotLocally => "key found on chain but not locally",
            KeyMismatch::FoundLocallyNotOnChain => "key found locally but not yet on chain",
            KeyMismatch::KeysDoNotMatch => "local key does not match the key on chain",
        };
        f.write_str(reason)
    }
}

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Key manager error: {0}")]
    KeyManager(#[from] KeyManagerError),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("DID error: {0}")]
    Did(#[from] DidError),

    #[error("Storage error: {0}")]
    Storage(#[from] CoreError),

    #[error("Username is already taken: {username}")]
    UsernameTaken { username: String },

    /// The operation needs an account that has not been created or loaded
    #[error("Account doesn't exist: {0}")]
    AccountDoesntExist(String),

    /// The identity is not in a status that allows the operation
    #[error("Invalid status for {operation}: {}", display_status(.status))]
    InvalidStatus {
        operation: &'static str,
        status: Option<AccountStatus>,
    },

    /// Local key state diverged from the ledger
    #[error("Key not found for {level} ({permission}): {reason}")]
    KeyNotFound {
        level: SecurityLevel,
        permission: &'static str,
        reason: KeyMismatch,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

fn display_status(status: &Option<AccountStatus>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

impl From<LedgerError> for IdentityError {
    fn from(e: LedgerError) -> Self {
        match e {
            // Keep the key manager's code (e.g. PasswordInvalid) visible
            LedgerError::Signer(inner) => IdentityError::KeyManager(inner),
            other => IdentityError::Ledger(other),
        }
    }
}

impl IdentityError {
    pub fn code(&self) -> ErrorCode {
        match self {
            IdentityError::KeyManager(e) => e.code(),
            IdentityError::Ledger(e) => e.code(),
            IdentityError::Relay(e) => e.code(),
            IdentityError::Did(e) => e.code(),
            IdentityError::Storage(e) => e.code(),
            IdentityError::UsernameTaken { .. } => ErrorCode::UsernameTaken,
            IdentityError::AccountDoesntExist(_) => ErrorCode::AccountDoesntExist,
            IdentityError::InvalidStatus { .. } => ErrorCode::InvalidStatus,
            IdentityError::KeyNotFound { .. } => ErrorCode::KeyNotFound,
            IdentityError::InvalidData(_) => ErrorCode::InvalidData,
        }
    }
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
