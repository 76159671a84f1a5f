//! Error types for key custody, password handling and DID decoding.

use thiserror::Error;
use veritas_core::{CoreError, ErrorCode};

use crate::level::SecurityLevel;

/// Errors that can occur in key manager operations.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    /// A challenge-protected level was used without its challenge
    #[error("Challenge required for level {level}")]
    MissingChallenge { level: SecurityLevel },

    /// No key stored for the level
    #[error("Key not found: {level}")]
    KeyNotFound { level: SecurityLevel },

    /// Unknown level, or the operation is not defined for this level
    #[error("Invalid key level: {level}")]
    InvalidKeyLevel { level: String },

    /// Malformed key, salt or signature material
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Password is invalid")]
    PasswordInvalid,

    #[error("PIN is invalid")]
    PinInvalid,

    /// Password does not meet the format rules
    #[error("Password format invalid: {0}")]
    PasswordFormatInvalid(String),

    /// Password contains a well-known password
    #[error("Password contains a common password")]
    PasswordTooCommon,

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    Kdf(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] CoreError),
}

impl KeyManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KeyManagerError::MissingChallenge { .. } => ErrorCode::MissingChallenge,
            KeyManagerError::KeyNotFound { .. } => ErrorCode::KeyNotFound,
            KeyManagerError::InvalidKeyLevel { .. } => ErrorCode::InvalidKeyLevel,
            KeyManagerError::InvalidData(_) | KeyManagerError::Kdf(_) => ErrorCode::InvalidData,
            KeyManagerError::PasswordInvalid => ErrorCode::PasswordInvalid,
            KeyManagerError::PinInvalid => ErrorCode::PinInvalid,
            KeyManagerError::PasswordFormatInvalid(_) => ErrorCode::PasswordFormatInvalid,
            KeyManagerError::PasswordTooCommon => ErrorCode::PasswordTooCommon,
            KeyManagerError::Storage(e) => e.code(),
        }
    }

    /// The challenge-mismatch error for `level`.
    pub(crate) fn invalid_challenge(level: SecurityLevel) -> Self {
        match level {
            SecurityLevel::Pin => KeyManagerError::PinInvalid,
            _ => KeyManagerError::PasswordInvalid,
        }
    }
}

/// Result type for key manager operations.
pub type KeyManagerResult<T> = Result<T, KeyManagerError>;

/// Errors that can occur while decoding or resolving a DID.
#[derive(Debug, Error)]
pub enum DidError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("Unsupported DID method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid JWK: {0}")]
    InvalidJwk(String),

    /// A DID must only ever carry public key material
    #[error("JWK contains private key member '{0}'")]
    PrivateKeyMaterial(String),

    #[error("DID resolution failed: {0}")]
    Resolution(String),
}

impl DidError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidData
    }
}

pub type DidResult<T> = Result<T, DidError>;
