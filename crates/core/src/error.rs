//! Core error types and the stable error codes shared by every Veritas crate.
//!
//! Each crate keeps its own `thiserror` enum, but all of them map onto an
//! [`ErrorCode`] so that callers on the other side of an FFI or network
//! boundary can match on a string that never changes between releases.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Key manager
    MissingChallenge,
    KeyNotFound,
    InvalidKeyLevel,
    InvalidData,

    // Credentials and password policy
    PasswordFormatInvalid,
    PasswordTooCommon,
    PasswordInvalid,
    PinInvalid,

    // Identity lifecycle
    UsernameTaken,
    UsernameNotFound,
    AccountDoesntExist,
    InvalidStatus,

    // Transport
    CommunicationNotConnected,
    CommunicationTimeout,

    // Collaborators
    Storage,
    Ledger,
    Configuration,
}

impl ErrorCode {
    /// The code string. Never rename these, clients persist and compare them.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingChallenge => "MissingChallenge",
            ErrorCode::KeyNotFound => "KeyNotFound",
            ErrorCode::InvalidKeyLevel => "InvalidKeyLevel",
            ErrorCode::InvalidData => "InvalidData",
            ErrorCode::PasswordFormatInvalid => "PasswordFormatInvalid",
            ErrorCode::PasswordTooCommon => "PasswordTooCommon",
            ErrorCode::PasswordInvalid => "PasswordInvalid",
            ErrorCode::PinInvalid => "PinInvalid",
            ErrorCode::UsernameTaken => "UsernameTaken",
            ErrorCode::UsernameNotFound => "UsernameNotFound",
            ErrorCode::AccountDoesntExist => "AccountDoesntExist",
            ErrorCode::InvalidStatus => "InvalidStatus",
            ErrorCode::CommunicationNotConnected => "CommunicationNotConnected",
            ErrorCode::CommunicationTimeout => "CommunicationTimeout",
            ErrorCode::Storage => "Storage",
            ErrorCode::Ledger => "Ledger",
            ErrorCode::Configuration => "Configuration",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for Veritas
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Storage(_) | CoreError::Serialization(_) | CoreError::Io(_) => {
                ErrorCode::Storage
            }
            CoreError::Config(_) => ErrorCode::Configuration,
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
