//! Ledger client interface.
//!
//! The identity core never talks to a chain directly. Everything it needs
//! from the ledger goes through [`LedgerClient`], and every transaction it
//! submits is authorized through a [`TransactionSigner`]. Wire formats, RPC
//! endpoints and contract names belong to implementations of these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veritas_core::ErrorCode;
use veritas_crypto::{
    KeyManager, KeyManagerError, KeyManagerResult, KeySignature, PublicKey, Salt, SecurityLevel,
    SignatureFormat,
};
use zeroize::Zeroizing;

/// Name of the action that creates an account in a transaction trace.
pub const NEW_ACCOUNT_ACTION: &str = "newaccount";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Username not found: {0}")]
    UsernameNotFound(String),

    /// Another account already registered this username hash
    #[error("Username hash already registered: {0}")]
    UsernameHashExists(String),

    /// The chain refused the transaction
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    /// Authorizing the transaction failed before it reached the chain
    #[error("Transaction signing failed: {0}")]
    Signer(#[source] KeyManagerError),

    #[error("Ledger transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::AccountNotFound(_) => ErrorCode::AccountDoesntExist,
            LedgerError::UsernameNotFound(_) => ErrorCode::UsernameNotFound,
            LedgerError::UsernameHashExists(_) => ErrorCode::UsernameTaken,
            LedgerError::Signer(e) => e.code(),
            LedgerError::Rejected(_) | LedgerError::Transport(_) => ErrorCode::Ledger,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Account status as recorded on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAccountStatus {
    Creating,
    Ready,
    Deactivated,
}

/// A person account as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    pub account_name: String,
    pub status: LedgerAccountStatus,
    pub username_hash: String,
    pub password_salt: Salt,
    pub version: u32,
}

/// One named permission of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub perm_name: String,
    pub parent: String,
    /// Required public keys in their canonical string form.
    pub required_keys: Vec<String>,
}

impl Permission {
    /// The key used for single-key comparisons.
    pub fn primary_key(&self) -> Option<&str> {
        self.required_keys.first().map(String::as_str)
    }
}

/// Finds a permission by name in a permission set.
pub fn find_permission<'a>(permissions: &'a [Permission], name: &str) -> Option<&'a Permission> {
    permissions.iter().find(|p| p.perm_name == name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub username_hash: String,
    pub password_key: PublicKey,
    pub password_salt: Salt,
}

/// Replaces the required key of one permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionUpdate {
    pub permission: String,
    pub parent: String,
    pub key: PublicKey,
}

impl PermissionUpdate {
    /// Update for the permission backing `level`. `None` for levels that
    /// have no ledger permission.
    pub fn for_level(level: SecurityLevel, key: PublicKey) -> Option<Self> {
        let permission = level.ledger_permission()?;
        let parent = match level {
            SecurityLevel::Password => "",
            SecurityLevel::Active => "owner",
            _ => "active",
        };
        Some(Self {
            permission: permission.to_string(),
            parent: parent.to_string(),
            key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTrace {
    pub action: String,
    /// Set by account-creating actions.
    pub new_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTrace {
    pub transaction_id: String,
    pub action_traces: Vec<ActionTrace>,
}

impl TransactionTrace {
    /// Account created by this transaction, if any.
    pub fn created_account(&self) -> Option<&str> {
        self.action_traces
            .iter()
            .filter(|trace| trace.action == NEW_ACCOUNT_ACTION)
            .find_map(|trace| trace.new_account.as_deref())
    }
}

/// Authorizes ledger transactions.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Signs a transaction digest.
    async fn sign(&self, digest: &[u8]) -> KeyManagerResult<KeySignature>;
}

/// Signs with whatever key a [`KeyManager`] holds at one level.
pub struct KeyManagerSigner {
    key_manager: Arc<dyn KeyManager>,
    level: SecurityLevel,
    challenge: Option<Zeroizing<String>>,
}

impl KeyManagerSigner {
    pub fn new(
        key_manager: Arc<dyn KeyManager>,
        level: SecurityLevel,
        challenge: Option<&str>,
    ) -> Self {
        Self {
            key_manager,
            level,
            challenge: challenge.map(|c| Zeroizing::new(c.to_string())),
        }
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }
}

impl std::fmt::Debug for KeyManagerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManagerSigner")
            .field("level", &self.level)
            .field("challenge", &self.challenge.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl TransactionSigner for KeyManagerSigner {
    async fn sign(&self, digest: &[u8]) -> KeyManagerResult<KeySignature> {
        self.key_manager
            .sign_data(
                self.level,
                digest,
                self.challenge.as_deref().map(String::as_str),
                SignatureFormat::Structured,
            )
            .await?
            .into_structured()
    }
}

/// What the identity core needs from the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fails with [`LedgerError::AccountNotFound`] for unknown names.
    async fn get_account_by_name(&self, account_name: &str) -> LedgerResult<LedgerAccount>;

    /// Fails with [`LedgerError::UsernameNotFound`] for unknown hashes.
    async fn get_account_by_username_hash(&self, username_hash: &str)
        -> LedgerResult<LedgerAccount>;

    async fn get_permissions(&self, account_name: &str) -> LedgerResult<Vec<Permission>>;

    /// Creates a person account whose `owner` and `active` permissions are
    /// both set to the password key.
    async fn create_account(&self, request: CreateAccountRequest) -> LedgerResult<TransactionTrace>;

    /// Applies every update in one transaction, authorized by `signer`.
    async fn update_permissions(
        &self,
        account_name: &str,
        updates: Vec<PermissionUpdate>,
        signer: &dyn TransactionSigner,
    ) -> LedgerResult<TransactionTrace>;

    async fn get_chain_id(&self) -> LedgerResult<String>;
}
