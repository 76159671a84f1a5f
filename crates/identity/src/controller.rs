//! Identity lifecycle controller.
//!
//! # State Transitions
//!
//! ```text
//! (none)
//!     ↓ (create_person)
//! CreatingAccount
//!     ↓ (update_keys)
//! Ready ──(login)──→ LoggingIn ──(DID derived)──→ Ready
//!     ↓ (logout)
//! (none)
//! ```
//!
//! `Deactivated` is only ever reported by the ledger and blocks key updates.
//!
//! # Key Consistency
//!
//! The ledger is the authority on which keys control an account. A device
//! stays usable only while every key it holds matches the ledger permission
//! backing it, see [`IdentityController::check_keys_still_valid`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use veritas_core::{KeyValueStore, SdkConfig, ScopedStore};
use veritas_crypto::{
    validate_password, KeyManager, KeyManagerError, PrivateKey, PublicKey, Salt, SecurityLevel,
};

use crate::communication::Communication;
use crate::credential::{Credential, Issuer, KeyManagerJwtSigner};
use crate::error::{IdentityError, IdentityResult, KeyMismatch};
use crate::ledger::{
    find_permission, CreateAccountRequest, KeyManagerSigner, LedgerAccount, LedgerAccountStatus,
    LedgerClient, LedgerError, Permission, PermissionUpdate,
};
use crate::resolver::AntelopeDid;
use crate::types::{AccountStatus, IdentityField, IdentityRecord, IDENTITY_STORE_SCOPE};
use crate::username::Username;

/// Local levels and the ledger permission each must match, in the order
/// they are checked.
pub const KEY_CONSISTENCY_PAIRS: [(SecurityLevel, &str); 5] = [
    (SecurityLevel::Pin, "pin"),
    (SecurityLevel::Biometric, "biometric"),
    (SecurityLevel::Local, "local"),
    (SecurityLevel::Password, "active"),
    (SecurityLevel::Password, "owner"),
];

/// Levels pushed to the ledger by `update_keys` when present locally.
const DEVICE_LEVELS: [SecurityLevel; 3] = [
    SecurityLevel::Pin,
    SecurityLevel::Biometric,
    SecurityLevel::Local,
];

/// Type tag of the credential used to log in to the relay.
pub const RELAY_LOGIN_TYPE: &str = "RelayLogin";

/// Drives one person's identity through its lifecycle.
pub struct IdentityController {
    config: SdkConfig,
    key_manager: Arc<dyn KeyManager>,
    ledger: Arc<dyn LedgerClient>,
    storage: ScopedStore,
    communication: Communication,
    chain_id: OnceCell<String>,
}

impl IdentityController {
    pub fn new(
        config: SdkConfig,
        key_manager: Arc<dyn KeyManager>,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn KeyValueStore>,
        communication: Communication,
    ) -> Self {
        Self {
            config,
            key_manager,
            ledger,
            storage: ScopedStore::new(IDENTITY_STORE_SCOPE, store),
            communication,
            chain_id: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn key_manager(&self) -> &Arc<dyn KeyManager> {
        &self.key_manager
    }

    pub fn communication(&self) -> &Communication {
        &self.communication
    }

    pub async fn status(&self) -> IdentityResult<Option<AccountStatus>> {
        Ok(self.storage.get(IdentityField::Status).await?)
    }

    pub async fn account_name(&self) -> IdentityResult<Option<String>> {
        Ok(self.storage.get(IdentityField::AccountName).await?)
    }

    pub async fn username(&self) -> IdentityResult<Option<Username>> {
        let full: Option<String> = self.storage.get(IdentityField::Username).await?;
        Ok(full.map(Username::from_full))
    }

    pub async fn did(&self) -> IdentityResult<Option<String>> {
        Ok(self.storage.get(IdentityField::Did).await?)
    }

    /// The whole persisted record.
    pub async fn record(&self) -> IdentityResult<IdentityRecord> {
        Ok(IdentityRecord {
            status: self.status().await?,
            account_name: self.account_name().await?,
            username: self.storage.get(IdentityField::Username).await?,
            password_salt: self.storage.get(IdentityField::PasswordSalt).await?,
            did: self.did().await?,
        })
    }

    pub async fn is_logged_in(&self) -> IdentityResult<bool> {
        Ok(self.status().await? == Some(AccountStatus::Ready))
    }

    /// Reserves nothing on chain; only checks that the qualified username is
    /// free and remembers it.
    pub async fn save_username(&self, name: &str) -> IdentityResult<Username> {
        let username = Username::new(name, &self.config);

        match self
            .ledger
            .get_account_by_username_hash(&username.hash())
            .await
        {
            Ok(_) => {
                return Err(IdentityError::UsernameTaken {
                    username: username.full().to_string(),
                })
            }
            Err(LedgerError::UsernameNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.storage
            .set(IdentityField::Username, &username.full())
            .await?;
        debug!(username = %username, "username saved");
        Ok(username)
    }

    /// Derives the password key and stores it at `PASSWORD` with the
    /// password as its challenge. A new salt is generated unless given.
    pub async fn save_password(
        &self,
        password: &str,
        salt: Option<Salt>,
    ) -> IdentityResult<PublicKey> {
        validate_password(password)?;

        let (private_key, salt) = self
            .key_manager
            .generate_private_key_from_password(password, salt)
            .await?;
        let public_key = self
            .key_manager
            .store_key(SecurityLevel::Password, &private_key, Some(password))
            .await?;
        self.storage.set(IdentityField::PasswordSalt, &salt).await?;

        debug!(public_key = %public_key, "password key saved");
        Ok(public_key)
    }

    pub async fn save_pin(&self, pin: &str) -> IdentityResult<PublicKey> {
        if pin.is_empty() {
            return Err(IdentityError::InvalidData("PIN must not be empty".into()));
        }
        self.save_random_key(SecurityLevel::Pin, Some(pin)).await
    }

    pub async fn save_biometric(&self) -> IdentityResult<PublicKey> {
        self.save_random_key(SecurityLevel::Biometric, None).await
    }

    pub async fn save_local(&self) -> IdentityResult<PublicKey> {
        self.save_random_key(SecurityLevel::Local, None).await
    }

    async fn save_random_key(
        &self,
        level: SecurityLevel,
        challenge: Option<&str>,
    ) -> IdentityResult<PublicKey> {
        let private_key: PrivateKey = self.key_manager.generate_random_private_key();
        let public_key = self
            .key_manager
            .store_key(level, &private_key, challenge)
            .await?;
        debug!(%level, public_key = %public_key, "device key saved");
        Ok(public_key)
    }

    /// Creates the account on chain from the saved username and password
    /// key. Returns the new account name.
    pub async fn create_person(&self) -> IdentityResult<String> {
        let username = self
            .username()
            .await?
            .ok_or_else(|| IdentityError::InvalidData("no username saved".into()))?;
        let password_key = self.key_manager.get_key(SecurityLevel::Password).await?;
        let password_salt: Salt = self
            .storage
            .get(IdentityField::PasswordSalt)
            .await?
            .ok_or_else(|| IdentityError::InvalidData("no password salt saved".into()))?;

        let request = CreateAccountRequest {
            username_hash: username.hash(),
            password_key,
            password_salt,
        };
        let trace = self
            .ledger
            .create_account(request)
            .await
            .map_err(|e| match e {
                LedgerError::UsernameHashExists(_) => IdentityError::UsernameTaken {
                    username: username.full().to_string(),
                },
                other => other.into(),
            })?;

        let account_name = trace
            .created_account()
            .ok_or_else(|| {
                IdentityError::InvalidData(format!(
                    "transaction {} created no account",
                    trace.transaction_id
                ))
            })?
            .to_string();

        self.storage
            .set(IdentityField::AccountName, &account_name)
            .await?;
        self.set_status(AccountStatus::CreatingAccount).await?;
        let did = self.create_did().await?;

        info!(account = %account_name, %did, "person account created");
        Ok(account_name)
    }

    /// Pushes every device key present locally to the ledger in one
    /// transaction authorized by the password key.
    pub async fn update_keys(&self, password: &str) -> IdentityResult<()> {
        let status = self.status().await?;
        if status == Some(AccountStatus::Deactivated) {
            return Err(IdentityError::InvalidStatus {
                operation: "update_keys",
                status,
            });
        }
        let account_name = self.require_account_name().await?;

        let mut updates = Vec::new();
        for level in DEVICE_LEVELS {
            if let Some(key) = self.key_manager.find_key(level).await? {
                updates.extend(PermissionUpdate::for_level(level, key));
            }
        }

        let signer = KeyManagerSigner::new(
            self.key_manager.clone(),
            SecurityLevel::Password,
            Some(password),
        );
        let permissions: Vec<&str> = updates.iter().map(|u| u.permission.as_str()).collect();
        debug!(account = %account_name, ?permissions, "updating keys");
        self.ledger
            .update_permissions(&account_name, updates, &signer)
            .await?;

        self.set_status(AccountStatus::Ready).await?;
        info!(account = %account_name, "keys updated");
        Ok(())
    }

    /// Re-derives the password key from the ledger's salt and checks it
    /// against the account's `owner` key.
    pub async fn check_password(&self, password: &str) -> IdentityResult<bool> {
        let account_name = self.require_account_name().await?;
        let account = self.ledger.get_account_by_name(&account_name).await?;
        self.verify_password(&account, password).await?;
        Ok(true)
    }

    /// Logs in to an existing account on this device. An account the ledger
    /// reports as deactivated is recorded as `DEACTIVATED` and refused.
    pub async fn login(&self, name: &str, password: &str) -> IdentityResult<LedgerAccount> {
        let username = Username::new(name, &self.config);
        let account = self
            .ledger
            .get_account_by_username_hash(&username.hash())
            .await?;
        self.verify_password(&account, password).await?;

        self.storage
            .set(IdentityField::AccountName, &account.account_name)
            .await?;
        self.storage
            .set(IdentityField::Username, &username.full())
            .await?;
        self.storage
            .set(IdentityField::PasswordSalt, &account.password_salt)
            .await?;
        self.set_status(AccountStatus::LoggingIn).await?;

        self.create_did().await?;
        if account.status == LedgerAccountStatus::Deactivated {
            self.set_status(AccountStatus::Deactivated).await?;
            warn!(account = %account.account_name, "account is deactivated on the ledger");
            return Err(IdentityError::InvalidStatus {
                operation: "login",
                status: Some(AccountStatus::Deactivated),
            });
        }
        self.set_status(AccountStatus::Ready).await?;

        info!(account = %account.account_name, username = %username, "logged in");
        Ok(account)
    }

    /// Stores the password key derived from the account's salt, then fails
    /// with `PasswordInvalid` unless it is the account's `owner` key.
    async fn verify_password(&self, account: &LedgerAccount, password: &str) -> IdentityResult<()> {
        let (private_key, _) = self
            .key_manager
            .generate_private_key_from_password(password, Some(account.password_salt))
            .await?;
        let public_key = self
            .key_manager
            .store_key(SecurityLevel::Password, &private_key, Some(password))
            .await?;

        let permissions = self.ledger.get_permissions(&account.account_name).await?;
        let owner_key = find_permission(&permissions, "owner").and_then(Permission::primary_key);
        if owner_key != Some(public_key.to_string().as_str()) {
            warn!(account = %account.account_name, "password does not match owner key");
            return Err(KeyManagerError::PasswordInvalid.into());
        }
        Ok(())
    }

    /// Checks every local key against the ledger permission backing it.
    ///
    /// Pairs are checked in [`KEY_CONSISTENCY_PAIRS`] order and the first
    /// disagreement is returned as `KeyNotFound`. A pair with no key on
    /// either side passes.
    pub async fn check_keys_still_valid(&self) -> IdentityResult<bool> {
        match self.status().await? {
            Some(AccountStatus::Ready) => {}
            None => {
                return Err(IdentityError::AccountDoesntExist(
                    "no identity stored".into(),
                ))
            }
            status => {
                return Err(IdentityError::InvalidStatus {
                    operation: "check_keys_still_valid",
                    status,
                })
            }
        }
        let account_name = self.require_account_name().await?;
        let permissions = self.ledger.get_permissions(&account_name).await?;

        for (level, permission) in KEY_CONSISTENCY_PAIRS {
            let local = self.key_manager.find_key(level).await?;
            let on_chain = find_permission(&permissions, permission).and_then(Permission::primary_key);

            let mismatch = match (&local, on_chain) {
                (None, None) => None,
                (None, Some(_)) => Some(KeyMismatch::FoundOnChainNotLocally),
                (Some(_), None) => Some(KeyMismatch::FoundLocallyNotOnChain),
                (Some(local), Some(on_chain)) if local.to_string() != on_chain => {
                    Some(KeyMismatch::KeysDoNotMatch)
                }
                (Some(_), Some(_)) => None,
            };
            if let Some(reason) = mismatch {
                warn!(account = %account_name, %level, permission, %reason, "key check failed");
                return Err(IdentityError::KeyNotFound {
                    level,
                    permission,
                    reason,
                });
            }
        }

        debug!(account = %account_name, "keys consistent with ledger");
        Ok(true)
    }

    /// Removes every key and the identity record, and leaves the relay.
    pub async fn logout(&self) -> IdentityResult<()> {
        for level in SecurityLevel::ALL {
            self.key_manager.remove_key(level).await?;
        }
        self.storage.clear().await?;
        self.communication.disconnect().await;
        info!("logged out");
        Ok(())
    }

    /// `did:antelope:<chainId>:<accountName>`. The chain id is fetched once.
    pub async fn create_did(&self) -> IdentityResult<String> {
        let account_name = self.require_account_name().await?;
        let chain_id = self
            .chain_id
            .get_or_try_init(|| self.ledger.get_chain_id())
            .await?;

        let did = AntelopeDid::new(chain_id.as_str(), account_name).did();
        self.storage.set(IdentityField::Did, &did).await?;
        Ok(did)
    }

    /// Issuer signing with the `LOCAL` key under the user's DID.
    pub async fn issuer(&self) -> IdentityResult<Issuer> {
        let did = self
            .did()
            .await?
            .ok_or_else(|| IdentityError::AccountDoesntExist("no DID stored".into()))?;
        self.key_manager.get_key(SecurityLevel::Local).await?;
        let signer = KeyManagerJwtSigner::new(self.key_manager.clone(), SecurityLevel::Local, None);
        Ok(Issuer::new(did, Arc::new(signer)))
    }

    pub async fn sign_message<T: Serialize>(
        &self,
        payload: &T,
        recipient: Option<&str>,
        message_type: Option<&str>,
    ) -> IdentityResult<Credential> {
        let issuer = self.issuer().await?;
        Credential::sign(payload, &issuer, recipient, message_type).await
    }

    /// Authenticates the relay connection as this user.
    pub async fn login_to_relay(&self) -> IdentityResult<()> {
        let credential = self
            .sign_message(&serde_json::json!({}), None, Some(RELAY_LOGIN_TYPE))
            .await?;
        self.communication.login(&credential).await?;
        Ok(())
    }

    /// Restores a persisted identity at startup. Only a `Ready` identity
    /// whose keys still match the ledger is usable.
    pub async fn initialize_from_storage(&self) -> IdentityResult<()> {
        match self.status().await? {
            None => Err(IdentityError::AccountDoesntExist(
                "no identity stored".into(),
            )),
            Some(AccountStatus::Ready) => {
                self.check_keys_still_valid().await?;
                debug!("identity restored from storage");
                Ok(())
            }
            status => Err(IdentityError::InvalidStatus {
                operation: "initialize_from_storage",
                status,
            }),
        }
    }

    async fn set_status(&self, status: AccountStatus) -> IdentityResult<()> {
        self.storage.set(IdentityField::Status, &status).await?;
        debug!(%status, "status changed");
        Ok(())
    }

    async fn require_account_name(&self) -> IdentityResult<String> {
        self.account_name()
            .await?
            .ok_or_else(|| IdentityError::AccountDoesntExist("no account name stored".into()))
    }
}
