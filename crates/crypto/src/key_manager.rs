//! Multi-level key custody.
//!
//! The key manager is the only component that touches raw private keys.
//! Everything else signs through it by naming a [`SecurityLevel`] and, for
//! challenge-protected levels, re-presenting the challenge (password or PIN).
//!
//! # Invariants
//!
//! - At most one [`KeyEntry`] per level; storing a key replaces the old one.
//! - `salt` and `hashed_salted_challenge` are present exactly when the level
//!   is challenge-protected.
//! - Each entry is written as a single storage value, so readers observe
//!   either the previous entry or the new one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use veritas_core::{KeyValueStore, ScopedStore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyManagerError, KeyManagerResult};
use crate::keys::{sha256, KeySignature, PrivateKey, PublicKey, Salt};
use crate::level::SecurityLevel;
use crate::password::{self, KdfParams};

/// Storage scope for key entries.
pub const KEY_STORE_SCOPE: &str = "veritas.keys.";

/// How `sign_data` should encode its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureFormat {
    /// ES256 compact signature for a JWT (base64url `r || s`).
    Jwt,
    /// ECDSA signature over the SHA-256 digest of the data.
    #[default]
    Structured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSignature {
    Jwt(String),
    Structured(KeySignature),
}

impl DataSignature {
    pub fn into_jwt(self) -> KeyManagerResult<String> {
        match self {
            DataSignature::Jwt(signature) => Ok(signature),
            DataSignature::Structured(_) => Err(KeyManagerError::InvalidData(
                "expected a JWT signature".into(),
            )),
        }
    }

    pub fn into_structured(self) -> KeyManagerResult<KeySignature> {
        match self {
            DataSignature::Structured(signature) => Ok(signature),
            DataSignature::Jwt(_) => Err(KeyManagerError::InvalidData(
                "expected a structured signature".into(),
            )),
        }
    }
}

/// A persisted key for one level.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    pub private_key: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_salted_challenge: Option<String>,
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("public_key", &self.public_key)
            .field("challenge_protected", &self.salt.is_some())
            .finish_non_exhaustive()
    }
}

impl KeyEntry {
    fn private_key(&self) -> KeyManagerResult<PrivateKey> {
        PrivateKey::from_hex(&self.private_key)
    }

    fn public_key(&self) -> KeyManagerResult<PublicKey> {
        self.public_key.parse()
    }

    /// Checks `challenge` against the stored hash.
    fn challenge_matches(&self, level: SecurityLevel, challenge: &str) -> KeyManagerResult<bool> {
        let (Some(salt), Some(expected)) = (&self.salt, &self.hashed_salted_challenge) else {
            return Err(KeyManagerError::InvalidData(format!(
                "entry for {} has no challenge hash",
                level
            )));
        };
        let salt: Salt = salt.parse()?;
        let actual = password::hash_challenge(challenge, &salt);
        Ok(password::constant_time_eq(&actual, expected))
    }
}

/// Key custody interface.
///
/// `StorageKeyManager` is the provided implementation; platform keystores
/// (secure enclave, Android keystore) plug in here.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Stores `private_key` at `level`, replacing any previous key.
    /// Challenge-protected levels require `challenge`.
    async fn store_key(
        &self,
        level: SecurityLevel,
        private_key: &PrivateKey,
        challenge: Option<&str>,
    ) -> KeyManagerResult<PublicKey>;

    async fn sign_data(
        &self,
        level: SecurityLevel,
        data: &[u8],
        challenge: Option<&str>,
        format: SignatureFormat,
    ) -> KeyManagerResult<DataSignature>;

    /// Fails with `KeyNotFound` when nothing is stored at `level`.
    async fn get_key(&self, level: SecurityLevel) -> KeyManagerResult<PublicKey>;

    /// Idempotent.
    async fn remove_key(&self, level: SecurityLevel) -> KeyManagerResult<()>;

    /// Only defined for challenge-protected levels.
    async fn check_key(&self, level: SecurityLevel, challenge: &str) -> KeyManagerResult<bool>;

    /// Deterministic in `(password, salt)`. A fresh salt is generated when
    /// none is given and returned alongside the key.
    async fn generate_private_key_from_password(
        &self,
        password: &str,
        salt: Option<Salt>,
    ) -> KeyManagerResult<(PrivateKey, Salt)>;

    fn generate_random_private_key(&self) -> PrivateKey {
        PrivateKey::random()
    }

    /// Like `get_key`, but an absent key is `None` instead of an error.
    async fn find_key(&self, level: SecurityLevel) -> KeyManagerResult<Option<PublicKey>> {
        match self.get_key(level).await {
            Ok(key) => Ok(Some(key)),
            Err(KeyManagerError::KeyNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Key manager persisting entries in a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct StorageKeyManager {
    store: ScopedStore,
    kdf_params: KdfParams,
}

impl StorageKeyManager {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store: ScopedStore::new(KEY_STORE_SCOPE, backend),
            kdf_params: KdfParams::PRODUCTION,
        }
    }

    /// Overrides the KDF cost. Only for test suites: keys derived with
    /// anything but [`KdfParams::PRODUCTION`] cannot log in elsewhere.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.kdf_params
    }

    async fn load_entry(&self, level: SecurityLevel) -> KeyManagerResult<KeyEntry> {
        let value = self
            .store
            .retrieve(level.name())
            .await?
            .ok_or(KeyManagerError::KeyNotFound { level })?;
        serde_json::from_value(value)
            .map_err(|e| KeyManagerError::InvalidData(format!("corrupt key entry: {}", e)))
    }

    /// Validates the challenge for protected levels, ignores it otherwise.
    fn authorize(
        entry: &KeyEntry,
        level: SecurityLevel,
        challenge: Option<&str>,
    ) -> KeyManagerResult<()> {
        if !level.is_challenge_protected() {
            return Ok(());
        }
        let challenge = challenge.ok_or(KeyManagerError::MissingChallenge { level })?;
        if entry.challenge_matches(level, challenge)? {
            Ok(())
        } else {
            Err(KeyManagerError::invalid_challenge(level))
        }
    }
}

#[async_trait]
impl KeyManager for StorageKeyManager {
    async fn store_key(
        &self,
        level: SecurityLevel,
        private_key: &PrivateKey,
        challenge: Option<&str>,
    ) -> KeyManagerResult<PublicKey> {
        let public_key = private_key.public_key();

        let (salt, hashed_salted_challenge) = if level.is_challenge_protected() {
            let challenge = challenge.ok_or(KeyManagerError::MissingChallenge { level })?;
            let salt = Salt::random();
            let hash = password::hash_challenge(challenge, &salt);
            (Some(salt.to_hex()), Some(hash))
        } else {
            (None, None)
        };

        let entry = KeyEntry {
            private_key: private_key.to_hex().to_string(),
            public_key: public_key.to_string(),
            salt,
            hashed_salted_challenge,
        };
        let value = serde_json::to_value(&entry)
            .map_err(|e| KeyManagerError::InvalidData(e.to_string()))?;
        self.store.store(level.name(), value).await?;

        info!(%level, public_key = %public_key, "stored key");
        Ok(public_key)
    }

    async fn sign_data(
        &self,
        level: SecurityLevel,
        data: &[u8],
        challenge: Option<&str>,
        format: SignatureFormat,
    ) -> KeyManagerResult<DataSignature> {
        let entry = self.load_entry(level).await?;
        Self::authorize(&entry, level, challenge)?;
        let private_key = entry.private_key()?;

        let signature = match format {
            SignatureFormat::Jwt => DataSignature::Jwt(private_key.sign_jwt(data)),
            SignatureFormat::Structured => {
                DataSignature::Structured(private_key.sign_digest(&sha256(data))?)
            }
        };
        debug!(%level, ?format, "signed data");
        Ok(signature)
    }

    async fn get_key(&self, level: SecurityLevel) -> KeyManagerResult<PublicKey> {
        self.load_entry(level).await?.public_key()
    }

    async fn remove_key(&self, level: SecurityLevel) -> KeyManagerResult<()> {
        self.store.remove(level.name()).await?;
        debug!(%level, "removed key");
        Ok(())
    }

    async fn check_key(&self, level: SecurityLevel, challenge: &str) -> KeyManagerResult<bool> {
        if !level.is_challenge_protected() {
            return Err(KeyManagerError::InvalidKeyLevel {
                level: level.to_string(),
            });
        }
        let entry = self.load_entry(level).await?;
        entry.challenge_matches(level, challenge)
    }

    async fn generate_private_key_from_password(
        &self,
        password: &str,
        salt: Option<Salt>,
    ) -> KeyManagerResult<(PrivateKey, Salt)> {
        let salt = salt.unwrap_or_else(Salt::random);
        let params = self.kdf_params;
        let password = zeroize::Zeroizing::new(password.to_string());

        let private_key = tokio::task::spawn_blocking(move || {
            password::derive_private_key(&password, &salt, &params)
        })
        .await
        .map_err(|e| KeyManagerError::Kdf(format!("KDF task failed: {}", e)))??;

        Ok((private_key, salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::MemoryStore;

    fn manager() -> StorageKeyManager {
        StorageKeyManager::new(Arc::new(MemoryStore::new()))
            .with_kdf_params(KdfParams::INSECURE_TESTING)
    }

    #[tokio::test]
    async fn test_store_then_get_returns_public_key() {
        let km = manager();
        for level in SecurityLevel::ALL {
            let key = km.generate_random_private_key();
            let challenge = level.is_challenge_protected().then_some("secret");
            let stored = km.store_key(level, &key, challenge).await.unwrap();
            assert_eq!(stored, key.public_key());
            assert_eq!(km.get_key(level).await.unwrap(), key.public_key());
        }
    }

    #[tokio::test]
    async fn test_remove_then_get_fails_for_every_level() {
        let km = manager();
        km.store_key(SecurityLevel::Local, &PrivateKey::random(), None)
            .await
            .unwrap();

        for level in SecurityLevel::ALL {
            km.remove_key(level).await.unwrap();
            assert!(matches!(
                km.get_key(level).await,
                Err(KeyManagerError::KeyNotFound { level: l }) if l == level
            ));
        }
    }

    #[tokio::test]
    async fn test_store_supersedes_previous_key() {
        let km = manager();
        let first = PrivateKey::random();
        let second = PrivateKey::random();
        km.store_key(SecurityLevel::Biometric, &first, None)
            .await
            .unwrap();
        km.store_key(SecurityLevel::Biometric, &second, None)
            .await
            .unwrap();
        assert_eq!(
            km.get_key(SecurityLevel::Biometric).await.unwrap(),
            second.public_key()
        );
    }

    #[tokio::test]
    async fn test_missing_challenge() {
        let km = manager();
        let result = km
            .store_key(SecurityLevel::Pin, &PrivateKey::random(), None)
            .await;
        assert!(matches!(
            result,
            Err(KeyManagerError::MissingChallenge { .. })
        ));

        km.store_key(SecurityLevel::Pin, &PrivateKey::random(), Some("1234"))
            .await
            .unwrap();
        let result = km
            .sign_data(SecurityLevel::Pin, b"data", None, SignatureFormat::Structured)
            .await;
        assert!(matches!(
            result,
            Err(KeyManagerError::MissingChallenge { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_challenge_gives_level_specific_error() {
        let km = manager();
        km.store_key(SecurityLevel::Pin, &PrivateKey::random(), Some("c1"))
            .await
            .unwrap();
        km.store_key(SecurityLevel::Password, &PrivateKey::random(), Some("c1"))
            .await
            .unwrap();

        let pin = km
            .sign_data(SecurityLevel::Pin, b"data", Some("c2"), SignatureFormat::Jwt)
            .await;
        assert!(matches!(pin, Err(KeyManagerError::PinInvalid)));

        let password = km
            .sign_data(
                SecurityLevel::Password,
                b"data",
                Some("c2"),
                SignatureFormat::Jwt,
            )
            .await;
        assert!(matches!(password, Err(KeyManagerError::PasswordInvalid)));

        assert!(km
            .sign_data(SecurityLevel::Pin, b"data", Some("c1"), SignatureFormat::Jwt)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_structured_signature_verifies() {
        let km = manager();
        let key = PrivateKey::random();
        km.store_key(SecurityLevel::Local, &key, None).await.unwrap();

        let signature = km
            .sign_data(
                SecurityLevel::Local,
                b"payload",
                None,
                SignatureFormat::Structured,
            )
            .await
            .unwrap()
            .into_structured()
            .unwrap();
        assert!(signature.verify(&key.public_key(), b"payload"));
    }

    #[tokio::test]
    async fn test_jwt_signature_verifies() {
        let km = manager();
        let key = PrivateKey::random();
        km.store_key(SecurityLevel::Local, &key, None).await.unwrap();

        let signature = km
            .sign_data(SecurityLevel::Local, b"a.b", None, SignatureFormat::Jwt)
            .await
            .unwrap()
            .into_jwt()
            .unwrap();
        assert!(key.public_key().verify_jwt(b"a.b", &signature));
    }

    #[tokio::test]
    async fn test_sign_without_key() {
        let km = manager();
        let result = km
            .sign_data(SecurityLevel::Local, b"x", None, SignatureFormat::Jwt)
            .await;
        assert!(matches!(result, Err(KeyManagerError::KeyNotFound { .. })));
    }

    #[tokio::test]
    async fn test_check_key() {
        let km = manager();
        km.store_key(SecurityLevel::Password, &PrivateKey::random(), Some("right"))
            .await
            .unwrap();
        assert!(km.check_key(SecurityLevel::Password, "right").await.unwrap());
        assert!(!km.check_key(SecurityLevel::Password, "wrong").await.unwrap());

        km.store_key(SecurityLevel::Local, &PrivateKey::random(), None)
            .await
            .unwrap();
        assert!(matches!(
            km.check_key(SecurityLevel::Local, "anything").await,
            Err(KeyManagerError::InvalidKeyLevel { .. })
        ));
    }

    #[tokio::test]
    async fn test_entry_shape_follows_level() {
        let backend = Arc::new(MemoryStore::new());
        let km = StorageKeyManager::new(backend.clone());
        km.store_key(SecurityLevel::Pin, &PrivateKey::random(), Some("1234"))
            .await
            .unwrap();
        km.store_key(SecurityLevel::Local, &PrivateKey::random(), None)
            .await
            .unwrap();

        let pin = backend.retrieve("veritas.keys.PIN").await.unwrap().unwrap();
        assert!(pin.get("salt").is_some());
        assert!(pin.get("hashedSaltedChallenge").is_some());

        let local = backend.retrieve("veritas.keys.LOCAL").await.unwrap().unwrap();
        assert!(local.get("salt").is_none());
        assert!(local.get("hashedSaltedChallenge").is_none());
    }

    #[tokio::test]
    async fn test_password_key_is_deterministic() {
        let km = manager();
        let (first, salt) = km
            .generate_private_key_from_password("Str0ngPassphrase!", None)
            .await
            .unwrap();
        let (second, same_salt) = km
            .generate_private_key_from_password("Str0ngPassphrase!", Some(salt))
            .await
            .unwrap();
        assert_eq!(salt, same_salt);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_find_key_maps_absent_to_none() {
        let km = manager();
        assert_eq!(km.find_key(SecurityLevel::Pin).await.unwrap(), None);
    }
}
