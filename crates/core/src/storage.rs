//! Scoped key-value persistence.
//!
//! The SDK never talks to a concrete database. Hosts plug in a
//! [`KeyValueStore`] (browser storage, a keychain, SQLite...) and the
//! identity and key layers reach it only through typed, named fields.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};

/// Asynchronous key-value backend.
///
/// Implementations must make each `store` visible atomically: a concurrent
/// `retrieve` sees either the old value or the new one, never a mix.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn retrieve(&self, key: &str) -> Result<Option<Value>>;
    async fn store(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// Removes every entry.
    async fn clear(&self) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-process store. Used by tests and by short-lived sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn retrieve(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// A view of a backend restricted to keys under `scope`.
#[derive(Clone)]
pub struct ScopedStore {
    scope: String,
    backend: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore")
            .field("scope", &self.scope)
            .finish()
    }
}

impl ScopedStore {
    pub fn new(scope: impl Into<String>, backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            scope: scope.into(),
            backend,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}{}", self.scope, key)
    }

    pub async fn retrieve(&self, key: &str) -> Result<Option<Value>> {
        self.backend.retrieve(&self.scoped_key(key)).await
    }

    pub async fn store(&self, key: &str, value: Value) -> Result<()> {
        self.backend.store(&self.scoped_key(key), value).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(&self.scoped_key(key)).await
    }

    /// Removes only the entries belonging to this scope.
    pub async fn clear(&self) -> Result<()> {
        for key in self.backend.keys().await? {
            if key.starts_with(&self.scope) {
                self.backend.remove(&key).await?;
            }
        }
        Ok(())
    }

    /// Typed read of a persisted field.
    pub async fn get<F: StorageField, T: DeserializeOwned>(&self, field: F) -> Result<Option<T>> {
        match self.retrieve(field.key()).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed write of a persisted field.
    pub async fn set<F: StorageField, T: Serialize>(&self, field: F, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store(field.key(), value).await
    }

    pub async fn unset<F: StorageField>(&self, field: F) -> Result<()> {
        self.remove(field.key()).await
    }
}

/// A statically known persisted field.
pub trait StorageField: Copy {
    fn key(&self) -> &'static str;
}
