//! Fully-qualified usernames and their ledger hash.

use std::fmt;

use veritas_core::SdkConfig;
use veritas_crypto::password::normalize;
use veritas_crypto::sha256_hex;

/// A username qualified with account type and environment suffix, e.g.
/// `alice.person.test.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username {
    full: String,
}

impl Username {
    /// Normalizes `name` (NFKC) and qualifies it.
    pub fn new(name: &str, config: &SdkConfig) -> Self {
        Self {
            full: format!(
                "{}.{}{}",
                normalize(name),
                config.account_type,
                config.username_suffix
            ),
        }
    }

    /// Wraps an already qualified username.
    pub fn from_full(full: impl Into<String>) -> Self {
        Self { full: full.into() }
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    /// The part the user typed, or `None` if this username was not
    /// qualified under `config`.
    pub fn base(&self, config: &SdkConfig) -> Option<&str> {
        self.full
            .strip_suffix(config.username_suffix.as_str())?
            .strip_suffix(config.account_type.as_str())?
            .strip_suffix('.')
    }

    /// Hex SHA-256 of the qualified username; the ledger indexes accounts
    /// by this.
    pub fn hash(&self) -> String {
        sha256_hex(self.full.as_bytes())
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
