//! DID resolution for credential verification.
//!
//! Two methods are supported:
//!
//! - `did:antelope:<chainId>:<account>` is anchored on the ledger. Its
//!   document is built from the account's current permission set.
//! - `did:jwk:<base64url JWK>` is self-certifying and resolves offline.
//!
//! The set of strategies is closed. A verifier tries all of them and takes
//! the first one that works.

use std::sync::Arc;

use tracing::debug;
use veritas_crypto::{
    resolve_did_jwk, DidDocument, DidError, DidResult, Jwk, PublicKey, VerificationMethod,
};

use crate::ledger::{LedgerClient, LedgerError};

pub const DID_ANTELOPE_PREFIX: &str = "did:antelope:";

const JSON_WEB_KEY_2020: &str = "JsonWebKey2020";

/// A parsed `did:antelope` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntelopeDid {
    pub chain_id: String,
    pub account_name: String,
}

impl AntelopeDid {
    pub fn new(chain_id: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            account_name: account_name.into(),
        }
    }

    /// DID string without fragment.
    pub fn did(&self) -> String {
        format!("{}{}:{}", DID_ANTELOPE_PREFIX, self.chain_id, self.account_name)
    }
}

impl std::fmt::Display for AntelopeDid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.did())
    }
}

/// Parses `did:antelope:<chainId>:<account>`, ignoring any fragment, query
/// or path.
pub fn parse_antelope_did(did: &str) -> DidResult<AntelopeDid> {
    let rest = did
        .strip_prefix(DID_ANTELOPE_PREFIX)
        .ok_or_else(|| DidError::UnsupportedMethod(did.to_string()))?;
    let rest = rest.split(['#', '/', '?']).next().unwrap_or_default();

    let (chain_id, account_name) = rest
        .split_once(':')
        .ok_or_else(|| DidError::InvalidDid(did.to_string()))?;
    if chain_id.is_empty()
        || account_name.is_empty()
        || account_name.contains(':')
        || !chain_id.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(DidError::InvalidDid(did.to_string()));
    }
    Ok(AntelopeDid::new(chain_id, account_name))
}

/// Resolution strategies, tried concurrently by a verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// `did:antelope`, resolved through the ledger
    ChainAnchored,
    /// `did:jwk`, resolved by decoding the DID
    SelfCertifying,
}

impl ResolutionStrategy {
    pub const ALL: [ResolutionStrategy; 2] = [
        ResolutionStrategy::ChainAnchored,
        ResolutionStrategy::SelfCertifying,
    ];
}

/// Resolves issuer DIDs into documents.
#[derive(Clone)]
pub struct DidResolver {
    ledger: Option<Arc<dyn LedgerClient>>,
}

impl DidResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger: Some(ledger),
        }
    }

    /// A resolver with no ledger. `did:antelope` never resolves.
    pub fn self_certifying_only() -> Self {
        Self { ledger: None }
    }

    pub async fn resolve_with(
        &self,
        strategy: ResolutionStrategy,
        did: &str,
    ) -> DidResult<DidDocument> {
        match strategy {
            ResolutionStrategy::SelfCertifying => resolve_did_jwk(did),
            ResolutionStrategy::ChainAnchored => self.resolve_antelope(did).await,
        }
    }

    /// Resolves with the strategy matching the DID method.
    pub async fn resolve(&self, did: &str) -> DidResult<DidDocument> {
        if did.starts_with(DID_ANTELOPE_PREFIX) {
            self.resolve_with(ResolutionStrategy::ChainAnchored, did).await
        } else {
            self.resolve_with(ResolutionStrategy::SelfCertifying, did).await
        }
    }

    async fn resolve_antelope(&self, did: &str) -> DidResult<DidDocument> {
        let parsed = parse_antelope_did(did)?;
        let ledger = self
            .ledger
            .as_ref()
            .ok_or_else(|| DidError::Resolution("no ledger client configured".into()))?;

        let chain_id = ledger.get_chain_id().await.map_err(resolution_error)?;
        if chain_id != parsed.chain_id {
            return Err(DidError::Resolution(format!(
                "DID is for chain {}, ledger is {}",
                parsed.chain_id, chain_id
            )));
        }

        let permissions = ledger
            .get_permissions(&parsed.account_name)
            .await
            .map_err(resolution_error)?;

        let id = parsed.did();
        let mut methods = Vec::new();
        for permission in &permissions {
            for key in &permission.required_keys {
                let Ok(public_key) = key.parse::<PublicKey>() else {
                    debug!(did = %id, permission = %permission.perm_name, "skipping undecodable key");
                    continue;
                };
                methods.push(VerificationMethod {
                    id: format!("{}#{}", id, permission.perm_name),
                    method_type: JSON_WEB_KEY_2020.to_string(),
                    controller: id.clone(),
                    public_key_jwk: Jwk::from_public_key(&public_key),
                });
            }
        }

        if methods.is_empty() {
            return Err(DidError::Resolution(format!("{} has no keys", id)));
        }
        Ok(DidDocument::new(id, methods))
    }
}

fn resolution_error(e: LedgerError) -> DidError {
    DidError::Resolution(e.to_string())
}
