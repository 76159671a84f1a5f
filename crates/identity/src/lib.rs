//! Identity lifecycle, DID-signed credentials and relay messaging for the
//! Veritas SDK.
//!
//! # Core Concepts
//!
//! - **Identity Controller**: creates a person account on the ledger, rotates
//!   device keys onto it and detects when local keys and ledger permissions
//!   have drifted apart
//! - **Credentials**: application messages are W3C Verifiable Credentials
//!   carried as ES256 JWTs and bound to the sender's DID
//! - **DID Resolution**: `did:antelope` through the ledger, `did:jwk` offline
//! - **Relay**: login and message forwarding over an injected transport
//!
//! # Security Model
//!
//! - Private keys stay inside the [`veritas_crypto::KeyManager`]; this crate
//!   only ever asks it to sign
//! - Every ledger transaction is authorized through a [`TransactionSigner`]
//! - Verification never errors: an unverifiable credential is `false`
//!
//! # Collaborators
//!
//! The ledger ([`LedgerClient`]), the key-value store and the relay socket
//! ([`RelayTransport`]) are constructor parameters, so tests and platforms
//! supply their own.

pub mod communication;
pub mod controller;
pub mod credential;
pub mod error;
pub mod ledger;
pub mod resolver;
pub mod types;
pub mod username;

pub use communication::{
    Communication, MessageCallback, RelayError, RelayEvent, RelayResult, RelayTransport,
};
pub use controller::{IdentityController, KEY_CONSISTENCY_PAIRS};
pub use credential::{Credential, Issuer, JwtSigner, KeyManagerJwtSigner, ES256};
pub use error::{IdentityError, IdentityResult, KeyMismatch};
pub use ledger::{
    CreateAccountRequest, KeyManagerSigner, LedgerAccount, LedgerAccountStatus, LedgerClient,
    LedgerError, LedgerResult, Permission, PermissionUpdate, TransactionSigner, TransactionTrace,
};
pub use resolver::{parse_antelope_did, AntelopeDid, DidResolver, ResolutionStrategy};
pub use types::{AccountStatus, IdentityField, IdentityRecord};
pub use username::Username;
