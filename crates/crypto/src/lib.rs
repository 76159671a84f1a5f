//! Key custody and cryptographic primitives for the Veritas identity SDK.
//!
//! # Core Capabilities
//!
//! - **Security levels**: named custody tiers mapped onto ledger permissions
//! - **Key manager**: the only place private keys live; signing is always
//!   done by level, with a challenge for PASSWORD and PIN
//! - **Password keys**: Argon2id derivation and the password policy
//! - **`did:jwk`**: self-certifying DIDs and DID document types
//!
//! # Supported Algorithms
//!
//! - **Signatures**: ECDSA over NIST P-256 (JWT `ES256`)
//! - **Hashing**: SHA-256
//! - **Password KDF**: Argon2id (40 passes, 64 MiB, 1 lane)
//!
//! # Security Principles
//!
//! - Secrets are never logged; private key types redact their `Debug` output
//! - Key buffers are zeroized after use

pub mod did;
pub mod error;
pub mod key_manager;
pub mod keys;
pub mod level;
pub mod password;

pub use did::{create_did_jwk, resolve_did_jwk, DidDocument, Jwk, VerificationMethod};
pub use error::{DidError, DidResult, KeyManagerError, KeyManagerResult};
pub use key_manager::{
    DataSignature, KeyEntry, KeyManager, SignatureFormat, StorageKeyManager, KEY_STORE_SCOPE,
};
pub use keys::{sha256, sha256_hex, KeySignature, PrivateKey, PublicKey, Salt};
pub use level::{index_of, level_from_index_or_name, SecurityLevel};
pub use password::{validate_password, KdfParams};
