//! P-256 key material.
//!
//! Private keys never leave this crate except wrapped in [`PrivateKey`],
//! which zeroizes on drop and redacts itself from `Debug` output.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::error::{KeyManagerError, KeyManagerResult};

/// Salt length in bytes for password derivation and challenge hashing.
pub const SALT_LENGTH: usize = 32;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn base64url_decode(data: &str) -> KeyManagerResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| KeyManagerError::InvalidData(format!("invalid base64url: {}", e)))
}

/// A P-256 private key.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SecretKey,
}

impl PrivateKey {
    /// Generates a key from the OS random number generator.
    pub fn random() -> Self {
        Self {
            inner: SecretKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> KeyManagerResult<Self> {
        let inner = SecretKey::from_slice(bytes)
            .map_err(|_| KeyManagerError::InvalidData("invalid P-256 private key".into()))?;
        Ok(Self { inner })
    }

    pub fn from_hex(hex_str: &str) -> KeyManagerResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(hex_str)
                .map_err(|e| KeyManagerError::InvalidData(format!("invalid key hex: {}", e)))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.inner.to_bytes()))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.signing_key().verifying_key().clone(),
        }
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.inner)
    }

    /// ES256: SHA-256 of `data` signed, as the raw `r || s` pair.
    pub fn sign_jwt(&self, data: &[u8]) -> String {
        let signature: Signature = self.signing_key().sign(data);
        base64url_encode(&signature.to_bytes())
    }

    /// Signs an already computed 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> KeyManagerResult<KeySignature> {
        let signature: Signature = self
            .signing_key()
            .sign_prehash(digest)
            .map_err(|e| KeyManagerError::InvalidData(format!("signing failed: {}", e)))?;
        Ok(KeySignature { inner: signature })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key().to_string())
            .finish_non_exhaustive()
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.to_bytes() == other.inner.to_bytes()
    }
}

impl Eq for PrivateKey {}

/// A P-256 public key. The string form is the hex compressed SEC1 point.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    pub fn from_sec1_bytes(bytes: &[u8]) -> KeyManagerResult<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| KeyManagerError::InvalidData("invalid P-256 public key".into()))?;
        Ok(Self { inner })
    }

    pub fn from_affine_coordinates(x: &[u8], y: &[u8]) -> KeyManagerResult<Self> {
        if x.len() != 32 || y.len() != 32 {
            return Err(KeyManagerError::InvalidData(format!(
                "coordinates must be 32 bytes, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(x),
            p256::FieldBytes::from_slice(y),
            false,
        );
        let inner = VerifyingKey::from_encoded_point(&point)
            .map_err(|_| KeyManagerError::InvalidData("point is not on P-256".into()))?;
        Ok(Self { inner })
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.inner.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Uncompressed affine `(x, y)`.
    pub fn affine_coordinates(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.inner.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        // Uncompressed points always carry both coordinates
        if let (Some(px), Some(py)) = (point.x(), point.y()) {
            x.copy_from_slice(px);
            y.copy_from_slice(py);
        }
        (x, y)
    }

    /// Verifies an ES256 JWT signature (base64url `r || s`) over `data`.
    pub fn verify_jwt(&self, data: &[u8], signature_b64: &str) -> bool {
        let Ok(bytes) = base64url_decode(signature_b64) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        self.inner.verify(data, &signature).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_sec1_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = KeyManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| KeyManagerError::InvalidData(format!("invalid public key hex: {}", e)))?;
        Self::from_sec1_bytes(&bytes)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Structured ECDSA signature over a SHA-256 digest. String form is hex DER.
#[derive(Clone, PartialEq, Eq)]
pub struct KeySignature {
    inner: Signature,
}

impl KeySignature {
    pub fn from_der(bytes: &[u8]) -> KeyManagerResult<Self> {
        let inner = Signature::from_der(bytes)
            .map_err(|_| KeyManagerError::InvalidData("invalid DER signature".into()))?;
        Ok(Self { inner })
    }

    pub fn to_der(&self) -> Vec<u8> {
        self.inner.to_der().as_bytes().to_vec()
    }

    /// Checks this signature against `public_key` for the SHA-256 of `data`.
    pub fn verify(&self, public_key: &PublicKey, data: &[u8]) -> bool {
        self.verify_digest(public_key, &sha256(data))
    }

    pub fn verify_digest(&self, public_key: &PublicKey, digest: &[u8; 32]) -> bool {
        public_key.inner.verify_prehash(digest, &self.inner).is_ok()
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_der()))
    }
}

impl fmt::Debug for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySignature({})", self)
    }
}

impl FromStr for KeySignature {
    type Err = KeyManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| KeyManagerError::InvalidData(format!("invalid signature hex: {}", e)))?;
        Self::from_der(&bytes)
    }
}

/// Random salt, hex encoded when persisted or sent to the ledger.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_hex())
    }
}

impl FromStr for Salt {
    type Err = KeyManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| KeyManagerError::InvalidData(format!("invalid salt hex: {}", e)))?;
        let bytes: [u8; SALT_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            KeyManagerError::InvalidData(format!(
                "salt must be {} bytes, got {}",
                SALT_LENGTH,
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Salt {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Salt {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
