//! DID documents and the self-certifying `did:jwk` method.
//!
//! A `did:jwk` identifier is `did:jwk:` followed by the base64url encoding of
//! a public JSON Web Key. Resolving one is pure decoding, no network involved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DidError, DidResult, KeyManagerResult};
use crate::keys::{base64url_decode, base64url_encode, PublicKey};

pub const DID_JWK_PREFIX: &str = "did:jwk:";
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
pub const JWS_2020_CONTEXT: &str = "https://w3id.org/security/suites/jws-2020/v1";
pub const JSON_WEB_KEY_2020: &str = "JsonWebKey2020";

/// JWK members that carry private key material.
const PRIVATE_JWK_MEMBERS: [&str; 6] = ["d", "p", "q", "dp", "dq", "qi"];

/// Public P-256 JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let (x, y) = public_key.affine_coordinates();
        Self {
            crv: "P-256".to_string(),
            kty: "EC".to_string(),
            x: base64url_encode(&x),
            y: base64url_encode(&y),
        }
    }

    pub fn to_public_key(&self) -> KeyManagerResult<PublicKey> {
        let x = base64url_decode(&self.x)?;
        let y = base64url_decode(&self.y)?;
        PublicKey::from_affine_coordinates(&x, &y)
    }

    /// Parses a JWK object, refusing anything that carries private members.
    pub fn from_json_object(object: &Map<String, Value>) -> DidResult<Self> {
        if let Some(member) = PRIVATE_JWK_MEMBERS
            .iter()
            .find(|member| object.contains_key(**member))
        {
            return Err(DidError::PrivateKeyMaterial((*member).to_string()));
        }
        let jwk: Jwk = serde_json::from_value(Value::Object(object.clone()))
            .map_err(|e| DidError::InvalidJwk(e.to_string()))?;
        if jwk.kty != "EC" || jwk.crv != "P-256" {
            return Err(DidError::InvalidJwk(format!(
                "unsupported key type {}/{}",
                jwk.kty, jwk.crv
            )));
        }
        Ok(jwk)
    }
}

/// A verification method inside a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_jwk: Jwk,
}

impl VerificationMethod {
    pub fn public_key(&self) -> KeyManagerResult<PublicKey> {
        self.public_key_jwk.to_public_key()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    pub verification_method: Vec<VerificationMethod>,
    pub authentication: Vec<String>,
    pub assertion_method: Vec<String>,
}

impl DidDocument {
    /// A document whose every method can both authenticate and assert.
    pub fn new(id: impl Into<String>, verification_method: Vec<VerificationMethod>) -> Self {
        let refs: Vec<String> = verification_method.iter().map(|m| m.id.clone()).collect();
        Self {
            context: vec![DID_CONTEXT.to_string(), JWS_2020_CONTEXT.to_string()],
            id: id.into(),
            verification_method,
            authentication: refs.clone(),
            assertion_method: refs,
        }
    }

    /// Keys usable for checking signatures made by this DID. Methods whose
    /// key cannot be decoded are skipped.
    pub fn assertion_keys(&self) -> Vec<PublicKey> {
        self.verification_method
            .iter()
            .filter(|m| self.assertion_method.contains(&m.id))
            .filter_map(|m| m.public_key().ok())
            .collect()
    }
}

/// `did:jwk` for a public key.
pub fn create_did_jwk(public_key: &PublicKey) -> String {
    let jwk = Jwk::from_public_key(public_key);
    // Serializing a struct of four strings cannot fail
    let json = serde_json::to_vec(&jwk).unwrap_or_default();
    format!("{}{}", DID_JWK_PREFIX, base64url_encode(&json))
}

/// Resolves a `did:jwk` by decoding it.
pub fn resolve_did_jwk(did: &str) -> DidResult<DidDocument> {
    let encoded = did
        .strip_prefix(DID_JWK_PREFIX)
        .ok_or_else(|| DidError::UnsupportedMethod(did.to_string()))?;
    // Fragments and paths are not part of the method-specific id
    let encoded = encoded
        .split(['#', '/', '?'])
        .next()
        .unwrap_or_default();
    if encoded.is_empty() {
        return Err(DidError::InvalidDid(did.to_string()));
    }

    let bytes = base64url_decode(encoded).map_err(|e| DidError::InvalidDid(e.to_string()))?;
    let object: Map<String, Value> =
        serde_json::from_slice(&bytes).map_err(|e| DidError::InvalidJwk(e.to_string()))?;
    let jwk = Jwk::from_json_object(&object)?;
    // Reject coordinates that are not a point on the curve
    jwk.to_public_key()
        .map_err(|e| DidError::InvalidJwk(e.to_string()))?;

    let id = format!("{}{}", DID_JWK_PREFIX, encoded);
    let method = VerificationMethod {
        id: format!("{}#0", id),
        method_type: JSON_WEB_KEY_2020.to_string(),
        controller: id.clone(),
        public_key_jwk: jwk,
    };
    Ok(DidDocument::new(id, vec![method]))
}
