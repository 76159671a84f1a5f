//! DID-signed JWT Verifiable Credentials used as the message envelope.
//!
//! A [`Credential`] is a compact JWT whose claims carry a W3C Verifiable
//! Credential. The JWT string is the only wire form. Claims are decoded once
//! when the credential is constructed and never re-parsed by the accessors.
//!
//! ```text
//! header  {"alg":"ES256","typ":"JWT"}
//! claims  {"iss":<did>,"sub":<recipient>?,"nbf":<secs>,"jti":"urn:uuid:..",
//!          "vc":{"@context":[..],"type":["VerifiableCredential",..],
//!                "credentialSubject":{"message":<payload>,"id"?,"type"?}}}
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::future::{select_ok, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;
use veritas_crypto::{create_did_jwk, KeyManager, SecurityLevel, SignatureFormat};
use zeroize::Zeroizing;

use crate::error::{IdentityError, IdentityResult};
use crate::resolver::{DidResolver, ResolutionStrategy};

/// JWT algorithm for ECDSA P-256 with SHA-256.
pub const ES256: &str = "ES256";
pub const VC_CONTEXT_V1: &str = "https://www.w3.org/2018/credentials/v1";
pub const VERIFIABLE_CREDENTIAL: &str = "VerifiableCredential";
/// Type tag carried by every credential this crate issues.
pub const MESSAGE_CREDENTIAL: &str = "VeritasMessage";

/// Produces JWT signatures for an [`Issuer`].
#[async_trait]
pub trait JwtSigner: Send + Sync {
    /// Signs the JWT signing input (`header.claims`), returning the
    /// base64url signature segment.
    async fn sign(&self, signing_input: &[u8]) -> IdentityResult<String>;
}

/// Signs through a key manager level. The key never leaves the manager.
pub struct KeyManagerJwtSigner {
    key_manager: Arc<dyn KeyManager>,
    level: SecurityLevel,
    challenge: Option<Zeroizing<String>>,
}

impl KeyManagerJwtSigner {
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
}

#[async_trait]
impl JwtSigner for KeyManagerJwtSigner {
    async fn sign(&self, signing_input: &[u8]) -> IdentityResult<String> {
        let signature = self
            .key_manager
            .sign_data(
                self.level,
                signing_input,
                self.challenge.as_deref().map(String::as_str),
                SignatureFormat::Jwt,
            )
            .await?
            .into_jwt()?;
        Ok(signature)
    }
}

/// Who signs a credential: a DID, an algorithm and a signer.
#[derive(Clone)]
pub struct Issuer {
    pub did: String,
    pub alg: String,
    signer: Arc<dyn JwtSigner>,
}

impl Issuer {
    pub fn new(did: impl Into<String>, signer: Arc<dyn JwtSigner>) -> Self {
        Self {
            did: did.into(),
            alg: ES256.to_string(),
            signer,
        }
    }

    /// Issuer for a key manager level, identified by that key's `did:jwk`.
    pub async fn did_jwk(
        key_manager: Arc<dyn KeyManager>,
        level: SecurityLevel,
        challenge: Option<&str>,
    ) -> IdentityResult<Self> {
        let public_key = key_manager.get_key(level).await?;
        let signer = KeyManagerJwtSigner::new(key_manager, level, challenge);
        Ok(Self::new(create_did_jwk(&public_key), Arc::new(signer)))
    }

    pub async fn sign(&self, signing_input: &[u8]) -> IdentityResult<String> {
        self.signer.sign(signing_input).await
    }
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("did", &self.did)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSubject {
    pub message: Value,
    /// Recipient DID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub credential_subject: CredentialSubject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialClaims {
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Issuance date, seconds since the epoch.
    pub nbf: i64,
    pub jti: String,
    pub vc: VerifiableCredential,
}

/// A signed credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    jwt: String,
    alg: String,
    claims: CredentialClaims,
}

impl Credential {
    /// Wraps `payload` in a credential signed by `issuer`.
    pub async fn sign<T: Serialize>(
        payload: &T,
        issuer: &Issuer,
        recipient: Option<&str>,
        message_type: Option<&str>,
    ) -> IdentityResult<Self> {
        let message =
            serde_json::to_value(payload).map_err(|e| IdentityError::InvalidData(e.to_string()))?;

        let header = JwtHeader {
            alg: issuer.alg.clone(),
            typ: "JWT".to_string(),
        };
        let claims = CredentialClaims {
            iss: issuer.did.clone(),
            sub: recipient.map(str::to_string),
            nbf: Utc::now().timestamp(),
            jti: format!("urn:uuid:{}", Uuid::new_v4()),
            vc: VerifiableCredential {
                context: vec![VC_CONTEXT_V1.to_string()],
                types: vec![
                    VERIFIABLE_CREDENTIAL.to_string(),
                    MESSAGE_CREDENTIAL.to_string(),
                ],
                credential_subject: CredentialSubject {
                    message,
                    id: recipient.map(str::to_string),
                    message_type: message_type.map(str::to_string),
                },
            },
        };

        let signing_input = format!(
            "{}.{}",
            encode_segment(&header)?,
            encode_segment(&claims)?
        );
        let signature = issuer.sign(signing_input.as_bytes()).await?;
        let jwt = format!("{}.{}", signing_input, signature);

        debug!(jti = %claims.jti, iss = %claims.iss, "signed credential");
        Ok(Self {
            jwt,
            alg: header.alg,
            claims,
        })
    }

    /// Decodes a compact JWT. Does not verify it.
    pub fn from_jwt(jwt: impl Into<String>) -> IdentityResult<Self> {
        let jwt = jwt.into();
        let mut segments = jwt.split('.');
        let (Some(header), Some(claims), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(IdentityError::InvalidData(
                "JWT must have three segments".into(),
            ));
        };
        if signature.is_empty() {
            return Err(IdentityError::InvalidData("JWT signature is empty".into()));
        }

        let header: JwtHeader = decode_segment(header)?;
        let claims: CredentialClaims = decode_segment(claims)?;
        Ok(Self {
            alg: header.alg,
            claims,
            jwt,
        })
    }

    /// The wire form.
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    pub fn id(&self) -> &str {
        &self.claims.jti
    }

    /// Issuer DID.
    pub fn sender(&self) -> &str {
        &self.claims.iss
    }

    /// Recipient DID, if addressed.
    pub fn recipient(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }

    pub fn payload_value(&self) -> &Value {
        &self.claims.vc.credential_subject.message
    }

    pub fn payload<T: DeserializeOwned>(&self) -> IdentityResult<T> {
        serde_json::from_value(self.payload_value().clone())
            .map_err(|e| IdentityError::InvalidData(e.to_string()))
    }

    pub fn message_type(&self) -> Option<&str> {
        self.claims.vc.credential_subject.message_type.as_deref()
    }

    pub fn issuance_date(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.claims.nbf, 0)
    }

    pub fn claims(&self) -> &CredentialClaims {
        &self.claims
    }

    /// Checks the credential against its issuer's DID document.
    ///
    /// Every resolution strategy is tried at once and the first that both
    /// resolves the issuer and validates the signature wins. Any failure
    /// yields `false`.
    pub async fn verify(&self, resolver: &DidResolver) -> bool {
        if let Err(e) = self.check_well_formed() {
            debug!(jti = %self.claims.jti, error = %e, "malformed credential");
            return false;
        }

        let attempts = ResolutionStrategy::ALL
            .into_iter()
            .map(|strategy| self.verify_with(resolver, strategy).boxed());
        match select_ok(attempts).await {
            Ok(((), _)) => true,
            Err(e) => {
                debug!(jti = %self.claims.jti, iss = %self.claims.iss, error = %e, "credential did not verify");
                false
            }
        }
    }

    async fn verify_with(
        &self,
        resolver: &DidResolver,
        strategy: ResolutionStrategy,
    ) -> IdentityResult<()> {
        let document = resolver.resolve_with(strategy, &self.claims.iss).await?;
        let (signing_input, signature) = self
            .jwt
            .rsplit_once('.')
            .ok_or_else(|| IdentityError::InvalidData("JWT has no signature".into()))?;

        if document
            .assertion_keys()
            .iter()
            .any(|key| key.verify_jwt(signing_input.as_bytes(), signature))
        {
            Ok(())
        } else {
            Err(IdentityError::InvalidData(format!(
                "signature matches no key of {}",
                document.id
            )))
        }
    }

    fn check_well_formed(&self) -> IdentityResult<()> {
        if self.alg != ES256 {
            return Err(IdentityError::InvalidData(format!(
                "unsupported alg {}",
                self.alg
            )));
        }
        let vc = &self.claims.vc;
        if !vc.context.iter().any(|c| c == VC_CONTEXT_V1) {
            return Err(IdentityError::InvalidData("missing VC context".into()));
        }
        if !vc.types.iter().any(|t| t == VERIFIABLE_CREDENTIAL) {
            return Err(IdentityError::InvalidData(
                "missing VerifiableCredential type".into(),
            ));
        }
        if self.claims.iss.is_empty() {
            return Err(IdentityError::InvalidData("missing issuer".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.jwt)
    }
}

fn encode_segment<T: Serialize>(value: &T) -> IdentityResult<String> {
    let json = serde_json::to_vec(value).map_err(|e| IdentityError::InvalidData(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> IdentityResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| IdentityError::InvalidData(format!("invalid base64url: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IdentityError::InvalidData(format!("invalid JWT segment: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veritas_core::MemoryStore;
    use veritas_crypto::{KdfParams, PrivateKey, StorageKeyManager};

    async fn local_issuer() -> (Arc<dyn KeyManager>, Issuer) {
        let key_manager: Arc<dyn KeyManager> = Arc::new(
            StorageKeyManager::new(Arc::new(MemoryStore::new()))
                .with_kdf_params(KdfParams::INSECURE_TESTING),
        );
        key_manager
            .store_key(SecurityLevel::Local, &PrivateKey::random(), None)
            .await
            .unwrap();
        let issuer = Issuer::did_jwk(key_manager.clone(), SecurityLevel::Local, None)
            .await
            .unwrap();
        (key_manager, issuer)
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_accessors_round_trip() {
        let (_, issuer) = local_issuer().await;
        let payload = Greeting {
            text: "hello".into(),
            count: 3,
        };
        let credential = Credential::sign(&payload, &issuer, Some("did:jwk:bob"), Some("Greeting"))
            .await
            .unwrap();

        assert_eq!(credential.sender(), issuer.did);
        assert_eq!(credential.recipient(), Some("did:jwk:bob"));
        assert_eq!(credential.payload::<Greeting>().unwrap(), payload);
        assert_eq!(credential.message_type(), Some("Greeting"));
        assert!(credential.id().starts_with("urn:uuid:"));
        assert!(credential.issuance_date().is_some());
    }

    #[tokio::test]
    async fn test_wire_form_is_the_jwt() {
        let (_, issuer) = local_issuer().await;
        let credential = Credential::sign(&json!({"a": 1}), &issuer, None, None)
            .await
            .unwrap();

        let decoded = Credential::from_jwt(credential.to_string()).unwrap();
        assert_eq!(decoded, credential);
        assert_eq!(decoded.recipient(), None);
        assert_eq!(decoded.message_type(), None);

        let header: Value = decode_segment(credential.jwt().split('.').next().unwrap()).unwrap();
        assert_eq!(header, json!({"alg": "ES256", "typ": "JWT"}));
    }

    #[tokio::test]
    async fn test_did_jwk_credential_verifies() {
        let (_, issuer) = local_issuer().await;
        let credential = Credential::sign(&json!("hi"), &issuer, None, None)
            .await
            .unwrap();

        let resolver = DidResolver::self_certifying_only();
        assert!(credential.verify(&resolver).await);
        // Idempotent
        assert!(credential.verify(&resolver).await);
    }

    #[tokio::test]
    async fn test_tampered_signature_fails() {
        let (_, issuer) = local_issuer().await;
        let credential = Credential::sign(&json!("hi"), &issuer, None, None)
            .await
            .unwrap();

        let (input, signature) = credential.jwt().rsplit_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
        bytes[10] ^= 0x01;
        let tampered =
            Credential::from_jwt(format!("{}.{}", input, URL_SAFE_NO_PAD.encode(bytes))).unwrap();

        assert!(!tampered.verify(&DidResolver::self_certifying_only()).await);
    }

    #[tokio::test]
    async fn test_tampered_payload_fails() {
        let (_, issuer) = local_issuer().await;
        let credential = Credential::sign(&json!({"amount": 1}), &issuer, None, None)
            .await
            .unwrap();

        let mut claims = credential.claims().clone();
        claims.vc.credential_subject.message = json!({"amount": 1000});
        let forged_claims = encode_segment(&claims).unwrap();
        let mut segments: Vec<&str> = credential.jwt().split('.').collect();
        segments[1] = &forged_claims;
        let forged = Credential::from_jwt(segments.join(".")).unwrap();

        assert!(!forged.verify(&DidResolver::self_certifying_only()).await);
    }

    #[tokio::test]
    async fn test_other_issuer_key_fails() {
        let (_, issuer) = local_issuer().await;
        let (_, impostor) = local_issuer().await;
        // Signed by the impostor but claiming the first issuer's DID
        let forged_issuer = Issuer {
            did: issuer.did.clone(),
            alg: ES256.into(),
            signer: impostor.signer.clone(),
        };
        let credential = Credential::sign(&json!("hi"), &forged_issuer, None, None)
            .await
            .unwrap();

        assert!(!credential.verify(&DidResolver::self_certifying_only()).await);
    }

    #[tokio::test]
    async fn test_unknown_did_method_fails() {
        let (_, issuer) = local_issuer().await;
        let web_issuer = Issuer {
            did: "did:web:example.com".into(),
            alg: ES256.into(),
            signer: issuer.signer.clone(),
        };
        let credential = Credential::sign(&json!("hi"), &web_issuer, None, None)
            .await
            .unwrap();

        assert!(!credential.verify(&DidResolver::self_certifying_only()).await);
    }

    #[tokio::test]
    async fn test_wrong_alg_fails() {
        let (_, issuer) = local_issuer().await;
        let mut other = issuer.clone();
        other.alg = "HS256".into();
        let credential = Credential::sign(&json!("hi"), &other, None, None)
            .await
            .unwrap();

        assert!(!credential.verify(&DidResolver::self_certifying_only()).await);
    }

    #[test]
    fn test_malformed_jwt_rejected() {
        for jwt in ["", "a.b", "a.b.c.d", "!!.!!.sig"] {
            assert!(
                matches!(Credential::from_jwt(jwt), Err(IdentityError::InvalidData(_))),
                "{:?} should be rejected",
                jwt
            );
        }

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"iss":"did:jwk:x"}"#);
        assert!(Credential::from_jwt(format!("{}.{}.sig", header, claims)).is_err());
        assert!(Credential::from_jwt(format!("{}.{}.", header, claims)).is_err());
    }

    #[tokio::test]
    async fn test_challenge_protected_issuer() {
        let key_manager: Arc<dyn KeyManager> = Arc::new(
            StorageKeyManager::new(Arc::new(MemoryStore::new()))
                .with_kdf_params(KdfParams::INSECURE_TESTING),
        );
        key_manager
            .store_key(SecurityLevel::Pin, &PrivateKey::random(), Some("1234"))
            .await
            .unwrap();

        let good = Issuer::did_jwk(key_manager.clone(), SecurityLevel::Pin, Some("1234"))
            .await
            .unwrap();
        assert!(Credential::sign(&json!(1), &good, None, None).await.is_ok());

        let bad = Issuer::did_jwk(key_manager, SecurityLevel::Pin, Some("0000"))
            .await
            .unwrap();
        let err = Credential::sign(&json!(1), &bad, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code().as_str(), "PinInvalid");
    }
}
