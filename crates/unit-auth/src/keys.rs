//! Signing keys and JWKS
//!
//! The [`KeyRing`] owns all signing material:
//! - one HMAC secret for internal HS256 tokens
//! - any number of RSA key pairs for RS256 tokens, indexed by `kid`, one of
//!   which is active for signing
//!
//! RS256 tokens carry the `kid` of the key that signed them, so keys added
//! later can be activated without invalidating tokens signed by older keys.
//! The ring is built once at startup and shared behind an `Arc`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData,
    Validation,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// Size of generated RSA keys.
pub const RSA_KEY_BITS: usize = 2048;

/// `kid` published for the HMAC key.
pub const HMAC_KEY_ID: &str = "hs256";

/// An RSA signing key with its public components.
pub struct RsaSigningKey {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    n: String,
    e: String,
}

impl std::fmt::Debug for RsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigningKey")
            .field("kid", &self.kid)
            .field("encoding_key", &"[REDACTED]")
            .finish()
    }
}

impl RsaSigningKey {
    /// Load a key from a PEM encoded private key (PKCS#8 or PKCS#1).
    ///
    /// When `public_pem` is given it must match the private key. When `kid`
    /// is `None` it is derived from the public key.
    pub fn from_pem(private_pem: &str, public_pem: Option<&str>, kid: Option<String>) -> AuthResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| AuthError::ConfigError(format!("Invalid RSA private key: {}", e)))?;

        if let Some(public_pem) = public_pem {
            let configured = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| AuthError::ConfigError(format!("Invalid RSA public key: {}", e)))?;
            if configured != RsaPublicKey::from(&private) {
                return Err(AuthError::ConfigError(
                    "RSA public key does not match private key".to_string(),
                ));
            }
        }

        Self::from_private_key(&private, kid)
    }

    /// Generate a fresh key pair.
    pub fn generate() -> AuthResult<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| AuthError::Internal(format!("RSA key generation failed: {}", e)))?;
        Self::from_private_key(&private, None)
    }

    fn from_private_key(private: &RsaPrivateKey, kid: Option<String>) -> AuthResult<Self> {
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Internal(format!("RSA key encoding failed: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(format!("Invalid RSA private key: {}", e)))?;

        let public = RsaPublicKey::from(private);
        let n_bytes = public.n().to_bytes_be();
        let e_bytes = public.e().to_bytes_be();
        let n = URL_SAFE_NO_PAD.encode(&n_bytes);
        let e = URL_SAFE_NO_PAD.encode(&e_bytes);

        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| AuthError::ConfigError(format!("Invalid RSA public key: {}", e)))?;

        let kid = kid.unwrap_or_else(|| derive_key_id(&n_bytes, &e_bytes));

        Ok(Self {
            kid,
            encoding_key,
            decoding_key,
            n,
            e,
        })
    }

    /// Key id.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public JWK for this key.
    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            key_use: Some("sig".to_string()),
            alg: "RS256".to_string(),
            kid: self.kid.clone(),
            n: Some(self.n.clone()),
            e: Some(self.e.clone()),
            k_thumbprint: None,
        }
    }
}

/// Derive a stable key id from the public components.
fn derive_key_id(n: &[u8], e: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(n);
    hasher.update(e);
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(&digest[..8])
}

/// All signing keys of the service.
pub struct KeyRing {
    hmac_encoding: EncodingKey,
    hmac_decoding: DecodingKey,
    hmac_thumbprint: String,
    rsa_keys: HashMap<String, RsaSigningKey>,
    active_kid: String,
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kids: Vec<&String> = self.rsa_keys.keys().collect();
        kids.sort();
        f.debug_struct("KeyRing")
            .field("hmac", &"[REDACTED]")
            .field("rsa_kids", &kids)
            .field("active_kid", &self.active_kid)
            .finish()
    }
}

impl KeyRing {
    /// Create a ring from an HMAC secret and an initial RSA key.
    pub fn new(secret: &str, rsa_key: RsaSigningKey) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::ConfigError("JWT secret must not be empty".to_string()));
        }

        let active_kid = rsa_key.kid.clone();
        let mut rsa_keys = HashMap::new();
        rsa_keys.insert(active_kid.clone(), rsa_key);

        Ok(Self {
            hmac_encoding: EncodingKey::from_secret(secret.as_bytes()),
            hmac_decoding: DecodingKey::from_secret(secret.as_bytes()),
            hmac_thumbprint: URL_SAFE_NO_PAD.encode(Sha256::digest(secret.as_bytes())),
            rsa_keys,
            active_kid,
        })
    }

    /// Build the ring from configuration.
    ///
    /// Loads the configured RSA key pair, or generates one when none is
    /// configured. A generated key lives only as long as the process, so
    /// RS256 tokens do not survive a restart in that mode.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let rsa_key = match config.rsa_private_key.as_deref() {
            Some(private_pem) => {
                let key = RsaSigningKey::from_pem(
                    private_pem,
                    config.rsa_public_key.as_deref(),
                    config.rsa_key_id.clone(),
                )?;
                info!(kid = %key.kid, "Loaded RSA signing key from configuration");
                key
            }
            None => {
                let key = RsaSigningKey::generate()?;
                warn!(kid = %key.kid, "No RSA key configured, generated an ephemeral signing key");
                key
            }
        };

        Self::new(&config.jwt_secret, rsa_key)
    }

    /// Add a key to the ring without activating it.
    ///
    /// Tokens signed with the key verify as soon as it is added.
    pub fn add_key(&mut self, key: RsaSigningKey) {
        self.rsa_keys.insert(key.kid.clone(), key);
    }

    /// Make `kid` the key used for signing.
    pub fn activate(&mut self, kid: &str) -> AuthResult<()> {
        if !self.rsa_keys.contains_key(kid) {
            return Err(AuthError::ConfigError(format!("Unknown key id: {}", kid)));
        }
        self.active_kid = kid.to_string();
        info!(kid, "Activated RSA signing key");
        Ok(())
    }

    /// Remove a retired key. The active key cannot be removed.
    pub fn remove_key(&mut self, kid: &str) -> AuthResult<()> {
        if kid == self.active_kid {
            return Err(AuthError::ConfigError("Cannot remove the active signing key".to_string()));
        }
        self.rsa_keys.remove(kid);
        Ok(())
    }

    /// Key id used for new RS256 signatures.
    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Number of RSA keys that verify.
    pub fn rsa_key_count(&self) -> usize {
        self.rsa_keys.len()
    }

    fn active_rsa(&self) -> AuthResult<&RsaSigningKey> {
        self.rsa_keys
            .get(&self.active_kid)
            .ok_or_else(|| AuthError::Internal("Active signing key missing".to_string()))
    }

    /// Sign claims with the HMAC key.
    pub fn sign_hs256<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.hmac_encoding)
            .map_err(|e| AuthError::Internal(format!("Token encoding failed: {}", e)))
    }

    /// Sign claims with the active RSA key, recording its `kid` in the header.
    pub fn sign_rs256<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        let key = self.active_rsa()?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        encode(&header, claims, &key.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Token encoding failed: {}", e)))
    }

    /// Verify an HS256 token.
    pub fn verify_hs256<T: DeserializeOwned>(&self, token: &str, validation: &Validation) -> AuthResult<T> {
        let data: TokenData<T> = decode(token, &self.hmac_decoding, validation)?;
        Ok(data.claims)
    }

    /// Verify an RS256 token with the key named by its `kid` header.
    ///
    /// Tokens without a `kid` are checked against the active key.
    pub fn verify_rs256<T: DeserializeOwned>(&self, token: &str, validation: &Validation) -> AuthResult<T> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::SignatureInvalid);
        }

        let key = match header.kid.as_deref() {
            Some(kid) => self.rsa_keys.get(kid).ok_or(AuthError::SignatureInvalid)?,
            None => self.active_rsa()?,
        };

        let data: TokenData<T> = decode(token, &key.decoding_key, validation)?;
        Ok(data.claims)
    }

    /// Public key set for the JWKS endpoint.
    ///
    /// RSA keys are published with their modulus and exponent. The HMAC key
    /// is published only as a SHA-256 thumbprint so clients can detect
    /// secret rotation.
    pub fn jwks(&self) -> JwkSet {
        let mut keys: Vec<Jwk> = self.rsa_keys.values().map(RsaSigningKey::to_jwk).collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        keys.push(Jwk {
            kty: "oct".to_string(),
            key_use: Some("sig".to_string()),
            alg: "HS256".to_string(),
            kid: HMAC_KEY_ID.to_string(),
            n: None,
            e: None,
            k_thumbprint: Some(self.hmac_thumbprint.clone()),
        });
        JwkSet { keys }
    }
}

/// JSON Web Key Set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwkSet {
    /// Published keys
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find a key by id.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// A single published key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Jwk {
    /// Key type (`RSA` or `oct`)
    pub kty: String,

    /// Intended use
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Algorithm
    pub alg: String,

    /// Key id
    pub kid: String,

    /// RSA modulus (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// SHA-256 thumbprint of a symmetric key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k_thumbprint: Option<String>,
}
