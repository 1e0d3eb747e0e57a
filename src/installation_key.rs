use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::{
    ecdsa::SigningKey,
    elliptic_curve::rand_core::{OsRng, RngCore},
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    SecretKey,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Length of the shared proof secret in bytes
pub const SECRET_LEN: usize = 32;

/// Long-lived credential identifying one installation, in its stored form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationKey {
    /// Caller-supplied identifier, used verbatim
    pub installation_id: String,
    /// Base64 of 32 random bytes keying the request proofs
    pub secret: String,
    /// Base64 of the P-256 private scalar
    pub private_key: String,
}

impl InstallationKey {
    /// Validate and decode this key. See [`parse_installation_key`].
    pub fn parse(&self) -> Result<ParsedInstallationKey> {
        ParsedInstallationKey::from_fields(
            Some(&self.installation_id),
            Some(&self.secret),
            Some(&self.private_key),
        )
    }
}

/// Validated, decoded view of an [`InstallationKey`]
#[derive(Clone)]
pub struct ParsedInstallationKey {
    pub installation_id: String,
    pub secret: [u8; SECRET_LEN],
    pub private_key: SigningKey,
    public_key_b64: String,
}

impl ParsedInstallationKey {
    fn from_fields(
        installation_id: Option<&str>,
        secret: Option<&str>,
        private_key: Option<&str>,
    ) -> Result<Self> {
        let installation_id = installation_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| invalid("installation_id is required"))?;

        let secret = secret.ok_or_else(|| invalid("secret is required"))?;
        let secret = STANDARD
            .decode(secret)
            .map_err(|e| invalid(format!("secret is not valid base64: {}", e)))?;
        let secret: [u8; SECRET_LEN] = secret.try_into().map_err(|bytes: Vec<u8>| {
            invalid(format!(
                "secret must be {} bytes, got {}",
                SECRET_LEN,
                bytes.len()
            ))
        })?;

        let private_key = private_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| invalid("private_key is required"))?;
        let private_key = STANDARD
            .decode(private_key)
            .map_err(|e| invalid(format!("private_key is not valid base64: {}", e)))?;
        let private_key = decode_signing_key(&private_key)?;

        // Only the public half ever goes over the wire, as base64 SPKI DER
        let public_key_der = private_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| invalid(format!("cannot encode public key: {}", e)))?;

        Ok(Self {
            installation_id: installation_id.to_string(),
            secret,
            private_key,
            public_key_b64: STANDARD.encode(public_key_der.as_bytes()),
        })
    }

    /// Public key in base64-encoded DER format, as sent during registration
    pub fn public_key_b64(&self) -> &str {
        &self.public_key_b64
    }
}

impl fmt::Debug for ParsedInstallationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedInstallationKey")
            .field("installation_id", &self.installation_id)
            .field("public_key", &self.public_key_b64)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh installation key for `installation_id`.
///
/// The secret is 32 bytes from the OS random source and the private key is a
/// new P-256 scalar. Randomness failure aborts, there is no usable fallback.
pub fn generate_installation_key(installation_id: impl Into<String>) -> InstallationKey {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);

    let signing_key = SigningKey::from(SecretKey::random(&mut OsRng));

    InstallationKey {
        installation_id: installation_id.into(),
        secret: STANDARD.encode(secret),
        private_key: STANDARD.encode(signing_key.to_bytes()),
    }
}

/// Generate a new random installation ID (UUID v4)
pub fn generate_installation_id() -> String {
    Uuid::new_v4().to_string().to_lowercase()
}

/// Validate an externally sourced installation key.
///
/// Every key read from storage or handed to a client passes through here.
/// Fails unless `raw` is an object with a non-empty `installation_id`, a
/// base64 `secret` of exactly 32 bytes and a base64 `private_key`.
pub fn parse_installation_key(raw: &Value) -> Result<ParsedInstallationKey> {
    let fields = raw
        .as_object()
        .ok_or_else(|| invalid("installation key must be an object"))?;
    let field = |name: &str| fields.get(name).and_then(Value::as_str);

    ParsedInstallationKey::from_fields(
        field("installation_id"),
        field("secret"),
        field("private_key"),
    )
}

/// Accepts the raw 32-byte scalar we write, or PKCS#8 DER written by other clients
fn decode_signing_key(bytes: &[u8]) -> Result<SigningKey> {
    if bytes.is_empty() {
        return Err(invalid("private_key is empty"));
    }

    if bytes.len() == SECRET_LEN {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| invalid(format!("private_key is not a P-256 scalar: {}", e)))?;
        return Ok(SigningKey::from(secret_key));
    }

    SigningKey::from_pkcs8_der(bytes)
        .map_err(|e| invalid(format!("private_key is not PKCS#8 DER: {}", e)))
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Validation(msg.into())
}
