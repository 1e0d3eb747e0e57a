use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use p256::ecdsa::{signature::Signer, Signature};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::installation_key::{ParsedInstallationKey, SECRET_LEN};

pub const INSTALLATION_ID_HEADER: &str = "X-App-Installation-Id";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const NONCE_HEADER: &str = "X-Nonce";
pub const REQUEST_PROOF_HEADER: &str = "X-Request-Proof";
pub const REQUEST_SIGNATURE_HEADER: &str = "X-Request-Signature";

/// Derive the request proof for `message`, keyed by the installation secret.
///
/// This is the keyed hash the cloud recomputes on its side, so the output
/// must stay byte-for-byte stable: the secret seeds a 32-byte work buffer,
/// each message byte is XORed into one slot and rotated left by a key-dependent
/// amount, and the proof is the base64 SHA-256 of the final buffer.
pub fn generate_request_proof(message: &str, secret: &[u8; SECRET_LEN]) -> String {
    let mut work = *secret;

    for byte_val in message.as_bytes() {
        let idx = (*byte_val as usize) % SECRET_LEN;
        let shift_amount = u32::from(work[(idx + 1) % SECRET_LEN] & 7);
        work[idx] = (byte_val ^ work[idx]).rotate_left(shift_amount);
    }

    STANDARD.encode(Sha256::digest(work))
}

/// Nonce and timestamp for exactly one request
#[derive(Debug, Clone)]
pub struct RequestStamp {
    pub nonce: String,
    /// Unix time in milliseconds
    pub timestamp: String,
}

impl Default for RequestStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStamp {
    pub fn new() -> Self {
        Self {
            nonce: Uuid::new_v4().to_string().to_lowercase(),
            timestamp: Utc::now().timestamp_millis().to_string(),
        }
    }

    /// `installation_id.nonce.timestamp`, the message every proof is taken over
    pub fn message(&self, installation_id: &str) -> String {
        format!("{}.{}.{}", installation_id, self.nonce, self.timestamp)
    }
}

/// Headers for the `/auth/init` registration call
pub fn registration_headers(key: &ParsedInstallationKey) -> Vec<(&'static str, String)> {
    let stamp = RequestStamp::new();
    let proof = generate_request_proof(&stamp.message(&key.installation_id), &key.secret);

    vec![
        (INSTALLATION_ID_HEADER, key.installation_id.clone()),
        (TIMESTAMP_HEADER, stamp.timestamp),
        (NONCE_HEADER, stamp.nonce),
        (REQUEST_PROOF_HEADER, proof),
    ]
}

/// Headers for sign-in and token refresh.
///
/// The proof itself is not sent; it is signed together with the message using
/// the installation's private key.
pub fn signed_request_headers(key: &ParsedInstallationKey) -> Vec<(&'static str, String)> {
    let stamp = RequestStamp::new();
    let message = stamp.message(&key.installation_id);
    let proof = generate_request_proof(&message, &key.secret);

    let signature_data = format!("{}.{}", message, proof);
    let signature: Signature = key.private_key.sign(signature_data.as_bytes());

    vec![
        (INSTALLATION_ID_HEADER, key.installation_id.clone()),
        (TIMESTAMP_HEADER, stamp.timestamp),
        (NONCE_HEADER, stamp.nonce),
        (REQUEST_SIGNATURE_HEADER, STANDARD.encode(signature.to_der())),
    ]
}
