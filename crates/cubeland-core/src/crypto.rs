//! Client identity crypto — challenge generation and signature checks.
//!
//! Players hold long-lived ECDSA P-256 keypairs. The server only ever sees
//! the PEM-encoded public half; authentication is a challenge/response where
//! the client signs 32 random bytes and the server verifies the DER-encoded
//! signature over SHA-256.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{DerSignature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use rand::RngCore;
use thiserror::Error;

/// Length of the random authentication challenge.
pub const CHALLENGE_LEN: usize = 32;

/// Generate a fresh challenge from the thread-local CSPRNG.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// A player's parsed public key, kept together with the original PEM so the
/// key cache can persist it without re-encoding.
#[derive(Debug, Clone)]
pub struct PlayerPublicKey {
    key: VerifyingKey,
    pem: String,
}

impl PlayerPublicKey {
    /// Parse a PEM-encoded SubjectPublicKeyInfo (the format the account
    /// service hands out).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::BadKey(e.to_string()))?;
        Ok(Self {
            key,
            pem: pem.to_string(),
        })
    }

    /// The original PEM text this key was parsed from.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Verify a DER-encoded ECDSA/SHA-256 signature over `message`.
    ///
    /// Any parse failure counts as an invalid signature; malformed DER must
    /// not be distinguishable from a wrong signature.
    pub fn verify(&self, message: &[u8], signature_der: &[u8]) -> bool {
        let Ok(signature) = DerSignature::try_from(signature_der) else {
            return false;
        };
        self.key.verify(message, &signature).is_ok()
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key PEM: {0}")]
    BadKey(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
