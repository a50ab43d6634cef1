//! Single-use ECDSA P-256 keys for keyless signing.

use crate::{Result, SigningError};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use rand::rngs::OsRng;

/// Ephemeral keypair owned by exactly one signing operation
///
/// The private half never leaves memory and is zeroized when the keypair is
/// dropped. Not `Clone`.
pub struct EphemeralKeypair {
    signing_key: SigningKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as a PKIX PEM block, the form Fulcio expects
    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::Key(format!("Failed to encode public key: {}", e)))
    }

    /// Sign `message` with ECDSA over its SHA-256 digest, DER-encoded
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public_key", self.public_key())
            .finish_non_exhaustive()
    }
}
