//! The daemon's Ed25519 signing identity.
//!
//! Generated once per process start, never persisted. Capability tokens
//! minted by one daemon instance do not validate against another, which
//! is the intended lifetime: restart invalidates every outstanding token.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Process-lifetime Ed25519 key pair.
pub struct SigningIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SigningIdentity {
    /// Generate a fresh key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Sign a message, returning the 64-byte signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature produced by [`SigningIdentity::sign`].
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <&[u8; 64]>::try_from(signature) else {
            return false;
        };
        let sig = Signature::from_bytes(sig_bytes);
        self.verifying_key.verify(message, &sig).is_ok()
    }

    /// Short key id for logs (first 8 bytes of the public key, hex).
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        hex::encode(&self.verifying_key.as_bytes()[..8])
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key_id", &self.key_id_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let identity = SigningIdentity::generate();
        let sig = identity.sign(b"payload");
        assert!(identity.verify(b"payload", &sig));
        assert!(!identity.verify(b"tampered", &sig));
    }

    #[test]
    fn test_keys_differ_across_instances() {
        let a = SigningIdentity::generate();
        let b = SigningIdentity::generate();
        let sig = a.sign(b"payload");
        assert!(!b.verify(b"payload", &sig));
    }

    #[test]
    fn test_rejects_short_signature() {
        let identity = SigningIdentity::generate();
        assert!(!identity.verify(b"payload", b"short"));
    }
}
