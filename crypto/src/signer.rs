//! Signer abstraction handed to the protocol services.

use apollon_types::{PrivateKey, PublicKey, Signature};

use crate::sign::{is_valid_public_key, sign_message, verify_signature};

/// Signs and verifies protocol payloads.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8], key: &PrivateKey) -> Signature;
    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> bool;
    /// Structural check that a key can be used for verification at all.
    fn is_valid_key(&self, key: &PublicKey) -> bool;
}

/// Production signer backed by Ed25519.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Signer;

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8], key: &PrivateKey) -> Signature {
        sign_message(message, key)
    }

    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> bool {
        verify_signature(message, signature, key)
    }

    fn is_valid_key(&self, key: &PublicKey) -> bool {
        is_valid_public_key(key)
    }
}
