//! Operator key generation and derivation.

use apollon_types::{KeyPair, PrivateKey, PublicKey};
use ed25519_dalek::SigningKey;

/// Fresh operator key pair from the thread-local CSPRNG.
pub fn generate_keypair() -> KeyPair {
    keypair_from_seed(&rand::random())
}

pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    PublicKey(SigningKey::from_bytes(&private.0).verifying_key().to_bytes())
}

/// Completes a key pair from the private half, e.g. a `masternodeprivkey`.
pub fn keypair_from_private(private: PrivateKey) -> KeyPair {
    KeyPair {
        public: public_from_private(&private),
        private,
    }
}

pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    keypair_from_private(PrivateKey(*seed))
}
