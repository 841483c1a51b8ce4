//! Ed25519 signatures over masternode message payloads.

use apollon_types::{PrivateKey, PublicKey, Signature};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    Signature(SigningKey::from_bytes(&private_key.0).sign(message).to_bytes())
}

/// Strict verification: weak (small-order) keys and non-canonical
/// signatures are rejected, so one announcement has exactly one valid
/// signature per key.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    key.verify_strict(message, &ed25519_dalek::Signature::from_bytes(&signature.0))
        .is_ok()
}

/// Whether the bytes are a usable operator or collateral key.
pub fn is_valid_public_key(public_key: &PublicKey) -> bool {
    VerifyingKey::from_bytes(&public_key.0).is_ok_and(|key| !key.is_weak())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_seed;

    #[test]
    fn ping_payload_round_trips() {
        let operator = keypair_from_seed(&[3; 32]);
        let sig = sign_message(b"outpoint|blockhash|sigtime", &operator.private);
        assert!(verify_signature(b"outpoint|blockhash|sigtime", &sig, &operator.public));
        assert!(!verify_signature(b"outpoint|blockhash|sigtime2", &sig, &operator.public));
    }

    #[test]
    fn another_operator_cannot_vouch() {
        let ours = keypair_from_seed(&[3; 32]);
        let theirs = keypair_from_seed(&[4; 32]);
        let sig = sign_message(b"mnv", &ours.private);
        assert!(!verify_signature(b"mnv", &sig, &theirs.public));
    }

    #[test]
    fn garbage_and_weak_keys_are_unusable() {
        let identity = {
            let mut bytes = [0u8; 32];
            bytes[0] = 1;
            PublicKey(bytes)
        };
        assert!(!is_valid_public_key(&identity));
        assert!(is_valid_public_key(&keypair_from_seed(&[5; 32]).public));

        let sig = sign_message(b"x", &keypair_from_seed(&[5; 32]).private);
        assert!(!verify_signature(b"x", &sig, &identity));
    }
}
