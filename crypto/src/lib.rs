//! Cryptographic primitives for the apollonnode layer.
//!
//! - **Ed25519** for announcement, ping, vote and verification signatures
//! - **Blake2b** for content hashes, key ids and masternode scores

pub mod hash;
pub mod keys;
pub mod sign;
pub mod signer;

pub use hash::{blake2b_256, blake2b_256_multi, key_id};
pub use keys::{generate_keypair, keypair_from_private, keypair_from_seed, public_from_private};
pub use sign::{is_valid_public_key, sign_message, verify_signature};
pub use signer::{Ed25519Signer, Signer};
