//! Blake2b-256 content hashes and key ids.

use apollon_types::PublicKey;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    blake2b_256_multi(&[data])
}

/// Hash of the concatenation of `parts`, without building it.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    parts
        .iter()
        .fold(Blake2b256::new(), |hasher, part| hasher.chain_update(part))
        .finalize()
        .into()
}

/// Identifier of a public key, as it appears in signing payloads.
pub fn key_id(key: &PublicKey) -> [u8; 32] {
    blake2b_256(key.as_bytes())
}
