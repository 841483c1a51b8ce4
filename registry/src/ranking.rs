//! Deterministic masternode scores.
//!
//! Every node with the same registry and the same block reaches the same
//! ordering, which is what payment voting and PoSe sharding rely on.

use std::cmp::Ordering;

use apollon_crypto::{blake2b_256, blake2b_256_multi};
use apollon_types::{BlockHash, OutPoint, U256};

/// Score of a collateral against a block.
///
/// `|H(block ‖ aux) - H(block)|` where `aux` is the txid read as a number
/// plus the output index.
pub fn calculate_score(outpoint: &OutPoint, block_hash: &BlockHash) -> U256 {
    let aux = U256::from_le_bytes(*outpoint.txid.as_bytes()).wrapping_add_u32(outpoint.index);
    let plain = U256::from_le_bytes(blake2b_256(block_hash.as_bytes()));
    let mixed = U256::from_le_bytes(blake2b_256_multi(&[
        block_hash.as_bytes(),
        &aux.to_le_bytes(),
    ]));
    mixed.abs_diff(&plain)
}

/// Highest score first, collateral order breaking ties.
pub fn by_score_desc(a: &(U256, OutPoint), b: &(U256, OutPoint)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1))
}

/// Score every outpoint against `block_hash` and sort, best first.
pub fn rank_outpoints<I>(outpoints: I, block_hash: &BlockHash) -> Vec<(U256, OutPoint)>
where
    I: IntoIterator<Item = OutPoint>,
{
    let mut scored: Vec<_> = outpoints
        .into_iter()
        .map(|op| (calculate_score(&op, block_hash), op))
        .collect();
    scored.sort_by(by_score_desc);
    scored
}
