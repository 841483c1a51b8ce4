//! Nullable chain: an in-memory block list and UTXO set.

use apollon_crypto::blake2b_256;
use apollon_providers::{ChainState, Utxo};
use apollon_types::{Amount, BlockHash, OutPoint, PayeeScript, Timestamp};
use std::collections::HashMap;
use std::sync::Mutex;

/// Seconds between generated blocks.
pub const BLOCK_SPACING: u64 = 150;

/// A deterministic chain for testing.
///
/// Block hashes are derived from the height, so two chains built the same
/// way agree on every hash.
pub struct NullChain {
    blocks: Mutex<Vec<(BlockHash, Timestamp)>>,
    best_header: Mutex<Option<u64>>,
    utxos: Mutex<HashMap<OutPoint, Utxo>>,
    coinbases: Mutex<HashMap<u64, Vec<(PayeeScript, Amount)>>>,
    masternode_payment: Mutex<Amount>,
}

impl NullChain {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            best_header: Mutex::new(None),
            utxos: Mutex::new(HashMap::new()),
            coinbases: Mutex::new(HashMap::new()),
            masternode_payment: Mutex::new(Amount::coins(10)),
        }
    }

    /// A chain with blocks `0..=height`, the tip stamped at `tip_time`.
    pub fn with_height(height: u64, tip_time: u64) -> Self {
        let chain = Self::new();
        let start = tip_time.saturating_sub(height * BLOCK_SPACING);
        {
            let mut blocks = chain.blocks.lock().unwrap();
            for h in 0..=height {
                blocks.push((Self::hash_for(h), Timestamp::new(start + h * BLOCK_SPACING)));
            }
        }
        chain
    }

    pub fn hash_for(height: u64) -> BlockHash {
        BlockHash::new(blake2b_256(&height.to_le_bytes()))
    }

    /// Append one block stamped at `time`.
    pub fn push_block(&self, time: Timestamp) -> u64 {
        let mut blocks = self.blocks.lock().unwrap();
        let height = blocks.len() as u64;
        blocks.push((Self::hash_for(height), time));
        height
    }

    pub fn set_best_header(&self, height: Option<u64>) {
        *self.best_header.lock().unwrap() = height;
    }

    pub fn add_utxo(&self, outpoint: OutPoint, utxo: Utxo) {
        self.utxos.lock().unwrap().insert(outpoint, utxo);
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        self.utxos.lock().unwrap().remove(outpoint);
    }

    pub fn set_coinbase(&self, height: u64, outputs: Vec<(PayeeScript, Amount)>) {
        self.coinbases.lock().unwrap().insert(height, outputs);
    }

    pub fn set_masternode_payment(&self, amount: Amount) {
        *self.masternode_payment.lock().unwrap() = amount;
    }
}

impl Default for NullChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainState for NullChain {
    fn current_height(&self) -> Option<u64> {
        let blocks = self.blocks.lock().unwrap();
        (blocks.len() as u64).checked_sub(1)
    }

    fn block_hash_at(&self, height: u64) -> Option<BlockHash> {
        self.blocks
            .lock()
            .unwrap()
            .get(height as usize)
            .map(|(hash, _)| *hash)
    }

    fn block_time_at(&self, height: u64) -> Option<Timestamp> {
        self.blocks
            .lock()
            .unwrap()
            .get(height as usize)
            .map(|(_, time)| *time)
    }

    fn block_height(&self, hash: &BlockHash) -> Option<u64> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .position(|(h, _)| h == hash)
            .map(|p| p as u64)
    }

    fn best_header_height(&self) -> Option<u64> {
        let explicit = *self.best_header.lock().unwrap();
        explicit.or_else(|| self.current_height())
    }

    fn utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.lock().unwrap().get(outpoint).cloned()
    }

    fn coinbase_outputs(&self, height: u64) -> Option<Vec<(PayeeScript, Amount)>> {
        self.coinbases.lock().unwrap().get(&height).cloned()
    }

    fn masternode_payment(&self, _height: u64) -> Amount {
        *self.masternode_payment.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollon_types::TxHash;

    #[test]
    fn generated_chain_has_expected_tip() {
        let chain = NullChain::with_height(200, 1_000_000);
        assert_eq!(chain.current_height(), Some(200));
        assert_eq!(chain.tip_time(), Some(Timestamp::new(1_000_000)));
        assert_eq!(chain.block_hash_at(5), Some(NullChain::hash_for(5)));
        assert!(chain.block_hash_at(201).is_none());
        assert_eq!(chain.block_height(&NullChain::hash_for(7)), Some(7));
        assert_eq!(chain.block_height(&NullChain::hash_for(500)), None);
    }

    #[test]
    fn confirmations_count_the_mining_block() {
        let chain = NullChain::with_height(100, 1_000_000);
        let op = OutPoint::new(TxHash::new([1; 32]), 0);
        chain.add_utxo(
            op,
            Utxo {
                amount: Amount::coins(1),
                height: 100,
                script: PayeeScript::default(),
            },
        );
        assert_eq!(chain.confirmations(&op), Some(1));
        chain.spend(&op);
        assert_eq!(chain.confirmations(&op), None);
    }
}
