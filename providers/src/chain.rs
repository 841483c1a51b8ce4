//! Read-only view of the host chain.

use apollon_types::{Amount, BlockHash, OutPoint, PayeeScript, Timestamp};

/// An unspent transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub amount: Amount,
    /// Height of the block that created the output.
    pub height: u64,
    pub script: PayeeScript,
}

pub trait ChainState: Send + Sync {
    /// Height of the active tip, `None` before the genesis block is connected.
    fn current_height(&self) -> Option<u64>;

    fn block_hash_at(&self, height: u64) -> Option<BlockHash>;

    fn block_time_at(&self, height: u64) -> Option<Timestamp>;

    /// Height of a block on the active chain, `None` if unknown or orphaned.
    fn block_height(&self, hash: &BlockHash) -> Option<u64>;

    /// Highest header height known, which may be ahead of the tip.
    fn best_header_height(&self) -> Option<u64>;

    fn utxo(&self, outpoint: &OutPoint) -> Option<Utxo>;

    /// Outputs of the coinbase transaction at `height`.
    fn coinbase_outputs(&self, height: u64) -> Option<Vec<(PayeeScript, Amount)>>;

    /// Masternode share of the block reward at `height`.
    fn masternode_payment(&self, height: u64) -> Amount;

    /// Confirmations of an unspent output (1 when mined in the tip block).
    fn confirmations(&self, outpoint: &OutPoint) -> Option<u64> {
        let tip = self.current_height()?;
        let utxo = self.utxo(outpoint)?;
        Some((tip + 1).saturating_sub(utxo.height))
    }

    fn tip_time(&self) -> Option<Timestamp> {
        self.block_time_at(self.current_height()?)
    }
}
