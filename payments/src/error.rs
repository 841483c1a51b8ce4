use thiserror::Error;

use apollon_types::OutPoint;

/// Why this node did not cast a payment vote.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("not running as a masternode")]
    NotMasternode,

    #[error("masternode list not synced")]
    ListNotSynced,

    #[error("unknown block at height {0}")]
    UnknownBlock(u64),

    #[error("masternode {0} has no rank at height {1}")]
    Unranked(OutPoint, u64),

    #[error("masternode not in the top {limit} (rank {rank})")]
    NotInTop { rank: u32, limit: usize },

    #[error("no masternode qualifies for payment at height {0}")]
    NoPayee(u64),

    #[error("vote for height {0} was not stored")]
    NotStored(u64),
}
