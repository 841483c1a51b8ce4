use thiserror::Error;

/// Why this node skipped its share of address verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("not running as an activated masternode")]
    NotMasternode,

    #[error("masternode sync not finished")]
    NotSynced,

    #[error("unknown block at height {0}")]
    UnknownBlock(u64),

    #[error("own masternode has no rank at height {0}")]
    Unranked(u64),

    #[error("masternode not in the top {limit} (rank {rank})")]
    NotInTop { rank: u32, limit: usize },
}
