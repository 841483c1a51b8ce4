//! Network-facing bookkeeping for the masternode layer.
//!
//! - **sync**: staged bootstrap of sporks, masternode list and payment votes
//! - **dedup**: rolling set of recently processed message hashes
//! - **fulfilled**: per-peer "already asked / already served" markers

pub mod dedup;
pub mod error;
pub mod fulfilled;
pub mod sync;

pub use dedup::{MessageDedup, DEFAULT_DEDUP_CAPACITY};
pub use error::NetworkError;
pub use fulfilled::{FulfilledRequests, FULFILLED_REQUEST_EXPIRE_SECONDS};
pub use sync::{
    BlockchainSyncInputs, MasternodeSync, SyncAction, SyncEvent, SyncStage, SyncTickInputs,
    SyncView,
};
