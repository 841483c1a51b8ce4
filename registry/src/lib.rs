//! The masternode registry.
//!
//! - **identity**: one masternode and its state machine
//! - **announce**: announcement and ping validation, local creation
//! - **registry**: the list itself, list sync, recovery and maintenance
//! - **ranking**: deterministic scores against a block hash
//! - **index**: compact numeric handles for collaterals

pub mod announce;
pub mod error;
pub mod identity;
pub mod index;
pub mod ranking;
pub mod registry;
pub mod verdict;

pub use announce::{
    check_outpoint, check_ping, create_announcement, new_ping, ping_simple_check, simple_check,
    AnnouncementKeys, LocalNode, OutpointCheck, SimpleCheck,
};
pub use error::RegistryError;
pub use identity::{CheckContext, Evaluation, MasternodeIdentity, Transition};
pub use index::MasternodeIndex;
pub use ranking::{by_score_desc, calculate_score, rank_outpoints};
pub use registry::{AnnounceOutcome, PayeeVotes, Registry};
pub use verdict::Verdict;
