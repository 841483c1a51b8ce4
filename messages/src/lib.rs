//! Masternode gossip messages.
//!
//! Each payload knows its content hash (for deduplication) and the exact
//! byte string its signature covers. Validation against chain and registry
//! state lives in the service crates; this crate is data plus signing.

pub mod announcement;
pub mod error;
pub mod payment_vote;
pub mod ping;
pub mod verification;
pub mod wire;

pub use announcement::Announcement;
pub use error::MessageError;
pub use payment_vote::PaymentVote;
pub use ping::Ping;
pub use verification::{Verification, VerificationPhase};
pub use wire::{SyncItem, WireMessage, MAX_MESSAGE_SIZE};
