//! Masternode payments.
//!
//! - **tally**: votes per payee for one block height
//! - **selection**: who is next in the payment queue, and why others are not
//! - **payments**: vote store, vote validation and sync, coinbase checks

pub mod error;
pub mod payments;
pub mod selection;
pub mod tally;

#[cfg(test)]
mod testing;

pub use error::PaymentError;
pub use payments::{LocalVoter, MasternodePayments, VOTE_SYNC_REQUEST};
pub use selection::{next_in_queue, not_qualify_reason, NotQualifyReason, QueueContext};
pub use tally::{BlockPayeeTally, PayeeEntry};
