//! Proof of service.
//!
//! - **pose**: challenge/answer/broadcast handshake proving which identity
//!   really runs at an address
//! - **same_addr**: periodic sweep penalizing nodes that share a verified
//!   node's address

pub mod error;
pub mod pose;
pub mod same_addr;

#[cfg(test)]
mod testing;

pub use error::VerificationError;
pub use pose::{
    LocalMasternode, PoseVerifier, VERIFY_DONE, VERIFY_MARKER_SECONDS, VERIFY_REPLY,
    VERIFY_REQUEST,
};
pub use same_addr::{check_same_addr, duplicates_of_verified};
