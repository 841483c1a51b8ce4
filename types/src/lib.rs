//! Fundamental types for the apollonnode coordination layer.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! hashes, collateral outpoints, amounts, keys, service addresses, payee scripts,
//! timestamps, protocol parameters, and the masternode state enum.

pub mod addr;
pub mod amount;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod outpoint;
pub mod params;
pub mod peer;
pub mod script;
pub mod state;
pub mod time;
pub mod u256;

pub use addr::ServiceAddr;
pub use amount::{Amount, COIN};
pub use error::TypeError;
pub use hash::{BlockHash, MessageHash, TxHash};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use outpoint::OutPoint;
pub use params::{constants, ProtocolParams};
pub use peer::{PeerId, PeerInfo};
pub use script::PayeeScript;
pub use state::MasternodeState;
pub use time::Timestamp;
pub use u256::U256;
