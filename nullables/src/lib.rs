//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern from RsNano.
//! All external collaborators (clock, chain, wallet, peers, random) are
//! abstracted behind traits in `apollon-providers`. This crate provides
//! test-friendly implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod chain;
pub mod clock;
pub mod peers;
pub mod random;
pub mod wallet;

pub use chain::NullChain;
pub use clock::NullClock;
pub use peers::NullPeers;
pub use random::NullRandom;
pub use wallet::NullWallet;
