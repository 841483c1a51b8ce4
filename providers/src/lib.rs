//! Abstract collaborator traits for the apollonnode services.
//!
//! The chain engine, wallet and P2P transport are external to this layer.
//! The rest of the workspace depends only on these traits; production
//! adapters live with the host node and test doubles in `apollon-nullables`.

pub mod chain;
pub mod clock;
pub mod peers;
pub mod services;
pub mod wallet;

pub use apollon_crypto::{Ed25519Signer, Signer};
pub use chain::{ChainState, Utxo};
pub use clock::{Clock, RandomSource, SystemClock, SystemRandom};
pub use peers::PeerSet;
pub use services::Services;
pub use wallet::{CollateralKeys, Wallet};
