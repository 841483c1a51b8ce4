//! Bundle of collaborators handed to every service operation.

use apollon_crypto::Signer;
use apollon_types::{BlockHash, ProtocolParams, Timestamp};

use crate::{ChainState, Clock, PeerSet, RandomSource};

/// Borrowed collaborators for one call. Cheap to copy.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub chain: &'a dyn ChainState,
    pub peers: &'a dyn PeerSet,
    pub signer: &'a dyn Signer,
    pub clock: &'a dyn Clock,
    pub random: &'a dyn RandomSource,
    pub params: &'a ProtocolParams,
}

impl<'a> Services<'a> {
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Current tip height, 0 before genesis.
    pub fn tip(&self) -> u64 {
        self.chain.current_height().unwrap_or(0)
    }

    pub fn block_hash(&self, height: u64) -> Option<BlockHash> {
        self.chain.block_hash_at(height)
    }
}
