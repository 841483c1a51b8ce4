//! Top-level P2P envelope for masternode traffic.
//!
//! Framing and handshakes belong to the transport; this is only the
//! logical message set and its bincode encoding.

use serde::{Deserialize, Serialize};

use apollon_types::{MessageHash, OutPoint};

use crate::{Announcement, MessageError, PaymentVote, Ping, Verification};

/// Maximum encoded message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Data set named in a `SyncStatus` reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncItem {
    List,
    PaymentVotes,
}

impl SyncItem {
    /// Numeric asset id carried on the wire by older peers.
    pub fn asset_id(&self) -> i32 {
        match self {
            Self::List => 2,
            Self::PaymentVotes => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Announce(Announcement),
    Ping(Ping),
    /// Ask for the whole registry (`None`) or one identity.
    GetList(Option<OutPoint>),
    Verify(Verification),
    /// Ask for stored payment votes. `count` hints at the sender's storage window.
    PaymentVoteSyncRequest { count: u32 },
    PaymentVote(PaymentVote),
    /// Ask for every vote on specific heights.
    PaymentBlockRequest { heights: Vec<u64> },
    SporkSyncRequest,
    SyncStatus { item: SyncItem, count: u32 },
}

impl WireMessage {
    /// Every value [`command`](Self::command) can return.
    pub const COMMANDS: [&'static str; 9] = [
        "mnb", "mnp", "dseg", "mnv", "mnget", "mnw", "mnwb", "getsporks", "ssc",
    ];

    /// Short command name, for logs and statistics.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Announce(_) => "mnb",
            Self::Ping(_) => "mnp",
            Self::GetList(_) => "dseg",
            Self::Verify(_) => "mnv",
            Self::PaymentVoteSyncRequest { .. } => "mnget",
            Self::PaymentVote(_) => "mnw",
            Self::PaymentBlockRequest { .. } => "mnwb",
            Self::SporkSyncRequest => "getsporks",
            Self::SyncStatus { .. } => "ssc",
        }
    }

    /// Content hash for gossip payloads; requests have none.
    pub fn content_hash(&self) -> Option<MessageHash> {
        match self {
            Self::Announce(mnb) => Some(mnb.hash()),
            Self::Ping(mnp) => Some(mnp.hash()),
            Self::Verify(mnv) => Some(mnv.hash()),
            Self::PaymentVote(vote) => Some(vote.hash()),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let bytes =
            bincode::serialize(self).map_err(|e| MessageError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}
