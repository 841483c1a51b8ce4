//! Protocol parameters and fixed protocol constants.

use serde::{Deserialize, Serialize};

use crate::{Amount, NetworkId};

/// Fixed constants of the masternode protocol (seconds unless noted).
pub mod constants {
    /// Minimum interval between two state evaluations of one identity.
    pub const CHECK_SECONDS: u64 = 5;
    /// Minimum interval between two relayed announcements of one identity.
    pub const MIN_MNB_SECONDS: u64 = 5 * 60;
    /// Minimum interval between two pings of one identity.
    pub const MIN_MNP_SECONDS: u64 = 10 * 60;
    pub const EXPIRATION_SECONDS: u64 = 65 * 60;
    pub const WATCHDOG_MAX_SECONDS: u64 = 120 * 60;
    pub const NEW_START_REQUIRED_SECONDS: u64 = 180 * 60;
    /// Future tolerance on signature times.
    pub const MAX_FUTURE_SECONDS: u64 = 60 * 60;

    /// Exact collateral, in whole coins.
    pub const COLLATERAL_COINS: u64 = 5000;

    pub const POSE_BAN_MAX_SCORE: i32 = 5;

    pub const MAX_EXPECTED_INDEX_SIZE: usize = 30_000;
    pub const MIN_INDEX_REBUILD_TIME: u64 = 3600;

    pub const DSEG_UPDATE_SECONDS: u64 = 3 * 60 * 60;
    pub const LAST_PAID_SCAN_BLOCKS: u64 = 100;

    pub const MIN_POSE_PROTO_VERSION: u32 = 70203;
    pub const MAX_POSE_CONNECTIONS: usize = 10;
    pub const MAX_POSE_RANK: usize = 10;
    pub const MAX_POSE_BLOCKS: u64 = 10;

    pub const MNB_RECOVERY_QUORUM_TOTAL: usize = 10;
    pub const MNB_RECOVERY_QUORUM_REQUIRED: usize = 6;
    pub const MNB_RECOVERY_MAX_ASK_ENTRIES: usize = 10;
    pub const MNB_RECOVERY_WAIT_SECONDS: u64 = 60;
    pub const MNB_RECOVERY_RETRY_SECONDS: u64 = 3 * 60 * 60;

    pub const MNPAYMENTS_SIGNATURES_REQUIRED: usize = 6;
    pub const MNPAYMENTS_SIGNATURES_TOTAL: usize = 10;
    /// Votes below this total mark a block as "low data" during sync.
    pub const MNPAYMENTS_LOW_DATA_VOTES: usize = 8;
    /// Minimum votes a tally needs for a payee to count as paid in the
    /// last-paid scan.
    pub const LAST_PAID_MIN_VOTES: usize = 2;
    pub const MIN_BLOCKS_TO_STORE: u64 = 5000;
    /// Lag between the height being paid and the block hash seeding the score.
    pub const PAYMENT_SCORE_LAG: u64 = 101;
    /// Blocks ahead of the tip a masternode votes for.
    pub const PAYMENT_VOTE_AHEAD: u64 = 5;
    /// Blocks after the tip that a vote may target.
    pub const PAYMENT_VOTE_MAX_FUTURE: u64 = 20;
    /// Blocks scanned for an already-scheduled payee.
    pub const SCHEDULED_WINDOW: u64 = 8;
    /// Seconds per registry entry a fresh announcement has to wait before
    /// payment (about one full payment round).
    pub const SECONDS_PER_NODE_ROUND: u64 = 156;

    /// Ping anchors sit this far behind the tip.
    pub const PING_ANCHOR_DEPTH: u64 = 12;
    /// Ping anchors further behind the tip than this are refused.
    pub const PING_MAX_ANCHOR_AGE: u64 = 24;

    pub const SYNC_TICK_SECONDS: u64 = 6;
    pub const SYNC_TIMEOUT_SECONDS: u64 = 30;
    pub const SYNC_ENOUGH_PEERS: usize = 3;
    pub const SYNC_FAILED_COOLDOWN: u64 = 60;
    pub const SYNC_SLEEP_RESET_SECONDS: u64 = 60 * 60;
    pub const SYNC_MAX_HEADER_GAP: u64 = 24 * 6;
}

/// Network-dependent parameters of the masternode protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub network: NetworkId,

    /// Protocol version this node speaks.
    pub protocol_version: u32,

    /// Oldest protocol accepted for payments before the upgrade switch.
    pub min_payments_proto_v1: u32,

    /// Oldest protocol accepted for payments after the upgrade switch.
    pub min_payments_proto_v2: u32,

    /// Whether the network has switched payments to `min_payments_proto_v2`.
    pub enforce_updated_payments_proto: bool,

    /// Confirmations a collateral output needs before it may back a masternode.
    pub min_confirmations: u64,

    /// Height from which payment votes are checked strictly.
    pub payments_validation_height: u64,

    /// Required collateral amount.
    pub collateral: Amount,
}

impl ProtocolParams {
    pub fn for_network(network: NetworkId) -> Self {
        let min_confirmations = match network {
            NetworkId::Live | NetworkId::Test => 15,
            NetworkId::Dev => 1,
        };
        Self {
            network,
            protocol_version: 90030,
            min_payments_proto_v1: 90026,
            min_payments_proto_v2: 90030,
            enforce_updated_payments_proto: false,
            min_confirmations,
            payments_validation_height: 0,
            collateral: Amount::coins(constants::COLLATERAL_COINS),
        }
    }

    /// Minimum protocol a masternode must run to be paid.
    pub fn min_payments_proto(&self) -> u32 {
        if self.enforce_updated_payments_proto {
            self.min_payments_proto_v2
        } else {
            self.min_payments_proto_v1
        }
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self::for_network(NetworkId::Live)
    }
}
