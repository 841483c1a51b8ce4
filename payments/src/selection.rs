//! Choosing the masternode to be paid at a height.
//!
//! Eligible nodes are sorted oldest-paid first. Only the oldest tenth of the
//! network is considered, and among those the best score against the block
//! [`PAYMENT_SCORE_LAG`] blocks back wins, so the next payee stays hard to
//! predict while payments still rotate fairly.

use std::fmt;

use tracing::debug;

use apollon_providers::Services;
use apollon_registry::{calculate_score, MasternodeIdentity, Registry};
use apollon_types::constants::{PAYMENT_SCORE_LAG, SECONDS_PER_NODE_ROUND};
use apollon_types::{MasternodeState, Timestamp, U256};

/// Why a node cannot be paid right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotQualifyReason {
    NotValidForPayment(MasternodeState),
    ProtocolTooOld { version: u32, min: u32 },
    /// Already the winner of a block in the upcoming window.
    Scheduled,
    TooNew { sig_time: Timestamp, eligible_at: Timestamp },
    CollateralTooYoung { age: u64, required: u64 },
}

impl fmt::Display for NotQualifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotValidForPayment(state) => write!(f, "not valid for payment (status {state})"),
            Self::ProtocolTooOld { version, min } => {
                write!(f, "invalid protocol version {version}, need at least {min}")
            }
            Self::Scheduled => write!(f, "is scheduled"),
            Self::TooNew {
                sig_time,
                eligible_at,
            } => write!(f, "too new (sig time {sig_time}, eligible at {eligible_at})"),
            Self::CollateralTooYoung { age, required } => {
                write!(f, "collateral age {age} is below {required}")
            }
        }
    }
}

/// Facts shared by every candidate of one selection pass.
#[derive(Clone, Copy, Debug)]
pub struct QueueContext {
    pub now: Timestamp,
    pub tip: u64,
    /// Nodes on the payment protocol; one node is paid per block of a round.
    pub count: usize,
    pub min_proto: u32,
    pub filter_recency: bool,
}

pub fn not_qualify_reason(
    node: &MasternodeIdentity,
    scheduled: bool,
    ctx: &QueueContext,
) -> Option<NotQualifyReason> {
    if !node.is_valid_for_payment() {
        return Some(NotQualifyReason::NotValidForPayment(node.state()));
    }
    if node.protocol_version < ctx.min_proto {
        return Some(NotQualifyReason::ProtocolTooOld {
            version: node.protocol_version,
            min: ctx.min_proto,
        });
    }
    if scheduled {
        return Some(NotQualifyReason::Scheduled);
    }
    // announced too recently, wait for a full round
    let eligible_at = node.sig_time.plus(ctx.count as u64 * SECONDS_PER_NODE_ROUND);
    if ctx.filter_recency && eligible_at > ctx.now {
        return Some(NotQualifyReason::TooNew {
            sig_time: node.sig_time,
            eligible_at,
        });
    }
    let age = node.collateral_age(ctx.tip).unwrap_or(0);
    if age < ctx.count as u64 {
        return Some(NotQualifyReason::CollateralTooYoung {
            age,
            required: ctx.count as u64,
        });
    }
    None
}

/// Winner for `height` and the number of eligible nodes.
///
/// When fewer than a third of the network pass the recency filter the pass
/// is repeated without it.
pub fn next_in_queue(
    registry: &Registry,
    height: u64,
    filter_recency: bool,
    svc: &Services<'_>,
    is_scheduled: &dyn Fn(&MasternodeIdentity) -> bool,
) -> (Option<MasternodeIdentity>, usize) {
    let min_proto = svc.params.min_payments_proto();
    let ctx = QueueContext {
        now: svc.now(),
        tip: svc.tip(),
        count: registry.count_nodes(min_proto),
        min_proto,
        filter_recency,
    };

    let mut eligible: Vec<&MasternodeIdentity> = registry
        .iter()
        .filter(|n| not_qualify_reason(n, is_scheduled(n), &ctx).is_none())
        .collect();
    let found = eligible.len();

    if filter_recency && found < ctx.count / 3 {
        debug!(found, count = ctx.count, "too few mature nodes, retrying without recency filter");
        return next_in_queue(registry, height, false, svc, is_scheduled);
    }

    eligible.sort_by(|a, b| {
        a.last_paid_block
            .cmp(&b.last_paid_block)
            .then_with(|| a.outpoint.cmp(&b.outpoint))
    });

    let Some(block_hash) = height
        .checked_sub(PAYMENT_SCORE_LAG)
        .and_then(|h| svc.block_hash(h))
    else {
        debug!(height, "no block to score payment candidates against");
        return (None, found);
    };

    let tenth = ctx.count / 10;
    let mut best: Option<(&MasternodeIdentity, U256)> = None;
    for (i, node) in eligible.iter().enumerate() {
        let score = calculate_score(&node.outpoint, &block_hash);
        if best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((node, score));
        }
        if i + 1 >= tenth {
            break;
        }
    }
    (best.map(|(n, _)| n.clone()), found)
}
