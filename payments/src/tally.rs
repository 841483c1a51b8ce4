//! Per-block payee tallies.

use serde::{Deserialize, Serialize};
use tracing::warn;

use apollon_messages::PaymentVote;
use apollon_types::constants::MNPAYMENTS_SIGNATURES_REQUIRED;
use apollon_types::{Amount, MessageHash, PayeeScript};

/// Votes collected for one payee at one height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayeeEntry {
    pub payee: PayeeScript,
    pub vote_hashes: Vec<MessageHash>,
}

impl PayeeEntry {
    pub fn vote_count(&self) -> usize {
        self.vote_hashes.len()
    }
}

/// Every payee nominated for one block height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayeeTally {
    pub height: u64,
    payees: Vec<PayeeEntry>,
}

impl BlockPayeeTally {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            payees: Vec::new(),
        }
    }

    pub fn payees(&self) -> &[PayeeEntry] {
        &self.payees
    }

    /// Count `vote` towards its payee. A vote hash is counted at most once.
    pub fn add_vote(&mut self, vote: &PaymentVote) {
        let hash = vote.hash();
        match self.payees.iter_mut().find(|e| e.payee == vote.payee) {
            Some(entry) => {
                if !entry.vote_hashes.contains(&hash) {
                    entry.vote_hashes.push(hash);
                }
            }
            None => self.payees.push(PayeeEntry {
                payee: vote.payee.clone(),
                vote_hashes: vec![hash],
            }),
        }
    }

    /// Payee with the most votes. The first payee to reach a count keeps it
    /// on a tie.
    pub fn best_payee(&self) -> Option<&PayeeScript> {
        let mut best: Option<&PayeeEntry> = None;
        for entry in &self.payees {
            if best.map_or(true, |b| entry.vote_count() > b.vote_count()) {
                best = Some(entry);
            }
        }
        best.map(|e| &e.payee)
    }

    pub fn has_payee_with_votes(&self, payee: &PayeeScript, min_votes: usize) -> bool {
        self.payees
            .iter()
            .any(|e| e.payee == *payee && e.vote_count() >= min_votes)
    }

    pub fn vote_count(&self) -> usize {
        self.payees.iter().map(PayeeEntry::vote_count).sum()
    }

    pub fn max_votes(&self) -> usize {
        self.payees
            .iter()
            .map(PayeeEntry::vote_count)
            .max()
            .unwrap_or(0)
    }

    /// Whether the coinbase `outputs` pay a payee the network agreed on.
    ///
    /// Without a payee at [`MNPAYMENTS_SIGNATURES_REQUIRED`] votes there is no
    /// agreement and any payment is accepted.
    pub fn is_transaction_valid(&self, outputs: &[(PayeeScript, Amount)], reward: Amount) -> bool {
        if self.max_votes() < MNPAYMENTS_SIGNATURES_REQUIRED {
            return true;
        }
        let decided = self
            .payees
            .iter()
            .filter(|e| e.vote_count() >= MNPAYMENTS_SIGNATURES_REQUIRED);
        let mut expected = Vec::new();
        for entry in decided {
            if outputs
                .iter()
                .any(|(script, amount)| *script == entry.payee && *amount == reward)
            {
                return true;
            }
            expected.push(entry.payee.to_string());
        }
        warn!(
            height = self.height,
            expected = %expected.join(", "),
            reward = reward.raw(),
            "missing required masternode payment"
        );
        false
    }

    /// `payee:votes` for every nominated payee.
    pub fn required_payments_string(&self) -> String {
        let parts: Vec<String> = self
            .payees
            .iter()
            .map(|e| format!("{}:{}", e.payee, e.vote_count()))
            .collect();
        if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(", ")
        }
    }
}
