//! Compact numeric handles for collaterals.
//!
//! Append-only: a collateral keeps its number until the whole index is
//! rebuilt.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use apollon_types::OutPoint;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeIndex {
    by_outpoint: HashMap<OutPoint, u32>,
    by_index: Vec<OutPoint>,
}

impl MasternodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<OutPoint> {
        self.by_index.get(index as usize).copied()
    }

    pub fn index_of(&self, outpoint: &OutPoint) -> Option<u32> {
        self.by_outpoint.get(outpoint).copied()
    }

    /// Assign the next free number unless the collateral already has one.
    pub fn add(&mut self, outpoint: OutPoint) -> u32 {
        if let Some(existing) = self.by_outpoint.get(&outpoint) {
            return *existing;
        }
        let index = self.by_index.len() as u32;
        self.by_index.push(outpoint);
        self.by_outpoint.insert(outpoint, index);
        index
    }

    pub fn clear(&mut self) {
        self.by_outpoint.clear();
        self.by_index.clear();
    }
}
