//! Nullable wallet: fixed collateral keys held in memory.

use apollon_crypto::keypair_from_seed;
use apollon_providers::{CollateralKeys, Wallet};
use apollon_types::{Amount, OutPoint};
use std::collections::HashSet;
use std::sync::Mutex;

pub struct NullWallet {
    /// Collateral outputs and the seeds of the keys that control them.
    collaterals: Mutex<Vec<(OutPoint, [u8; 32])>>,
    balance: Mutex<Amount>,
    locked: Mutex<bool>,
    locked_coins: Mutex<HashSet<OutPoint>>,
}

impl NullWallet {
    pub fn new() -> Self {
        Self {
            collaterals: Mutex::new(Vec::new()),
            balance: Mutex::new(Amount::ZERO),
            locked: Mutex::new(false),
            locked_coins: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_collateral(&self, outpoint: OutPoint, seed: [u8; 32]) {
        self.collaterals.lock().unwrap().push((outpoint, seed));
    }

    pub fn set_balance(&self, amount: Amount) {
        *self.balance.lock().unwrap() = amount;
    }

    pub fn set_locked(&self, locked: bool) {
        *self.locked.lock().unwrap() = locked;
    }

    pub fn is_coin_locked(&self, outpoint: &OutPoint) -> bool {
        self.locked_coins.lock().unwrap().contains(outpoint)
    }
}

impl Default for NullWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet for NullWallet {
    fn collateral(&self, outpoint: Option<OutPoint>) -> Option<CollateralKeys> {
        let collaterals = self.collaterals.lock().unwrap();
        let (op, seed) = match outpoint {
            Some(wanted) => collaterals.iter().find(|(op, _)| *op == wanted)?,
            None => collaterals.first()?,
        };
        let kp = keypair_from_seed(seed);
        Some(CollateralKeys {
            outpoint: *op,
            public: kp.public,
            private: kp.private,
        })
    }

    fn balance(&self) -> Amount {
        *self.balance.lock().unwrap()
    }

    fn is_locked(&self) -> bool {
        *self.locked.lock().unwrap()
    }

    fn lock_coin(&self, outpoint: OutPoint) {
        self.locked_coins.lock().unwrap().insert(outpoint);
    }
}
