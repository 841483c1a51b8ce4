//! Wallet access for local collateral.

use apollon_types::{Amount, OutPoint, PrivateKey, PublicKey};

/// A collateral output together with the key that controls it.
pub struct CollateralKeys {
    pub outpoint: OutPoint,
    pub public: PublicKey,
    pub private: PrivateKey,
}

pub trait Wallet: Send + Sync {
    /// Collateral output and keys, either the given outpoint or the first
    /// suitable one when `outpoint` is `None`.
    fn collateral(&self, outpoint: Option<OutPoint>) -> Option<CollateralKeys>;

    fn balance(&self) -> Amount;

    fn is_locked(&self) -> bool;

    /// Mark an output as not spendable by coin selection.
    fn lock_coin(&self, outpoint: OutPoint);
}
