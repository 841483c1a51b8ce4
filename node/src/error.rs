use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("registry error: {0}")]
    Registry(#[from] apollon_registry::RegistryError),

    #[error("payment error: {0}")]
    Payment(#[from] apollon_payments::PaymentError),

    #[error("verification error: {0}")]
    Verification(#[from] apollon_verification::VerificationError),

    #[error("network error: {0}")]
    Network(#[from] apollon_network::NetworkError),

    #[error("config error: {0}")]
    Config(String),

    #[error("masternode.conf line {line}: {reason}")]
    AliasConfig { line: usize, reason: String },

    #[error("Could not find alias in config. Verify with list-conf.")]
    UnknownAlias(String),

    #[error("Invalid apollonnode key {0}")]
    InvalidKey(String),

    #[error("Error: Please enter the wallet passphrase with walletpassphrase first.")]
    WalletLocked,

    #[error("Could not allocate outpoint {0} for apollonnode")]
    CollateralNotFound(String),

    #[error("This is not an apollonnode")]
    NotMasternode,

    #[error("You can't use this command until apollonnode list is synced")]
    ListNotSynced,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,

    #[error("{0}")]
    Other(String),
}
