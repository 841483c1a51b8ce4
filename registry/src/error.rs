use thiserror::Error;

use apollon_types::{OutPoint, ServiceAddr};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Sync in progress. Must wait until sync is complete to start Apollonnode")]
    NotSynced,

    #[error("Invalid IP address {0}")]
    InvalidAddress(ServiceAddr),

    #[error("{0}")]
    InvalidPort(String),

    #[error("not enough blocks to anchor a ping")]
    NoAnchorBlock,

    #[error("Failed to sign announcement for {0}")]
    SigningFailed(OutPoint),

    #[error("unknown masternode {0}")]
    UnknownNode(OutPoint),
}
