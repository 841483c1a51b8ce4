//! Error type for parsing and validating fundamental values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid service address: {0}")]
    InvalidAddress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("{0}")]
    Other(String),
}
