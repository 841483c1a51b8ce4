//! Network identifier.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::TypeError;

/// Identifies which network a node is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development (regression test) network.
    Dev,
}

impl NetworkId {
    /// Default port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Live => 8168,
            Self::Test => 18168,
            Self::Dev => 18444,
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }

    /// Maximum age of the chain tip, in seconds, for the node to still
    /// consider itself caught up.
    pub fn max_tip_age(&self) -> u64 {
        match self {
            Self::Live | Self::Test => 6 * 60 * 60,
            Self::Dev => 0x7fff_ffff,
        }
    }

    /// Service port policy: the live network requires its default port,
    /// every other network must stay off it.
    pub fn check_port(&self, port: u16) -> Result<(), String> {
        let live_port = Self::Live.default_port();
        match self {
            Self::Live if port != live_port => Err(format!(
                "Invalid port: {} - only {} is supported on mainnet.",
                port, live_port
            )),
            Self::Test | Self::Dev if port == live_port => Err(format!(
                "Invalid port: {} - {} is only supported on mainnet.",
                port, live_port
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for NetworkId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" | "main" | "mainnet" => Ok(Self::Live),
            "test" | "testnet" => Ok(Self::Test),
            "dev" | "regtest" => Ok(Self::Dev),
            other => Err(TypeError::UnknownNetwork(other.to_string())),
        }
    }
}
