//! Apollonnode settings: network, data directory, operator identity and
//! maintenance cadence, read from TOML.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use apollon_crypto::keypair_from_private;
use apollon_types::{KeyPair, NetworkId, PrivateKey, ProtocolParams, ServiceAddr};

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for an apollonnode host.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to join.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Directory for the registry and payment caches.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// P2P port; the network's default port when unset.
    #[serde(default)]
    pub port: Option<u16>,

    /// Run as an apollonnode.
    #[serde(default)]
    pub masternode: bool,

    /// Public address to announce, `ip` or `ip:port`. Detected from peers
    /// when unset.
    #[serde(default)]
    pub external_address: Option<String>,

    /// Operational private key (hex). Required in masternode mode.
    #[serde(default)]
    pub operator_key: Option<String>,

    /// Alias config, relative to `data_dir` unless absolute.
    #[serde(default = "default_masternode_config")]
    pub masternode_config: PathBuf,

    /// Allow signing announcements before the chain is synced.
    #[serde(default)]
    pub offline_signing: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base maintenance tick.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Local activation interval.
    #[serde(default = "default_manage_state_secs")]
    pub manage_state_secs: u64,

    /// Registry, payment and verification cleanup interval.
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./apollon_data")
}

fn default_masternode_config() -> PathBuf {
    PathBuf::from("masternode.conf")
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_secs() -> u64 {
    1
}

fn default_manage_state_secs() -> u64 {
    apollon_types::constants::CHECK_SECONDS
}

fn default_cleanup_secs() -> u64 {
    60
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn params(&self) -> ProtocolParams {
        ProtocolParams::for_network(self.network)
    }

    pub fn p2p_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.network.default_port())
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    pub fn masternode_config_path(&self) -> PathBuf {
        if self.masternode_config.is_absolute() {
            self.masternode_config.clone()
        } else {
            self.data_dir.join(&self.masternode_config)
        }
    }

    /// Configured external address. A bare IP gets the P2P port.
    pub fn external_addr(&self) -> Result<Option<ServiceAddr>, NodeError> {
        let Some(raw) = self.external_address.as_deref() else {
            return Ok(None);
        };
        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(Some(ServiceAddr::new(ip, self.p2p_port())));
        }
        raw.parse()
            .map(Some)
            .map_err(|e| NodeError::Config(format!("external_address {raw}: {e}")))
    }

    /// Operational key pair, `None` when no key is configured.
    pub fn operator_keypair(&self) -> Result<Option<KeyPair>, NodeError> {
        let Some(raw) = self.operator_key.as_deref() else {
            return Ok(None);
        };
        let private: PrivateKey = raw
            .trim()
            .parse()
            .map_err(|_| NodeError::InvalidKey(raw.chars().take(8).collect()))?;
        Ok(Some(keypair_from_private(private)))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_dir: default_data_dir(),
            port: None,
            masternode: false,
            external_address: None,
            operator_key: None,
            masternode_config: default_masternode_config(),
            offline_signing: false,
            log_format: default_log_format(),
            log_level: default_log_level(),
            tick_secs: default_tick_secs(),
            manage_state_secs: default_manage_state_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_config_reads_back() {
        let config = NodeConfig {
            operator_key: Some("11".repeat(32)),
            ..NodeConfig::default()
        };
        let toml_str = config.to_toml_string().expect("serialize");
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.network, config.network);
        assert_eq!(parsed.operator_key, config.operator_key);
        assert_eq!(parsed.cleanup_secs, 60);
    }

    #[test]
    fn empty_file_means_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network, NetworkId::Dev);
        assert!(!config.masternode);
        assert_eq!(config.log_format, "human");
        assert_eq!(config.manage_state_secs, 5);
        assert_eq!(config.p2p_port(), NetworkId::Dev.default_port());
    }

    #[test]
    fn file_values_replace_defaults() {
        let toml = r#"
            network = "live"
            masternode = true
            external_address = "8.8.8.8"
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.network, NetworkId::Live);
        assert!(config.masternode);
        assert_eq!(
            config.external_addr().expect("addr"),
            Some(ServiceAddr::v4(8, 8, 8, 8, 8168))
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn alias_config_is_relative_to_data_dir() {
        let config = NodeConfig::default();
        assert_eq!(
            config.masternode_config_path(),
            PathBuf::from("./apollon_data/masternode.conf")
        );
    }

    #[test]
    fn bad_operator_key_is_rejected() {
        let config = NodeConfig {
            operator_key: Some("not-hex".into()),
            ..NodeConfig::default()
        };
        assert!(matches!(config.operator_keypair(), Err(NodeError::InvalidKey(_))));
        assert!(NodeConfig::default().operator_keypair().expect("none").is_none());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/apollon.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
