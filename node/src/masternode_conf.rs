//! `masternode.conf`: the apollonnodes this wallet controls.
//!
//! One record per line:
//!
//! ```text
//! # alias ip:port operational_privkey collateral_txid output_index
//! mn1 45.33.12.7:8168 9f1c...e2 5c0b...71 1
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use apollon_crypto::keypair_from_private;
use apollon_types::{KeyPair, NetworkId, OutPoint, PrivateKey, ServiceAddr, TxHash};

use crate::NodeError;

/// One configured apollonnode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasternodeEntry {
    pub alias: String,
    pub addr: String,
    pub operator_key: String,
    pub txid: String,
    pub index: String,
}

impl MasternodeEntry {
    pub fn outpoint(&self) -> Result<OutPoint, NodeError> {
        let txid: TxHash = self
            .txid
            .parse()
            .map_err(|_| NodeError::Config(format!("{}: invalid collateral txid", self.alias)))?;
        let index: u32 = self
            .index
            .parse()
            .map_err(|_| NodeError::Config(format!("{}: invalid output index", self.alias)))?;
        Ok(OutPoint::new(txid, index))
    }

    pub fn service_addr(&self) -> Result<ServiceAddr, NodeError> {
        self.addr
            .parse()
            .map_err(|_| NodeError::Config(format!("{}: invalid address {}", self.alias, self.addr)))
    }

    pub fn operator_keypair(&self) -> Result<KeyPair, NodeError> {
        let private: PrivateKey = self
            .operator_key
            .parse()
            .map_err(|_| NodeError::InvalidKey(self.alias.clone()))?;
        Ok(keypair_from_private(private))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct OutpointView {
    pub txid: String,
    pub index: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthorityView {
    pub ip: String,
    pub port: u16,
}

/// JSON rendering of one alias.
#[derive(Clone, Debug, Serialize)]
pub struct AliasView {
    pub label: String,
    #[serde(rename = "isMine")]
    pub is_mine: bool,
    pub outpoint: OutpointView,
    pub authority: AuthorityView,
}

#[derive(Clone, Debug, Default)]
pub struct MasternodeConfig {
    entries: Vec<MasternodeEntry>,
}

impl MasternodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the file at `path`. A missing file is an empty config.
    pub fn read(path: &Path) -> Result<Self, NodeError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self, NodeError> {
        let mut config = Self::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [alias, addr, key, txid, index] = fields[..] else {
                return Err(NodeError::AliasConfig {
                    line: n + 1,
                    reason: format!("expected 5 fields, found {}", fields.len()),
                });
            };
            if config.find_by_alias(alias).is_some() {
                return Err(NodeError::AliasConfig {
                    line: n + 1,
                    reason: format!("duplicate alias {alias}"),
                });
            }
            config.add(alias, addr, key, txid, index);
        }
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> Result<(), NodeError> {
        fs::write(path, self.render())?;
        Ok(())
    }

    /// File contents for the current entries.
    pub fn render(&self) -> String {
        let mut out =
            String::from("# alias ip:port operational_privkey collateral_txid output_index\n");
        for e in &self.entries {
            let _ = writeln!(out, "{} {} {} {} {}", e.alias, e.addr, e.operator_key, e.txid, e.index);
        }
        out
    }

    pub fn add(&mut self, alias: &str, addr: &str, operator_key: &str, txid: &str, index: &str) {
        self.entries.push(MasternodeEntry {
            alias: alias.to_string(),
            addr: addr.to_string(),
            operator_key: operator_key.to_string(),
            txid: txid.to_string(),
            index: index.to_string(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[MasternodeEntry] {
        &self.entries
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<&MasternodeEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    pub fn find_by_outpoint(&self, outpoint: &OutPoint) -> Option<&MasternodeEntry> {
        self.entries
            .iter()
            .find(|e| e.outpoint().is_ok_and(|op| op == *outpoint))
    }

    pub fn is_my_node(&self, outpoint: &OutPoint) -> bool {
        self.find_by_outpoint(outpoint).is_some()
    }

    /// Problems with each entry on `network`, one line per problem.
    pub fn check(&self, network: NetworkId) -> Vec<String> {
        let mut problems = Vec::new();
        for e in &self.entries {
            match e.service_addr() {
                Ok(addr) => {
                    if let Err(reason) = network.check_port(addr.port) {
                        problems.push(format!("{}: {reason}", e.alias));
                    }
                    if !addr.is_valid_for(network) {
                        problems.push(format!("{}: address {addr} is not usable on {}", e.alias, network.as_str()));
                    }
                }
                Err(err) => problems.push(err.to_string()),
            }
            if let Err(err) = e.operator_keypair() {
                problems.push(format!("{}: {err}", e.alias));
            }
            if let Err(err) = e.outpoint() {
                problems.push(err.to_string());
            }
        }
        problems
    }

    pub fn views(&self, is_mine: impl Fn(&MasternodeEntry) -> bool) -> Vec<AliasView> {
        self.entries
            .iter()
            .map(|e| {
                let (ip, port) = match e.service_addr() {
                    Ok(addr) => (addr.ip.to_string(), addr.port),
                    Err(_) => (e.addr.clone(), 0),
                };
                AliasView {
                    label: e.alias.clone(),
                    is_mine: is_mine(e),
                    outpoint: OutpointView {
                        txid: e.txid.clone(),
                        index: e.index.clone(),
                    },
                    authority: AuthorityView { ip, port },
                }
            })
            .collect()
    }
}
