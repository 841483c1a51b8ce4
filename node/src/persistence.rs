//! On-disk caches of the registry and the payment votes.
//!
//! Each file is a bincode header (magic string and network) followed by the
//! bincode body. A cache written for another network, or by another kind of
//! file, is refused as a whole.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use apollon_payments::MasternodePayments;
use apollon_registry::Registry;
use apollon_types::NetworkId;

use crate::NodeError;

pub const REGISTRY_CACHE_FILE: &str = "mncache.bin";
pub const PAYMENTS_CACHE_FILE: &str = "mnpayments.bin";

const REGISTRY_MAGIC: &str = "ApollonnodeCache";
const PAYMENTS_MAGIC: &str = "ApollonnodePaymentsCache";

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CacheHeader {
    magic: String,
    network: NetworkId,
}

/// Write `value` to `path` under the given magic, replacing any old file.
pub fn save<T: Serialize>(
    path: &Path,
    magic: &str,
    network: NetworkId,
    value: &T,
) -> Result<(), NodeError> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let header = CacheHeader {
            magic: magic.to_string(),
            network,
        };
        bincode::serialize_into(&mut writer, &header)
            .map_err(|e| NodeError::Cache(e.to_string()))?;
        bincode::serialize_into(&mut writer, value)
            .map_err(|e| NodeError::Cache(e.to_string()))?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a cache written by [`save`]. `Ok(None)` when there is no file.
pub fn load<T: DeserializeOwned>(
    path: &Path,
    magic: &str,
    network: NetworkId,
) -> Result<Option<T>, NodeError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let header: CacheHeader = bincode::deserialize(&bytes)
        .map_err(|e| NodeError::Cache(format!("{}: bad header: {e}", path.display())))?;
    if header.magic != magic {
        return Err(NodeError::Cache(format!(
            "{}: unexpected magic {}",
            path.display(),
            header.magic
        )));
    }
    if header.network != network {
        return Err(NodeError::Cache(format!(
            "{}: written for network {}",
            path.display(),
            header.network.as_str()
        )));
    }
    let offset = bincode::serialized_size(&header)
        .map_err(|e| NodeError::Cache(e.to_string()))? as usize;
    let value = bincode::deserialize(&bytes[offset..])
        .map_err(|e| NodeError::Cache(format!("{}: {e}", path.display())))?;
    Ok(Some(value))
}

/// Paths of both caches inside the data directory.
#[derive(Clone, Debug)]
pub struct CachePaths {
    pub registry: PathBuf,
    pub payments: PathBuf,
}

impl CachePaths {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            registry: data_dir.join(REGISTRY_CACHE_FILE),
            payments: data_dir.join(PAYMENTS_CACHE_FILE),
        }
    }

    /// Load both caches. Anything unreadable is logged and replaced by
    /// empty state.
    pub fn load(&self, network: NetworkId) -> (Registry, MasternodePayments) {
        let registry = match load::<Registry>(&self.registry, REGISTRY_MAGIC, network) {
            Ok(Some(registry)) => {
                info!(nodes = registry.len(), "loaded masternode cache");
                registry
            }
            Ok(None) => Registry::new(),
            Err(e) => {
                warn!(error = %e, "cannot load masternode cache, starting empty");
                Registry::new()
            }
        };
        let payments = match load::<MasternodePayments>(&self.payments, PAYMENTS_MAGIC, network) {
            Ok(Some(payments)) => {
                info!(votes = payments.vote_count(), "loaded payment vote cache");
                payments
            }
            Ok(None) => MasternodePayments::new(),
            Err(e) => {
                warn!(error = %e, "cannot load payment vote cache, starting empty");
                MasternodePayments::new()
            }
        };
        (registry, payments)
    }

    pub fn save(
        &self,
        network: NetworkId,
        registry: &Registry,
        payments: &MasternodePayments,
    ) -> Result<(), NodeError> {
        save(&self.registry, REGISTRY_MAGIC, network, registry)?;
        save(&self.payments, PAYMENTS_MAGIC, network, payments)?;
        info!(
            nodes = registry.len(),
            votes = payments.vote_count(),
            "masternode caches written"
        );
        Ok(())
    }
}
