//! Apollonnode services for a full node.
//!
//! - **config**: node configuration from TOML
//! - **masternode_conf**: the `masternode.conf` alias list
//! - **active**: local activation of this node as an apollonnode
//! - **core**: every service's state plus the collaborators it uses
//! - **processor**: inbound message dispatch
//! - **maintenance**: the periodic tick and per-block hooks
//! - **admin**: start-alias and the JSON status views
//! - **persistence**: registry and payment vote caches
//! - **node**: the services wired to a background task
//! - **logging** / **shutdown**: process plumbing

pub mod active;
pub mod admin;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod masternode_conf;
pub mod node;
pub mod persistence;
pub mod processor;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use active::{ActiveMasternode, ActiveState, MasternodeType, NotCapableReason};
pub use admin::{
    CountView, LocalStatusView, MasternodeView, StartResult, StartSummary, SyncStatusView,
};
pub use config::NodeConfig;
pub use core::{Collaborators, MasternodeCore};
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use maintenance::{spawn_maintenance, MaintenanceSchedule, VERIFICATION_STEP_SECONDS};
pub use masternode_conf::{AliasView, MasternodeConfig, MasternodeEntry};
pub use node::ApollonNode;
pub use persistence::{CachePaths, PAYMENTS_CACHE_FILE, REGISTRY_CACHE_FILE};
pub use shutdown::ShutdownController;
