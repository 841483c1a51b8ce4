//! apollond: operator tooling for an apollonnode host.
//!
//! The chain, the P2P transport and the wallet belong to the host node,
//! which embeds `apollon-node` directly. This binary covers what an operator
//! does without one: generating operational keys, editing `masternode.conf`
//! and checking the resolved node settings.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;

use apollon_node::{init_logging, LogFormat, MasternodeConfig, NodeConfig};
use apollon_types::NetworkId;

#[derive(Parser)]
#[command(name = "apollond", about = "Apollonnode operator tool")]
struct Cli {
    /// Network: "live", "test" or "dev". Defaults to the config file's value.
    #[arg(long, global = true, env = "APOLLON_NETWORK")]
    network: Option<NetworkId>,

    /// Data directory holding the caches and `masternode.conf`.
    #[arg(long, global = true, env = "APOLLON_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TOML configuration file. CLI flags and env vars override it.
    #[arg(long, global = true, env = "APOLLON_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, global = true, env = "APOLLON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, global = true, env = "APOLLON_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new operational key pair.
    Genkey,
    /// Inspect or edit `masternode.conf`.
    Conf {
        #[command(subcommand)]
        action: ConfAction,
    },
    /// Node settings.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(Subcommand)]
enum ConfAction {
    /// Print every alias as JSON.
    List,
    /// Report entries that cannot be started on the selected network.
    Check,
    /// Append an alias.
    Add {
        alias: String,
        /// `ip:port` the masternode listens on.
        addr: String,
        /// Operational private key (hex).
        operator_key: String,
        collateral_txid: String,
        collateral_index: String,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Print the resolved configuration and protocol parameters.
    Info,
}

/// File settings, then CLI flags and env vars on top.
fn resolve_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            NodeConfig::from_toml_file(&path).with_context(|| format!("reading {path}"))?
        }
        None => NodeConfig::default(),
    };
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn genkey() -> anyhow::Result<()> {
    let keypair = apollon_crypto::generate_keypair();
    print_json(&json!({
        "operator_key": keypair.private.to_hex(),
        "operator_pubkey": keypair.public.to_hex(),
    }))
}

fn conf(action: ConfAction, config: &NodeConfig) -> anyhow::Result<()> {
    let path = config.masternode_config_path();
    let mut aliases = MasternodeConfig::read(&path)?;
    match action {
        ConfAction::List => print_json(&aliases.views(|_| false)),
        ConfAction::Check => {
            let problems = aliases.check(config.network);
            for problem in &problems {
                println!("{problem}");
            }
            if !problems.is_empty() {
                bail!("{} problem(s) in {}", problems.len(), path.display());
            }
            println!("{} alias(es) ok", aliases.count());
            Ok(())
        }
        ConfAction::Add {
            alias,
            addr,
            operator_key,
            collateral_txid,
            collateral_index,
        } => {
            if aliases.find_by_alias(&alias).is_some() {
                bail!("alias {alias} already exists in {}", path.display());
            }
            aliases.add(&alias, &addr, &operator_key, &collateral_txid, &collateral_index);
            let problems: Vec<String> = aliases
                .check(config.network)
                .into_iter()
                .filter(|p| p.starts_with(&alias))
                .collect();
            if !problems.is_empty() {
                bail!("{}", problems.join("; "));
            }
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            aliases.write(&path)?;
            tracing::info!(alias = %alias, path = %path.display(), "alias added");
            Ok(())
        }
    }
}

fn node_info(config: &NodeConfig) -> anyhow::Result<()> {
    let params = config.params();
    let operator_pubkey = config.operator_keypair()?.map(|k| k.public.to_hex());
    let external = config.external_addr()?.map(|a| a.to_string());
    print_json(&json!({
        "network": config.network.as_str(),
        "port": config.p2p_port(),
        "data_dir": config.data_dir.display().to_string(),
        "masternode": config.masternode,
        "external_address": external,
        "operator_pubkey": operator_pubkey,
        "masternode_config": config.masternode_config_path().display().to_string(),
        "protocol_version": params.protocol_version,
        "min_confirmations": params.min_confirmations,
        "collateral": params.collateral.to_string(),
    }))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let format: LogFormat = config.log_format()?;
    init_logging(format, &config.log_level)?;

    match cli.command {
        Command::Genkey => genkey(),
        Command::Conf { action } => conf(action, &config),
        Command::Node {
            action: NodeAction::Info,
        } => node_info(&config),
    }
}
