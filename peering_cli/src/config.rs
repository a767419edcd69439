use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Trusted peering node tool.
///
/// Manages the node identity and the trusted peer list of a peering node, and runs simulated clusters.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Directory holding the node files. The default is `$HOME/.trusted-peering`.
    #[arg(long = "data-dir", short = 'd', env = "PEERING_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create or show the node identity.
    #[command(subcommand, name = "id")]
    Id(IdCommand),
    /// Add, remove or list trusted peers.
    #[command(subcommand, name = "trust")]
    Trust(TrustCommand),
    /// Write the default peering configuration, or show the current one.
    #[command(subcommand, name = "config")]
    Settings(SettingsCommand),
    /// Run a cluster of in-process nodes that broadcast to each other.
    #[command(name = "simulate", alias = "sim")]
    Simulate(SimulateCommand),
}

#[derive(Debug, Subcommand)]
pub enum IdCommand {
    /// Create a new node identity.
    #[command(name = "new", alias = "create")]
    Create {
        /// The name of the node.
        name: String,
        /// Replace an existing identity.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Show the node identity and its public key.
    #[command(name = "show")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TrustCommand {
    /// Trust a peer, or update the record of a trusted peer.
    #[command(name = "add")]
    Add {
        /// A name for the peer.
        name: String,
        /// The peer's public key, hex encoded.
        pub_key: String,
        /// Where to reach the peer: `host:port`, or a multiaddr.
        peering_url: String,
    },
    /// Stop trusting a peer, given its name or public key.
    #[command(name = "remove", alias = "rm")]
    Remove { peer: String },
    /// List all trusted peers.
    #[command(name = "list", alias = "ls")]
    List,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Write the default configuration file.
    #[command(name = "init")]
    Init,
    /// Show the configuration in effect.
    #[command(name = "show")]
    Show,
}

#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// Number of nodes in the cluster.
    #[arg(long, short = 'n', default_value_t = 4)]
    pub nodes: usize,
    /// Number of messages each node broadcasts.
    #[arg(long, short = 'm', default_value_t = 10)]
    pub messages: u32,
    /// Seconds to wait for every message to arrive.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

pub struct GlobalOptions {
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        (GlobalOptions { data_dir: self.data_dir }, self.command)
    }
}
