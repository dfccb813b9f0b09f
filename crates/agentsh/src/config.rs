//! # Configuration
//!
//! Settings come from an optional TOML file, then the command line. A flag
//! given on the command line always wins over the file, and the file wins over
//! the built-in defaults.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use agentsh_core::ShellConfig;
use agentsh_core::discover::DEFAULT_ITEM_TIMEOUT;
use agentsh_core::platform::Location;

pub const DEFAULT_CONFIG_FILE: &str = "agentsh.toml";
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 12367;

#[derive(Parser, Debug, Default)]
#[command(name = "agentsh")]
#[command(version, about = "Interactive shell for a peer-to-peer agent platform", long_about = None)]
pub struct Cli {
    /// Name of the local peer
    #[arg(value_name = "NAME")]
    pub name: Option<String>,

    /// Locator host advertised by this peer
    #[arg(short = 'e', long)]
    pub address: Option<String>,

    /// Locator port advertised by this peer
    #[arg(short = 'r', long)]
    pub port: Option<u16>,

    /// Join the network right after start-up
    #[arg(short = 'j', long)]
    pub join: bool,

    /// Run without the console; stop on Ctrl-C
    #[arg(long)]
    pub headless: bool,

    /// Directory `mkagent <file>` reads from
    #[arg(short = 'a', long, value_name = "DIR")]
    pub agent_dir: Option<PathBuf>,

    /// Agent description file, or a directory of them, to load at start-up
    #[arg(short = 'A', long, value_name = "PATH")]
    pub agent_file: Option<PathBuf>,

    /// Configuration file
    #[arg(short = 'p', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Ignore the configuration file
    #[arg(long, conflicts_with = "config")]
    pub no_config: bool,
}

/// The TOML file as written. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub peer_name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub autojoin: Option<bool>,
    pub interactive: Option<bool>,
    pub agent_dir: Option<PathBuf>,
    pub agent_file: Option<PathBuf>,
    pub discovery_timeout_ms: Option<u64>,
    pub async_item_timeout_ms: Option<u64>,
    pub pump_concurrency: Option<usize>,
    pub location: Option<[f64; 2]>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// A simulated remote peer of the in-process mesh.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub name: String,
    pub location: Option<[f64; 2]>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl PeerConfig {
    pub fn location(&self) -> Option<Location> {
        self.location.map(point)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub class: String,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<[f64; 2]>,
}

impl AgentConfig {
    pub fn location(&self) -> Option<Location> {
        self.location.map(point)
    }
}

fn point([lng, lat]: [f64; 2]) -> Location {
    Location::new(lng, lat)
}

/// Fully resolved settings.
#[derive(Debug)]
pub struct Config {
    pub peer_name: String,
    pub address: String,
    pub port: u16,
    pub autojoin: bool,
    pub interactive: bool,
    pub agent_file: Option<PathBuf>,
    pub location: Option<Location>,
    pub peers: Vec<PeerConfig>,
    pub shell: ShellConfig,
}

impl Config {
    /// The locator string shown by `info`.
    pub fn locator(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Merges the command line over the file.
    pub fn resolve(cli: Cli, file: FileConfig) -> anyhow::Result<Self> {
        let agent_dir = cli.agent_dir.or(file.agent_dir).unwrap_or_else(|| PathBuf::from("."));
        if !agent_dir.is_dir() {
            bail!("agent directory {} does not exist", agent_dir.display());
        }

        let peer_name = cli
            .name
            .or(file.peer_name)
            .unwrap_or_else(|| format!("PEER{}", rand::thread_rng().gen_range(0..60)));

        let shell = ShellConfig {
            agent_dir,
            discovery_timeout: file
                .discovery_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ITEM_TIMEOUT),
            async_item_timeout: file.async_item_timeout_ms.map(Duration::from_millis),
            pump_concurrency: file.pump_concurrency,
            ..ShellConfig::default()
        };

        Ok(Self {
            peer_name,
            address: cli.address.or(file.address).unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            autojoin: cli.join || file.autojoin.unwrap_or(false),
            interactive: !cli.headless && file.interactive.unwrap_or(true),
            agent_file: cli.agent_file.or(file.agent_file),
            location: file.location.map(point),
            peers: file.peers,
            shell,
        })
    }
}

/// Reads the configuration file named on the command line, or the default
/// one. A missing default file is not an error.
pub fn read_file(cli: &Cli) -> anyhow::Result<FileConfig> {
    if cli.no_config {
        return Ok(FileConfig::default());
    }

    let (path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    if !explicit && !path.exists() {
        warn!(path = %path.display(), "no configuration file, using defaults");
        return Ok(FileConfig::default());
    }
    parse_file(&path)
}

fn parse_file(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("cannot parse configuration file {}", path.display()))
}
