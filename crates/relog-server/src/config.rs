//! Configuration management for Relog nodes
//!
//! [`NodeConfig`] is the plain data a node is built from. [`Configuration`]
//! loads it for the binary from `conf/relog.yml`, `RELOG_` environment
//! variables and command line flags, in increasing order of precedence.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};

use relog_common::{RelogError, rpc_addr};

use crate::startup::LoggingConfig;

const DEFAULT_CONFIG_FILE: &str = "conf/relog.yml";

/// Settings of one node
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Directory holding the commit log
    pub data_dir: PathBuf,
    /// `host:port` for gossip; the host is also used for the RPC listener
    pub bind_addr: String,
    pub rpc_port: u16,
    /// Unique id of the node within the cluster
    pub node_name: String,
    /// Gossip addresses of existing members to join through
    pub start_join_addrs: Vec<String>,
    /// The bootstrap node advertises itself as the leader
    pub bootstrap: bool,
    pub poll_interval: Duration,
    pub gossip_interval: Duration,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/relog"),
            bind_addr: "127.0.0.1:8401".to_string(),
            rpc_port: 8400,
            node_name: String::new(),
            start_join_addrs: Vec::new(),
            bootstrap: false,
            poll_interval: Duration::from_millis(10),
            gossip_interval: Duration::from_millis(200),
            suspect_timeout: Duration::from_secs(2),
            dead_timeout: Duration::from_secs(4),
        }
    }
}

impl NodeConfig {
    /// RPC address: the bind host combined with the RPC port.
    pub fn rpc_addr(&self) -> Result<String, RelogError> {
        rpc_addr(&self.bind_addr, self.rpc_port)
    }

    pub fn validate(&self) -> Result<(), RelogError> {
        if self.node_name.trim().is_empty() {
            return Err(RelogError::ConfigError("node_name must not be empty".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(RelogError::ConfigError("data_dir must not be empty".to_string()));
        }
        if self.suspect_timeout >= self.dead_timeout {
            return Err(RelogError::ConfigError(
                "suspect_timeout must be shorter than dead_timeout".to_string(),
            ));
        }
        self.rpc_addr()?;
        Ok(())
    }
}

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "relog-server", version, about = "Clustered, replicated append-only log")]
pub struct Cli {
    /// Configuration file; missing files are ignored
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
    #[arg(long = "data-dir")]
    pub data_dir: Option<String>,
    #[arg(long = "bind-addr")]
    pub bind_addr: Option<String>,
    #[arg(long = "rpc-port")]
    pub rpc_port: Option<u16>,
    #[arg(long = "node-name", env = "RELOG_NODE_NAME")]
    pub node_name: Option<String>,
    /// Comma separated gossip addresses of existing members
    #[arg(long = "start-join-addrs", value_delimiter = ',')]
    pub start_join_addrs: Option<Vec<String>>,
    #[arg(long = "bootstrap")]
    pub bootstrap: bool,
}

/// Layered application configuration
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process arguments.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix("RELOG")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.data_dir {
            builder = builder.set_override("data_dir", v)?;
        }
        if let Some(v) = args.bind_addr {
            builder = builder.set_override("bind_addr", v)?;
        }
        if let Some(v) = args.rpc_port {
            builder = builder.set_override("rpc_port", v as i64)?;
        }
        if let Some(v) = args.node_name {
            builder = builder.set_override("node_name", v)?;
        }
        if let Some(v) = args.start_join_addrs {
            builder = builder.set_override("start_join_addrs", v.join(","))?;
        }
        if args.bootstrap {
            builder = builder.set_override("bootstrap", true)?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    // ========================================================================
    // Node Configuration
    // ========================================================================

    pub fn data_dir(&self) -> PathBuf {
        self.config
            .get_string("data_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|_| NodeConfig::default().data_dir)
    }

    pub fn bind_addr(&self) -> String {
        self.config
            .get_string("bind_addr")
            .unwrap_or_else(|_| NodeConfig::default().bind_addr)
    }

    pub fn rpc_port(&self) -> Result<u16, RelogError> {
        match self.config.get_int("rpc_port") {
            Ok(port) => u16::try_from(port)
                .map_err(|_| RelogError::ConfigError(format!("rpc_port out of range: {}", port))),
            Err(_) => Ok(NodeConfig::default().rpc_port),
        }
    }

    pub fn node_name(&self) -> String {
        self.config.get_string("node_name").unwrap_or_default()
    }

    /// Seed addresses, given either as a list or a comma separated string.
    pub fn start_join_addrs(&self) -> Vec<String> {
        let addrs: Vec<String> = match self.config.get_array("start_join_addrs") {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| v.into_string().ok())
                .collect(),
            Err(_) => self
                .config
                .get_string("start_join_addrs")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        };
        addrs
            .into_iter()
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect()
    }

    pub fn bootstrap(&self) -> bool {
        self.config.get_bool("bootstrap").unwrap_or(false)
    }

    fn duration_ms(&self, key: &str, default: Duration) -> Duration {
        self.config
            .get_int(key)
            .ok()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    pub fn node_config(&self) -> Result<NodeConfig, RelogError> {
        let defaults = NodeConfig::default();
        let config = NodeConfig {
            data_dir: self.data_dir(),
            bind_addr: self.bind_addr(),
            rpc_port: self.rpc_port()?,
            node_name: self.node_name(),
            start_join_addrs: self.start_join_addrs(),
            bootstrap: self.bootstrap(),
            poll_interval: self.duration_ms("poll_interval_ms", defaults.poll_interval),
            gossip_interval: self.duration_ms("gossip_interval_ms", defaults.gossip_interval),
            suspect_timeout: self.duration_ms("suspect_timeout_ms", defaults.suspect_timeout),
            dead_timeout: self.duration_ms("dead_timeout_ms", defaults.dead_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("log.dir").ok(),
            self.config.get_bool("log.console").unwrap_or(true),
            self.config.get_bool("log.file").unwrap_or(false),
            self.config
                .get_string("log.level")
                .unwrap_or_else(|_| "info".to_string()),
        )
    }
}
