//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `SUBSCRIPTION_PATH` overrides `[subscription].path` so the same file can
//! be reused across hosts that keep the blob in different places.

use relay_pool::PoolConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use subscription::IgnoreList;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    pub admin: AdminConfig,
}

/// Where the subscription blob lives and which records to drop
#[derive(Debug, Deserialize)]
pub struct SubscriptionConfig {
    pub path: PathBuf,
    /// Label regexes to skip; the built-in informational list when absent
    #[serde(default)]
    pub ignore: Option<Vec<String>>,
}

/// Relay process settings
#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Route rules file handed to every relay
    #[serde(default)]
    pub acl: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct PoolSettings {
    #[serde(default)]
    pub max_concurrent: usize,
    #[serde(default = "default_disable_secs")]
    pub disable_secs: u64,
    /// 0 skips the startup health probe
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    #[serde(default = "default_blocked_countries")]
    pub blocked_countries: Vec<String>,
}

/// Admin HTTP listener (health, metrics, groups)
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_program() -> PathBuf {
    PathBuf::from("sslocal")
}

fn default_disable_secs() -> u64 {
    60
}

fn default_test_timeout_secs() -> u64 {
    10
}

fn default_probe_concurrency() -> usize {
    10
}

fn default_blocked_countries() -> Vec<String> {
    vec!["CN".to_string()]
}

fn default_max_connections() -> usize {
    64
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            acl: None,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            disable_secs: default_disable_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            probe_concurrency: default_probe_concurrency(),
            blocked_countries: default_blocked_countries(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|source| common::Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Ok(p) = std::env::var("SUBSCRIPTION_PATH") {
            config.subscription.path = PathBuf::from(p);
        }

        if config.node.program.as_os_str().is_empty() {
            return Err(common::Error::Config("node.program must not be empty".into()));
        }

        if config.pool.probe_concurrency == 0 {
            return Err(common::Error::Config(
                "probe_concurrency must be greater than 0".into(),
            ));
        }

        if config.admin.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        // Surface bad patterns now rather than at decode time
        config.ignore_list()?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("relay-pool.toml")
    }

    pub fn ignore_list(&self) -> common::Result<IgnoreList> {
        match &self.subscription.ignore {
            None => Ok(IgnoreList::default()),
            Some(patterns) => IgnoreList::new(patterns)
                .map_err(|e| common::Error::Config(format!("invalid ignore pattern: {e}"))),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_concurrent: self.pool.max_concurrent,
            disable_duration: Duration::from_secs(self.pool.disable_secs),
            test_timeout: Duration::from_secs(self.pool.test_timeout_secs),
            acl: self.node.acl.clone(),
            probe_concurrency: self.pool.probe_concurrency,
        }
    }
}
