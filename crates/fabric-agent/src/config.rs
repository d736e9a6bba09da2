//! Agent Configuration
//!
//! Centralized configuration for the agent with environment variable
//! overrides.

use crate::nodes::{ManagerConfig, DEFAULT_BACKGROUND_SYNC_INTERVAL};
use fabric_core::Identity;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Agent configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Identity
    /// Cluster this agent belongs to (env: CLUSTER_NAME)
    pub cluster_name: String,

    /// Node this agent runs on (env: NODE_NAME)
    pub node_name: String,

    /// Metrics label of the node manager (env: NODE_MANAGER_NAME)
    pub manager_name: String,

    // HTTP API
    /// Listen address (env: BIND_ADDR)
    pub bind_addr: SocketAddr,

    // Node manager
    /// Project node addresses for encryption (env: ENCRYPT_NODE)
    pub encrypt_node: bool,

    /// Base interval of datapath validation (env: BACKGROUND_SYNC_INTERVAL_SECS)
    pub background_sync_interval: Duration,

    // Local source
    /// JSON file with statically configured nodes (env: LOCAL_NODES_FILE)
    pub local_nodes_file: Option<PathBuf>,

    // KV-store source
    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated). Empty disables
    /// the KV-store source.
    pub etcd_endpoints: Vec<String>,

    /// Key prefix of node records (env: KVSTORE_NODES_PREFIX)
    pub kvstore_prefix: String,

    /// Delay before reconnecting after watch stream failure
    pub reconnect_delay: Duration,

    /// Initial interval for etcd connection retry
    pub etcd_backoff_initial: Duration,

    /// Maximum interval for etcd connection retry
    pub etcd_backoff_max: Duration,

    /// Maximum elapsed time for etcd connection retries
    pub etcd_backoff_max_elapsed: Duration,

    /// Multiplier for etcd backoff
    pub etcd_backoff_multiplier: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cluster_name: "default".to_string(),
            node_name: "localhost".to_string(),
            manager_name: "all".to_string(),

            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9876)),

            encrypt_node: false,
            background_sync_interval: DEFAULT_BACKGROUND_SYNC_INTERVAL,

            local_nodes_file: None,

            etcd_endpoints: Vec::new(),
            kvstore_prefix: "/fabric/v1/nodes/".to_string(),
            reconnect_delay: Duration::from_secs(5),

            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables with defaults.
    ///
    /// Malformed values are logged and the default is kept.
    pub fn from_env() -> Self {
        let lookup = |key: &str| std::env::var(key).ok();
        match Self::load(lookup, true) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Falling back to default configuration");
                Self::default()
            }
        }
    }

    /// Like [`AgentConfig::from_env`], but malformed values are errors.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::load(|key| std::env::var(key).ok(), false)
    }

    fn load(
        lookup: impl Fn(&str) -> Option<String>,
        lenient: bool,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(cluster) = var("CLUSTER_NAME") {
            config.cluster_name = cluster;
        }

        if let Some(node) = var("NODE_NAME") {
            config.node_name = node;
        }

        if let Some(name) = var("NODE_MANAGER_NAME") {
            config.manager_name = name;
        }

        if let Some(addr) = var("BIND_ADDR") {
            let result = parse::<SocketAddr>(&addr);
            if let Some(addr) = accept("BIND_ADDR", addr, result, lenient)? {
                config.bind_addr = addr;
            }
        }

        if let Some(flag) = var("ENCRYPT_NODE") {
            let result = parse_bool(&flag);
            if let Some(flag) = accept("ENCRYPT_NODE", flag, result, lenient)? {
                config.encrypt_node = flag;
            }
        }

        if let Some(secs) = var("BACKGROUND_SYNC_INTERVAL_SECS") {
            let result = parse::<u64>(&secs).and_then(|s| {
                if s == 0 {
                    Err("interval must be positive".to_string())
                } else {
                    Ok(Duration::from_secs(s))
                }
            });
            if let Some(interval) = accept("BACKGROUND_SYNC_INTERVAL_SECS", secs, result, lenient)? {
                config.background_sync_interval = interval;
            }
        }

        if let Some(path) = var("LOCAL_NODES_FILE") {
            config.local_nodes_file = Some(PathBuf::from(path));
        }

        if let Some(endpoints) = var("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(prefix) = var("KVSTORE_NODES_PREFIX") {
            config.kvstore_prefix = prefix;
        }

        Ok(config)
    }

    /// Identity of the node this agent runs on
    pub fn local_identity(&self) -> Identity {
        Identity::new(self.cluster_name.clone(), self.node_name.clone())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            background_sync_interval: self.background_sync_interval,
            encrypt_node: self.encrypt_node,
            local_node: Some(self.local_identity()),
        }
    }

    pub fn kvstore_enabled(&self) -> bool {
        !self.etcd_endpoints.is_empty()
    }
}

/// Keep a parsed value, or handle the parse failure according to `lenient`.
fn accept<T>(
    key: &'static str,
    value: String,
    result: Result<T, String>,
    lenient: bool,
) -> Result<Option<T>, ConfigError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(reason) => {
            let err = ConfigError::InvalidValue { key, value, reason };
            if lenient {
                warn!(error = %err, "Ignoring malformed configuration value");
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

fn parse<T>(value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| e.to_string())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}
