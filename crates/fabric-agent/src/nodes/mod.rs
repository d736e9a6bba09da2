//! Node Management
//!
//! - `manager`: Arbitration, IP-cache projection and datapath fan-out
//! - `handler`: Datapath handler contract and registry
//! - `store`: Two-level locked node entries

mod handler;
mod manager;
mod store;


pub use handler::{DatapathError, LoggingNodeHandler, NodeHandler};
pub use manager::{cluster_size_dependant_interval, NodeManager};

use crate::observability::MetricsError;
use fabric_core::Identity;
use std::time::Duration;
use thiserror::Error;

/// Default base interval of the background validation loop.
pub const DEFAULT_BACKGROUND_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum NodeManagerError {
    #[error("failed to register node manager metrics: {0}")]
    Metrics(#[from] MetricsError),
}

/// Node manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base interval of background validation, scaled by cluster size
    pub background_sync_interval: Duration,
    /// Also project non-overlay node addresses into the IP cache
    pub encrypt_node: bool,
    /// Node this agent runs on
    pub local_node: Option<Identity>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            background_sync_interval: DEFAULT_BACKGROUND_SYNC_INTERVAL,
            encrypt_node: false,
            local_node: None,
        }
    }
}
