//! Application State
//!
//! Shared state passed to all API handlers.

use crate::nodes::NodeManager;
use crate::observability::MetricsState;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: NodeManager,
    pub metrics_state: Option<MetricsState>,
    pub node_name: String,
    /// Set once the initial source synchronization completed
    pub readiness: Arc<AtomicBool>,
}
