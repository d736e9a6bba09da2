//! Prometheus Metrics
//!
//! Defines the node manager metrics and the Prometheus exporter setup.
//!
//! Metrics tracked, all labelled with the owning manager's name:
//! - `fabric_nodes_events_received_total` - counter of node events by type and source
//! - `fabric_nodes_num` - gauge of nodes being managed
//! - `fabric_nodes_datapath_validations_total` - counter of datapath validation calls
//!
//! Manager names are handed out by a [`MetricsRegistry`] so two managers in
//! the same process can never report into the same series.

use fabric_core::Source;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub const EVENTS_RECEIVED: &str = "fabric_nodes_events_received_total";
pub const NUM_NODES: &str = "fabric_nodes_num";
pub const DATAPATH_VALIDATIONS: &str = "fabric_nodes_datapath_validations_total";

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Initialize Prometheus metrics and return the handle for exporting.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    describe_counter!(EVENTS_RECEIVED, "Number of node events received");
    describe_gauge!(NUM_NODES, "Number of nodes managed");
    describe_counter!(
        DATAPATH_VALIDATIONS,
        "Number of validation calls to implement the datapath implementation of a node"
    );
}

/// Errors raised while registering a manager's metrics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("invalid metrics name '{name}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName { name: String },

    #[error("metrics for '{name}' are already registered")]
    AlreadyRegistered { name: String },
}

/// Kind of node event received by a manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

/// Set of manager names with live metrics.
#[derive(Clone, Debug, Default)]
pub struct MetricsRegistry {
    names: Arc<Mutex<HashSet<String>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` and return the metrics handle reporting under it.
    pub fn register(&self, name: &str) -> Result<NodeMetrics, MetricsError> {
        if !is_valid_name(name) {
            return Err(MetricsError::InvalidName {
                name: name.to_string(),
            });
        }

        if !self.names.lock().insert(name.to_string()) {
            return Err(MetricsError::AlreadyRegistered {
                name: name.to_string(),
            });
        }

        Ok(NodeMetrics {
            manager: name.to_string(),
            registry: self.clone(),
            registered: AtomicBool::new(true),
            num_nodes: AtomicI64::new(0),
            datapath_validations: AtomicU64::new(0),
            events_received: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    fn release(&self, name: &str) {
        self.names.lock().remove(name);
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Metrics of one node manager.
///
/// Every update is emitted through the `metrics` facade and mirrored locally
/// so the current values can be read back without a recorder.
#[derive(Debug)]
pub struct NodeMetrics {
    manager: String,
    registry: MetricsRegistry,
    registered: AtomicBool,
    num_nodes: AtomicI64,
    datapath_validations: AtomicU64,
    events_received: Mutex<HashMap<(EventKind, Source), u64>>,
}

impl NodeMetrics {
    pub fn manager(&self) -> &str {
        &self.manager
    }

    pub fn record_event(&self, kind: EventKind, source: Source) {
        if !self.is_registered() {
            return;
        }
        *self.events_received.lock().entry((kind, source)).or_insert(0) += 1;
        counter!(
            EVENTS_RECEIVED,
            "manager" => self.manager.clone(),
            "event_type" => kind.as_str(),
            "source" => source.as_str()
        )
        .increment(1);
    }

    pub fn node_added(&self) {
        let count = self.num_nodes.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish_num_nodes(count);
    }

    pub fn node_removed(&self) {
        let count = self.num_nodes.fetch_sub(1, Ordering::SeqCst) - 1;
        self.publish_num_nodes(count);
    }

    pub fn reset_nodes(&self) {
        self.num_nodes.store(0, Ordering::SeqCst);
        self.publish_num_nodes(0);
    }

    pub fn record_validation(&self) {
        if !self.is_registered() {
            return;
        }
        self.datapath_validations.fetch_add(1, Ordering::Relaxed);
        counter!(DATAPATH_VALIDATIONS, "manager" => self.manager.clone()).increment(1);
    }

    /// Current value of the managed node gauge.
    pub fn num_nodes(&self) -> i64 {
        self.num_nodes.load(Ordering::SeqCst)
    }

    pub fn datapath_validations(&self) -> u64 {
        self.datapath_validations.load(Ordering::Relaxed)
    }

    pub fn events_received(&self, kind: EventKind, source: Source) -> u64 {
        self.events_received
            .lock()
            .get(&(kind, source))
            .copied()
            .unwrap_or(0)
    }

    /// Whether this handle still owns its manager name. Nothing is emitted
    /// once the name has been released.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Release the manager name so it can be registered again.
    pub fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            self.registry.release(&self.manager);
        }
    }

    fn publish_num_nodes(&self, count: i64) {
        if !self.is_registered() {
            return;
        }
        gauge!(NUM_NODES, "manager" => self.manager.clone()).set(count as f64);
    }
}

impl Drop for NodeMetrics {
    fn drop(&mut self) {
        self.unregister();
    }
}
