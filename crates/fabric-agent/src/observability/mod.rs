//! Observability Module
//!
//! - `metrics`: Prometheus metrics for node managers
//! - `events`: Structured node lifecycle events
//! - `tracing`: Log subscriber setup

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, EventKind, MetricsError, MetricsRegistry, MetricsState, NodeMetrics};
pub use tracing::{init_tracing, LogFormat, TracingConfig};
