//! Observability Module
//!
//! - `metrics`: Prometheus recorder and metric descriptions
//! - `events`: Structured event logging with consistent fields
//! - `tracing`: Log subscriber and optional OTLP export

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
