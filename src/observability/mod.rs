pub mod collector;
pub mod metrics;
pub mod monitor;

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use metrics::NodeMetrics;
pub use monitor::PipelineMonitor;
