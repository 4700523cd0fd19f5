use std::collections::BTreeMap;
use std::sync::Arc;
use super::NodeMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub node_id: String,
    pub inputs: u64,
    pub outputs: u64,
    pub errors_count: u64,
    pub avg_latency_us: u64,
    pub gauges: BTreeMap<String, u64>,
}

/// Shared registry of stage metrics, cheap to clone
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<String, Arc<NodeMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register metrics for a stage
    pub fn register(&mut self, node_id: impl Into<String>) -> Arc<NodeMetrics> {
        let node_id = node_id.into();
        let metrics = Arc::new(NodeMetrics::new(node_id.clone()));
        self.metrics.insert(node_id, metrics.clone());
        metrics
    }

    pub fn snapshot(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(id, metrics)| {
                (
                    id.clone(),
                    MetricsSnapshot {
                        node_id: metrics.node_id().to_string(),
                        inputs: metrics.inputs(),
                        outputs: metrics.outputs(),
                        errors_count: metrics.errors_count(),
                        avg_latency_us: metrics.avg_latency_us(),
                        gauges: metrics
                            .gauges()
                            .into_iter()
                            .map(|(name, value)| (name.to_string(), value))
                            .collect(),
                    },
                )
            })
            .collect()
    }

    pub fn get_node_metrics(&self, node_id: &str) -> Option<Arc<NodeMetrics>> {
        self.metrics.get(node_id).cloned()
    }
}
