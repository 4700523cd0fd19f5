use super::{MetricsCollector, MetricsSnapshot};
use std::collections::BTreeMap;

pub struct PipelineMonitor {
    collector: MetricsCollector,
}

impl PipelineMonitor {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No stages registered".to_string();
        }

        let mut report = String::from("=== Epoch Pipeline ===\n");

        for (node_id, metrics) in snapshot.iter() {
            let errors = match metrics.errors_count {
                0 => "none".to_string(),
                1 => "1 error".to_string(),
                n => format!("{} errors", n),
            };
            report.push_str(&format!(
                "\n[{}]\n  In: {}  Out: {}\n  Errors: {}\n  Avg Latency: {}μs\n",
                node_id, metrics.inputs, metrics.outputs, errors, metrics.avg_latency_us
            ));
            if !metrics.gauges.is_empty() {
                let gauges: Vec<String> = metrics
                    .gauges
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();
                report.push_str(&format!("  {}\n", gauges.join("  ")));
            }
        }

        if let Some(summary) = session_summary(&snapshot) {
            report.push_str(&summary);
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}

/// Samples in, epochs cut, series out; only for stages that were registered.
fn session_summary(snapshot: &BTreeMap<String, MetricsSnapshot>) -> Option<String> {
    let stages = [
        ("transport", "Samples"),
        ("extractor", "Epochs"),
        ("aggregator", "Series"),
    ];
    let parts: Vec<String> = stages
        .iter()
        .filter_map(|(id, label)| {
            snapshot
                .get(*id)
                .map(|metrics| format!("{}: {}", label, metrics.outputs))
        })
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(format!("\n--- Session ---\n  {}\n", parts.join("  ")))
}
