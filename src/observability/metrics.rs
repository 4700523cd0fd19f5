use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Counters for one pipeline stage.
///
/// The throughput counters are lock-free. Gauges are stage-specific values
/// (epochs in flight, series resets, bytes read) overwritten as the stage runs.
pub struct NodeMetrics {
    node_id: String,
    inputs: AtomicU64,
    outputs: AtomicU64,
    errors_count: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
    gauges: Mutex<BTreeMap<&'static str, u64>>,
}

impl NodeMetrics {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            inputs: AtomicU64::new(0),
            outputs: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            gauges: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn inputs(&self) -> u64 {
        self.inputs.load(Ordering::Relaxed)
    }

    pub fn outputs(&self) -> u64 {
        self.outputs.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn record_input(&self) {
        self.inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outputs(&self, count: u64) {
        self.outputs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &'static str, value: u64) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(name, value);
        }
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.lock().ok()?.get(name).copied()
    }

    pub fn gauges(&self) -> BTreeMap<&'static str, u64> {
        self.gauges
            .lock()
            .map(|gauges| gauges.clone())
            .unwrap_or_default()
    }

    pub fn start_processing(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_processing(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }
}
