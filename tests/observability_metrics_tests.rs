use epochsync::observability::NodeMetrics;
use std::sync::Arc;

#[test]
fn test_metrics_creation() {
    let metrics = NodeMetrics::new("extractor");
    assert_eq!(metrics.node_id(), "extractor");
    assert_eq!(metrics.inputs(), 0);
    assert_eq!(metrics.outputs(), 0);
    assert_eq!(metrics.errors_count(), 0);
    assert_eq!(metrics.avg_latency_us(), 0);
}

#[test]
fn test_metrics_increment() {
    let metrics = Arc::new(NodeMetrics::new("extractor"));

    metrics.record_input();
    metrics.record_input();
    metrics.record_outputs(3);
    metrics.record_outputs(0);
    metrics.record_error();

    assert_eq!(metrics.inputs(), 2);
    assert_eq!(metrics.outputs(), 3);
    assert_eq!(metrics.errors_count(), 1);
}

#[tokio::test]
async fn test_metrics_latency_tracking() {
    let metrics = NodeMetrics::new("extractor");

    let start = metrics.start_processing();
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    metrics.finish_processing(start);

    assert!(metrics.avg_latency_us() >= 10_000);
}

#[test]
fn test_gauges_overwrite() {
    let metrics = NodeMetrics::new("extractor");
    assert_eq!(metrics.gauge("in_flight"), None);

    metrics.set_gauge("in_flight", 3);
    metrics.set_gauge("evicted", 1);
    metrics.set_gauge("in_flight", 2);

    assert_eq!(metrics.gauge("in_flight"), Some(2));
    assert_eq!(
        metrics.gauges().into_iter().collect::<Vec<_>>(),
        vec![("evicted", 1), ("in_flight", 2)]
    );
}
