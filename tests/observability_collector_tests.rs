use epochsync::observability::MetricsCollector;

#[test]
fn test_collector_registration() {
    let mut collector = MetricsCollector::new();
    let metrics = collector.register("transport");
    metrics.record_input();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot["transport"].inputs, 1);
    assert!(collector.get_node_metrics("aggregator").is_none());
}

#[test]
fn test_collector_shares_counters_with_clones() {
    let mut collector = MetricsCollector::new();
    let extractor = collector.register("extractor");
    let aggregator = collector.register("aggregator");
    let view = collector.clone();

    extractor.record_outputs(4);
    aggregator.record_error();

    let snapshot = view.snapshot();
    assert_eq!(snapshot["extractor"].outputs, 4);
    assert_eq!(snapshot["aggregator"].errors_count, 1);
    assert_eq!(
        snapshot.keys().cloned().collect::<Vec<_>>(),
        vec!["aggregator".to_string(), "extractor".to_string()]
    );
}

#[test]
fn test_snapshot_carries_gauges() {
    let mut collector = MetricsCollector::new();
    let aggregator = collector.register("aggregator");
    aggregator.set_gauge("resets", 2);

    let snapshot = collector.snapshot();
    assert_eq!(snapshot["aggregator"].gauges["resets"], 2);
    assert!(collector.register("transform").gauges().is_empty());
}
