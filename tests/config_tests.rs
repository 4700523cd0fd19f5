use epochsync::config::{SessionConfig, StepConfig};
use epochsync::nodes::epoch_transform::TransformKind;
use serde_json::json;
use std::io::Write;

#[test]
fn test_defaults_fill_missing_sections() {
    let config = SessionConfig::from_json(json!({
        "stimulation": { "stimuli": [10, 20] }
    }))
    .unwrap();

    assert_eq!(config.signal.host, "127.0.0.1");
    assert_eq!(config.signal.port, 1024);
    assert_eq!(config.signal.sample_retention_ms, 10_000);
    assert_eq!(config.stimulation.signal_duration_ms, 100);
    assert!(config.stimulation.shuffle);
    assert_eq!(config.series.step, StepConfig::Keep);
    assert_eq!(config.pipeline.channel_capacity, 100);
    assert_eq!(config.window_sample_count(), 250);
}

#[test]
fn test_full_document() {
    let config = SessionConfig::from_json(json!({
        "signal": {
            "host": "10.0.0.5",
            "port": 9000,
            "epoch_duration_ms": 200,
            "sampling_rate_hz": 250,
            "channels": [0, 3],
            "max_payload_len": 4096,
            "transforms": ["detrend", "remove_mean"]
        },
        "stimulation": {
            "stimuli": [1, 2, 3],
            "learning": true,
            "learning_cycle_duration": 5,
            "learning_array": [2]
        },
        "series": {
            "depth_limit": 20,
            "step": { "kind": "moving_window", "size": 8 }
        }
    }))
    .unwrap();

    assert_eq!(config.signal.channels, Some(vec![0, 3]));
    assert_eq!(
        config.signal.transforms,
        vec![TransformKind::Detrend, TransformKind::RemoveMean]
    );
    assert_eq!(config.stimulation.learning_array, Some(vec![2]));
    assert_eq!(config.series.step, StepConfig::MovingWindow { size: 8 });
    assert_eq!(config.epoch_timing().window_sample_count(), 50);
}

#[test]
fn test_validation_failures() {
    let cases = [
        json!({}),
        json!({ "stimulation": { "stimuli": [1], "signal_duration_ms": 0, "pause_duration_ms": 0 } }),
        json!({ "stimulation": { "stimuli": [1], "learning": true, "learning_array": [] } }),
        json!({ "stimulation": { "stimuli": [1] }, "signal": { "epoch_duration_ms": 1 } }),
        json!({ "stimulation": { "stimuli": [1] }, "signal": { "channels": [] } }),
        json!({ "stimulation": { "stimuli": [1] }, "series": { "step": { "kind": "moving_window", "size": 0 } } }),
        json!({ "stimulation": { "stimuli": [1] }, "pipeline": { "channel_capacity": 0 } }),
        json!({ "stimulation": { "stimuli": [1], "signal_duration_ms": u64::MAX, "pause_duration_ms": 1 } }),
        json!({ "stimulation": { "stimuli": [1] }, "signal": { "epoch_duration_ms": u64::MAX } }),
    ];

    for case in cases {
        assert!(SessionConfig::from_json(case.clone()).is_err(), "{}", case);
    }
}

#[test]
fn test_overflowing_durations_reported() {
    let err = SessionConfig::from_json(json!({
        "stimulation": { "stimuli": [1], "signal_duration_ms": u64::MAX, "pause_duration_ms": 1 }
    }))
    .unwrap_err();
    assert!(err.to_string().contains("overflows"), "{}", err);

    let err = SessionConfig::from_json(json!({
        "stimulation": { "stimuli": [1] },
        "signal": { "epoch_duration_ms": u64::MAX, "sampling_rate_hz": 250 }
    }))
    .unwrap_err();
    assert!(err.to_string().contains("overflows"), "{}", err);

    // Large but representable
    let config = SessionConfig::from_json(json!({
        "stimulation": { "stimuli": [1], "signal_duration_ms": u64::MAX - 1, "pause_duration_ms": 1 }
    }))
    .unwrap();
    assert_eq!(config.window_sample_count(), 250);
}

#[test]
fn test_unknown_transform_rejected() {
    let result = SessionConfig::from_json(json!({
        "stimulation": { "stimuli": [1] },
        "signal": { "transforms": ["fft"] }
    }));
    assert!(result.is_err());
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "signal": {{ "port": 5555 }}, "stimulation": {{ "stimuli": [4, 5, 6] }} }}"#
    )
    .unwrap();

    let config = SessionConfig::load(file.path()).unwrap();
    assert_eq!(config.signal.port, 5555);
    assert_eq!(config.stimulation.stimuli, vec![4, 5, 6]);
}

#[test]
fn test_load_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");

    let err = SessionConfig::load(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("missing.json"));

    std::fs::write(&path, "{ not json").unwrap();
    let err = SessionConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("not valid JSON"));
}
