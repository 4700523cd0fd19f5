use epochsync::core::SampleFrame;
use epochsync::nodes::epoch_transform::ChannelTransform;
use epochsync::nodes::stimulus_source::wall_clock_ms;
use epochsync::nodes::{encode_frame, encode_sample, SequenceOrder};
use epochsync::{EpochPipeline, PipelineState};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};

fn session() -> serde_json::Value {
    json!({
        "signal": {
            "epoch_duration_ms": 100,
            "sampling_rate_hz": 100
        },
        "stimulation": {
            "signal_duration_ms": 20,
            "pause_duration_ms": 20,
            "stimuli": [1, 2],
            "shuffle_seed": 3
        },
        "pipeline": { "channel_capacity": 16 }
    })
}

/// Writes a two-channel sample stamped with the wall clock every 2 ms.
fn spawn_generator(mut server: DuplexStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(2));
        let mut n = 0u64;
        loop {
            ticker.tick().await;
            let sample = SampleFrame::new(wall_clock_ms(), vec![n as f64, 1.0]);
            if server
                .write_all(&encode_frame(&encode_sample(&sample)))
                .await
                .is_err()
            {
                break;
            }
            n += 1;
        }
    })
}

#[tokio::test]
async fn test_pipeline_emits_series() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let generator = spawn_generator(server);

    let mut pipeline = EpochPipeline::from_json(session()).unwrap();
    let mut outputs = pipeline.start(client).await.unwrap();
    assert!(pipeline.state().is_running());

    let series = timeout(Duration::from_secs(5), outputs.series.recv())
        .await
        .expect("no series within 5s")
        .unwrap();

    assert_eq!(series.keys().collect::<Vec<_>>(), vec![1, 2]);
    for channels in series.flows.values() {
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].len(), 10);
        assert!(channels[1].iter().all(|values| values == &vec![1.0]));
    }

    pipeline.stop().await.unwrap();
    generator.abort();

    match pipeline.state() {
        PipelineState::Completed { series_emitted, .. } => assert!(*series_emitted >= 1),
        other => panic!("unexpected state {:?}", other),
    }
    let report = pipeline.get_monitor().generate_report();
    assert!(report.contains("[extractor]"));
    assert!(report.contains("[aggregator]"));
    assert!(report.contains("resets="));
    assert!(report.contains("bytes_read="));
    assert!(report.contains("--- Session ---"));
}

#[tokio::test]
async fn test_epoch_tap_sees_transformed_epochs() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let generator = spawn_generator(server);

    let mut pipeline = EpochPipeline::from_json(session())
        .unwrap()
        .with_sequence_order(SequenceOrder::Fixed)
        .with_transform(ChannelTransform::Custom(Arc::new(|samples: &[f64]| {
            samples.iter().map(|v| v * 2.0).collect()
        })));
    let mut epochs = pipeline.subscribe_epochs();
    let _outputs = pipeline.start(client).await.unwrap();

    let first = timeout(Duration::from_secs(5), epochs.recv())
        .await
        .unwrap()
        .unwrap();
    let second = timeout(Duration::from_secs(5), epochs.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!((first.key, second.key), (1, 2));
    assert!(first.full);
    assert_eq!(first.sample_count(), 10);
    assert!(first.channels[1].iter().all(|&v| v == 2.0));

    pipeline.stop().await.unwrap();
    generator.abort();
}

#[tokio::test]
async fn test_reset_stimuli_switches_series() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let generator = spawn_generator(server);

    let mut pipeline = EpochPipeline::from_json(session())
        .unwrap()
        .with_sequence_order(SequenceOrder::Fixed);
    assert!(pipeline.reset_stimuli(vec![5, 6, 7], 20, 20).await.is_err());

    let mut outputs = pipeline.start(client).await.unwrap();
    let before = timeout(Duration::from_secs(5), outputs.series.recv())
        .await
        .expect("no series within 5s")
        .unwrap();
    assert_eq!(before.keys().collect::<Vec<_>>(), vec![1, 2]);

    assert!(pipeline.reset_stimuli(Vec::new(), 20, 20).await.is_err());
    pipeline.reset_stimuli(vec![5, 6, 7], 20, 20).await.unwrap();
    assert_eq!(pipeline.config().stimulation.stimuli, vec![5, 6, 7]);

    // Series queued before the reset may still carry the old keys
    let after = timeout(Duration::from_secs(5), async {
        loop {
            let series = outputs.series.recv().await.unwrap();
            if series.keys().collect::<Vec<_>>() == vec![5, 6, 7] {
                return series;
            }
        }
    })
    .await
    .expect("no series with the new keys within 5s");
    assert!(after.flows.values().all(|channels| channels.len() == 2));

    let next = timeout(Duration::from_secs(5), outputs.series.recv())
        .await
        .expect("series stopped after the reset")
        .unwrap();
    assert_eq!(next.keys().collect::<Vec<_>>(), vec![5, 6, 7]);

    drop(outputs);
    pipeline.stop().await.unwrap();
    generator.abort();
    assert!(pipeline.reset_stimuli(vec![1], 10, 10).await.is_err());
}

#[tokio::test]
async fn test_cannot_start_twice() {
    let (client, _server) = tokio::io::duplex(1024);
    let (other, _other_server) = tokio::io::duplex(1024);

    let mut pipeline = EpochPipeline::from_json(session()).unwrap();
    let _outputs = pipeline.start(client).await.unwrap();
    assert!(pipeline.start(other).await.is_err());

    pipeline.stop().await.unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = session();
    config["stimulation"]["stimuli"] = json!([]);
    assert!(EpochPipeline::from_json(config).is_err());
}
