use epochsync::config::StimulationConfig;
use epochsync::core::{SourceNode, StimulusEvent};
use epochsync::nodes::{SequenceOrder, StimulusSequencer, StimulusSource, TargetOrder};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};

fn config(stimuli: Vec<u32>) -> StimulationConfig {
    StimulationConfig {
        stimuli,
        shuffle_seed: Some(7),
        ..StimulationConfig::default()
    }
}

#[test]
fn test_each_key_once_per_pass() {
    let mut sequencer = StimulusSequencer::new(&config(vec![1, 2, 3, 4, 5])).unwrap();

    for pass in 0..20u32 {
        let keys: BTreeSet<u32> = (0..5)
            .map(|_| {
                let event = sequencer.next_event(0);
                assert_eq!(event.cycle, pass);
                event.key
            })
            .collect();
        assert_eq!(keys, (1..=5).collect());
    }
    assert_eq!(sequencer.cycle(), 20);
}

#[test]
fn test_one_reorder_per_pass() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut sequencer = StimulusSequencer::new(&config(vec![1, 2, 3]))
        .unwrap()
        .with_order(SequenceOrder::Custom(Arc::new(move |keys: &mut [u32]| {
            counter.fetch_add(1, Ordering::SeqCst);
            keys.rotate_left(1);
        })));

    for _ in 0..3 * 4 {
        sequencer.next_event(0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(sequencer.reorders(), 4);

    // Mid-pass draws do not reorder
    sequencer.next_event(0);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    sequencer.next_event(0);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_fixed_order_is_stable() {
    let mut config = config(vec![3, 1, 2]);
    config.shuffle = false;
    let mut sequencer = StimulusSequencer::new(&config).unwrap();

    let keys: Vec<u32> = (0..6).map(|_| sequencer.next_event(0).key).collect();
    assert_eq!(keys, vec![3, 1, 2, 3, 1, 2]);
}

#[test]
fn test_seeded_shuffle_is_reproducible() {
    let draw = || {
        let mut sequencer = StimulusSequencer::new(&config((0..10).collect())).unwrap();
        (0..30).map(|_| sequencer.next_event(0).key).collect::<Vec<_>>()
    };
    assert_eq!(draw(), draw());
}

#[test]
fn test_learning_targets_round_robin() {
    let config = StimulationConfig {
        stimuli: vec![1, 2, 3],
        learning: true,
        learning_cycle_duration: 2,
        shuffle: false,
        ..StimulationConfig::default()
    };
    let mut sequencer = StimulusSequencer::new(&config).unwrap();

    let mut targets = Vec::new();
    for _ in 0..6 {
        let pass: Vec<StimulusEvent> = (0..3).map(|_| sequencer.next_event(0)).collect();
        let hits: Vec<u32> = pass
            .iter()
            .filter(|e| e.target == Some(true))
            .map(|e| e.key)
            .collect();
        assert_eq!(hits.len(), 1);
        assert!(pass.iter().all(|e| e.target.is_some()));
        targets.push(hits[0]);
    }
    assert_eq!(targets, vec![1, 1, 2, 2, 3, 3]);
    assert_eq!(sequencer.target_key(), Some(1));
}

#[test]
fn test_learning_array_and_custom_target_order() {
    let config = StimulationConfig {
        stimuli: vec![1, 2, 3, 4],
        learning: true,
        learning_cycle_duration: 1,
        learning_array: Some(vec![4, 2]),
        shuffle: false,
        ..StimulationConfig::default()
    };
    let mut sequencer = StimulusSequencer::new(&config)
        .unwrap()
        .with_target_order(TargetOrder::Custom(Arc::new(|_: &[u32], current: usize| current)));

    assert_eq!(sequencer.target_key(), Some(4));
    for _ in 0..8 {
        sequencer.next_event(0);
    }
    assert_eq!(sequencer.target_key(), Some(4));
}

#[test]
fn test_no_targets_outside_learning() {
    let mut sequencer = StimulusSequencer::new(&config(vec![1, 2])).unwrap();
    assert!(sequencer.next_event(0).target.is_none());
    assert_eq!(sequencer.target_key(), None);
}

#[test]
fn test_reset_restarts_cycles() {
    let mut sequencer = StimulusSequencer::new(&config(vec![1, 2])).unwrap();
    for _ in 0..5 {
        sequencer.next_event(0);
    }
    sequencer.reset(vec![9]).unwrap();

    let event = sequencer.next_event(0);
    assert_eq!(event.key, 9);
    assert_eq!(event.cycle, 0);
    assert_eq!(sequencer.cycle(), 1);
    assert!(sequencer.reset(Vec::new()).is_err());
}

#[test]
fn test_rejects_zero_period() {
    let config = StimulationConfig {
        stimuli: vec![1],
        signal_duration_ms: 0,
        pause_duration_ms: 0,
        ..StimulationConfig::default()
    };
    assert!(StimulusSource::new(&config).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_source_emits_every_period() {
    let mut source = StimulusSource::new(&config(vec![1, 2, 3])).unwrap();
    assert_eq!(source.period(), Duration::from_millis(200));

    let (tx, mut rx) = mpsc::channel::<StimulusEvent>(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(async move {
        source.run(tx, shutdown_rx).await.unwrap();
        source.emitted()
    });

    tokio::time::sleep(Duration::from_millis(199)).await;
    assert!(rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 6);
    assert_eq!(events[3].cycle, 1);

    shutdown_tx.send(()).unwrap();
    assert_eq!(task.await.unwrap(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_source_reset_command() {
    let mut source = StimulusSource::new(&config(vec![1, 2, 3])).unwrap();
    let handle = source.handle();

    let (tx, mut rx) = mpsc::channel::<StimulusEvent>(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(async move { source.run(tx, shutdown_rx).await });

    let first = rx.recv().await.unwrap();
    assert_eq!(first.cycle, 0);

    handle.reset(vec![42], 50, 50).await.unwrap();
    let next = rx.recv().await.unwrap();
    assert_eq!(next.key, 42);
    assert_eq!(next.cycle, 0);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_source_stops_when_receiver_dropped() {
    let mut source = StimulusSource::new(&config(vec![1])).unwrap();
    let (tx, rx) = mpsc::channel::<StimulusEvent>(1);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    drop(rx);

    source.run(tx, shutdown_rx).await.unwrap();
    assert_eq!(source.emitted(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_source_shutdown_while_downstream_full() {
    let mut source = StimulusSource::new(&config(vec![1, 2])).unwrap();
    let (tx, _rx) = mpsc::channel::<StimulusEvent>(1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(async move {
        source.run(tx, shutdown_rx).await.unwrap();
        source.emitted()
    });

    // The second tick blocks on the full channel
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown_tx.send(()).unwrap();

    let emitted = timeout(Duration::from_secs(1), task)
        .await
        .expect("source stuck on a full channel")
        .unwrap();
    assert_eq!(emitted, 1);
}
