use epochsync::{EpochPipeline, PipelineState};
use serde_json::json;

fn pipeline() -> EpochPipeline {
    EpochPipeline::from_json(json!({
        "stimulation": { "stimuli": [1, 2, 3] }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_pipeline_state_transitions() {
    let mut pipeline = pipeline();
    assert_eq!(pipeline.state(), &PipelineState::Idle);

    let (client, _server) = tokio::io::duplex(256);
    let _outputs = pipeline.start(client).await.unwrap();
    assert!(pipeline.state().is_running());

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state().name(), "Completed");

    pipeline.transition_to(PipelineState::Idle).unwrap();
    assert_eq!(pipeline.state(), &PipelineState::Idle);
}

#[test]
fn test_invalid_transition_rejected() {
    let mut pipeline = pipeline();
    let err = pipeline
        .transition_to(PipelineState::Completed {
            duration: None,
            series_emitted: 0,
        })
        .unwrap_err();
    assert!(err.to_string().contains("Idle -> Completed"));
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let mut pipeline = pipeline();
    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), &PipelineState::Idle);
}

#[test]
fn test_state_serializes_without_instants() {
    let state = PipelineState::Completed {
        duration: None,
        series_emitted: 12,
    };
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["Completed"]["series_emitted"], 12);
}
