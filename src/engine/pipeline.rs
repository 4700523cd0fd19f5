use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::SessionConfig;
use crate::core::{Epoch, ProcessingNode, SourceNode, StimulusKey};
use crate::engine::state::PipelineState;
use crate::hal::SignalStreamReader;
use crate::nodes::epoch_transform::ChannelTransform;
use crate::nodes::stimulus_source::StimulusHandle;
use crate::nodes::{
    EpochExtractor, EpochSeries, EpochSeriesAggregator, EpochTransform, ExtractorInput,
    FrameDecoder, LeSampleDecoder, SampleDecoder, SequenceOrder, SeriesInput, SeriesStep,
    StimulusSequencer, StimulusSource, TargetOrder,
};
use crate::observability::{MetricsCollector, PipelineMonitor};
use crate::resilience::{ErrorPolicy, ResilientNode};

/// Receiving ends handed to the caller by [`EpochPipeline::start`]
pub struct PipelineOutputs {
    /// One snapshot per completed stimulus cycle
    pub series: mpsc::Receiver<EpochSeries>,
}

/// Wires transport, stimulus timer, extractor, transforms and aggregator
/// into tokio tasks joined by bounded channels.
///
/// ```text
/// transport ─┐
///            ├─> extractor ─> transform ─> tap ─> aggregator ─> series
/// stimuli  ──┘
/// ```
///
/// Both producers feed one channel, so the extractor sees a single ordered
/// stream and never needs locking.
pub struct EpochPipeline {
    config: SessionConfig,
    sample_decoder: Arc<dyn SampleDecoder>,
    sequence_order: Option<SequenceOrder>,
    target_order: Option<TargetOrder>,
    series_step: Option<SeriesStep>,
    extra_transforms: Vec<ChannelTransform>,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    epoch_tap: broadcast::Sender<Epoch>,
    stimulus_handle: Option<StimulusHandle>,
    series_control: Option<mpsc::Sender<SeriesInput>>,
    metrics_collector: MetricsCollector,
    state: PipelineState,
}

impl EpochPipeline {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (epoch_tap, _) = broadcast::channel(config.pipeline.epoch_tap_capacity);

        Ok(Self {
            config,
            sample_decoder: Arc::new(LeSampleDecoder),
            sequence_order: None,
            target_order: None,
            series_step: None,
            extra_transforms: Vec::new(),
            handles: Vec::new(),
            shutdown_tx: None,
            epoch_tap,
            stimulus_handle: None,
            series_control: None,
            metrics_collector: MetricsCollector::new(),
            state: PipelineState::Idle,
        })
    }

    pub fn from_json(config: Value) -> Result<Self> {
        Self::new(SessionConfig::from_json(config)?)
    }

    pub fn with_sample_decoder(mut self, decoder: Arc<dyn SampleDecoder>) -> Self {
        self.sample_decoder = decoder;
        self
    }

    pub fn with_sequence_order(mut self, order: SequenceOrder) -> Self {
        self.sequence_order = Some(order);
        self
    }

    pub fn with_target_order(mut self, order: TargetOrder) -> Self {
        self.target_order = Some(order);
        self
    }

    /// Overrides `series.step` from the config
    pub fn with_series_step(mut self, step: SeriesStep) -> Self {
        self.series_step = Some(step);
        self
    }

    /// Runs after the transforms named in `signal.transforms`
    pub fn with_transform(mut self, transform: ChannelTransform) -> Self {
        self.extra_transforms.push(transform);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Transition to a new state with validation
    pub fn transition_to(&mut self, new_state: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(anyhow!(
                "Invalid state transition: {} -> {}",
                self.state.name(),
                new_state.name()
            ));
        }
        self.state = new_state;
        Ok(())
    }

    /// Lossy copy of every epoch entering the aggregator
    pub fn subscribe_epochs(&self) -> broadcast::Receiver<Epoch> {
        self.epoch_tap.subscribe()
    }

    /// Swap the stimulus set and cadence of a running session.
    ///
    /// The aggregator switches keys before the timer does, so epochs of the
    /// old set still in flight are dropped as foreign and the next series
    /// holds only the new keys.
    pub async fn reset_stimuli(
        &mut self,
        stimuli: Vec<StimulusKey>,
        signal_duration_ms: u64,
        pause_duration_ms: u64,
    ) -> Result<()> {
        let (Some(stimulus_handle), Some(series_control)) =
            (&self.stimulus_handle, &self.series_control)
        else {
            return Err(anyhow!("Epoch pipeline is not running"));
        };

        let mut config = self.config.clone();
        config.stimulation.stimuli = stimuli.clone();
        config.stimulation.signal_duration_ms = signal_duration_ms;
        config.stimulation.pause_duration_ms = pause_duration_ms;
        config.validate()?;

        series_control
            .send(SeriesInput::Reconfigure(stimuli.clone()))
            .await
            .map_err(|_| anyhow!("Aggregator stage has stopped"))?;
        stimulus_handle
            .reset(stimuli, signal_duration_ms, pause_duration_ms)
            .await?;

        self.config = config;
        Ok(())
    }

    pub fn get_monitor(&self) -> PipelineMonitor {
        PipelineMonitor::new(self.metrics_collector.clone())
    }

    pub async fn start<R>(&mut self, transport: R) -> Result<PipelineOutputs>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.transition_to(PipelineState::Initializing)?;

        match self.spawn_stages(transport) {
            Ok(outputs) => {
                self.transition_to(PipelineState::Running {
                    start_time: Some(std::time::Instant::now()),
                })?;
                log::info!(
                    "epoch pipeline running: {} stimuli, {} samples per epoch",
                    self.config.stimulation.stimuli.len(),
                    self.config.window_sample_count()
                );
                Ok(outputs)
            }
            Err(e) => {
                self.state = PipelineState::Error {
                    error_msg: e.to_string(),
                    recoverable: true,
                };
                Err(e)
            }
        }
    }

    fn spawn_stages<R>(&mut self, transport: R) -> Result<PipelineOutputs>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capacity = self.config.pipeline.channel_capacity;
        let stimulation = &self.config.stimulation;

        let mut sequencer = StimulusSequencer::new(stimulation)?;
        if let Some(order) = self.sequence_order.clone() {
            sequencer = sequencer.with_order(order);
        }
        if let Some(order) = self.target_order.clone() {
            sequencer = sequencer.with_target_order(order);
        }
        let mut stimuli = StimulusSource::from_sequencer(
            sequencer,
            stimulation.signal_duration_ms,
            stimulation.pause_duration_ms,
        )?;

        let frame_decoder = match self.config.signal.max_payload_len {
            Some(max) => FrameDecoder::with_max_payload_len(max),
            None => FrameDecoder::new(),
        };
        let mut reader = SignalStreamReader::new(transport, self.sample_decoder.clone())
            .with_frame_decoder(frame_decoder)
            .with_metrics(self.metrics_collector.register("transport"));
        if let Some(ms) = self.config.signal.read_timeout_ms {
            reader = reader.with_read_timeout(Duration::from_millis(ms));
        }

        let extractor = EpochExtractor::from_config(&self.config)?;

        let mut steps: Vec<ChannelTransform> = self
            .config
            .signal
            .transforms
            .iter()
            .map(|&kind| kind.into())
            .collect();
        steps.extend(self.extra_transforms.iter().cloned());
        let transform = EpochTransform::new(steps);

        let mut aggregator = EpochSeriesAggregator::from_config(
            self.config.stimulation.stimuli.clone(),
            &self.config.series,
        )?;
        if let Some(step) = self.series_step.clone() {
            aggregator = aggregator.with_step(step);
        }

        let (shutdown_tx, _) = broadcast::channel(16);
        let (input_tx, input_rx) = mpsc::channel::<ExtractorInput>(capacity);
        let (epoch_tx, epoch_rx) = mpsc::channel(capacity);
        let (shaped_tx, mut shaped_rx) = mpsc::channel::<Epoch>(capacity);
        let (tapped_tx, tapped_rx) = mpsc::channel::<SeriesInput>(capacity);
        let (series_tx, series_rx) = mpsc::channel(capacity);

        self.stimulus_handle = Some(stimuli.handle());
        let stimuli_input = input_tx.clone();
        let stimuli_shutdown = shutdown_tx.subscribe();
        self.handles.push((
            "stimuli".to_string(),
            tokio::spawn(async move { stimuli.run(stimuli_input, stimuli_shutdown).await }),
        ));

        let transport_shutdown = shutdown_tx.subscribe();
        self.handles.push((
            "transport".to_string(),
            tokio::spawn(async move { reader.run(input_tx, transport_shutdown).await }),
        ));

        self.spawn_stage("extractor", extractor, input_rx, epoch_tx);
        self.spawn_stage("transform", transform, epoch_rx, shaped_tx);

        self.series_control = Some(tapped_tx.clone());
        let tap = self.epoch_tap.clone();
        self.handles.push((
            "tap".to_string(),
            tokio::spawn(async move {
                while let Some(epoch) = shaped_rx.recv().await {
                    // No subscribers is fine
                    let _ = tap.send(epoch.clone());
                    if tapped_tx.send(epoch.into()).await.is_err() {
                        break;
                    }
                }
                Ok(())
            }),
        ));

        self.spawn_stage("aggregator", aggregator, tapped_rx, series_tx);

        self.shutdown_tx = Some(shutdown_tx);
        Ok(PipelineOutputs { series: series_rx })
    }

    fn spawn_stage<N>(
        &mut self,
        name: &str,
        node: N,
        rx: mpsc::Receiver<N::Input>,
        tx: mpsc::Sender<N::Output>,
    ) where
        N: ProcessingNode + 'static,
    {
        let metrics = self.metrics_collector.register(name);
        let stage = ResilientNode::new(node, metrics, ErrorPolicy::SkipInput);
        let handle = tokio::spawn(async move { stage.run(rx, tx).await.map(|_| ()) });
        self.handles.push((name.to_string(), handle));
    }

    /// Stop both producers and wait for every stage to drain.
    ///
    /// In-flight epochs and partially received frames are discarded. The
    /// aggregator can only finish once `PipelineOutputs::series` is drained
    /// or dropped.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.stimulus_handle = None;
        self.series_control = None;

        let mut failure = None;
        for (name, handle) in std::mem::take(&mut self.handles) {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!(e)),
            };
            if let Err(e) = outcome {
                log::error!("stage {} failed: {:#}", name, e);
                if failure.is_none() {
                    failure = Some(anyhow!("Stage {} failed: {}", name, e));
                }
            }
        }

        let duration = match &self.state {
            PipelineState::Running { start_time } => start_time.map(|t| t.elapsed()),
            _ => return failure.map_or(Ok(()), Err),
        };

        match failure {
            Some(e) => {
                self.transition_to(PipelineState::Error {
                    error_msg: e.to_string(),
                    recoverable: true,
                })?;
                Err(e)
            }
            None => {
                let series_emitted = self
                    .metrics_collector
                    .get_node_metrics("aggregator")
                    .map(|m| m.outputs())
                    .unwrap_or(0);
                self.transition_to(PipelineState::Completed {
                    duration,
                    series_emitted,
                })?;
                log::info!("epoch pipeline stopped after {:?}", duration);
                Ok(())
            }
        }
    }
}

impl Drop for EpochPipeline {
    fn drop(&mut self) {
        // Can't await the stages here; just make the producers quit.
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}
