use crate::core::{EpochTiming, StimulusKey};
use crate::error::SyncError;
use crate::nodes::epoch_extractor::DEFAULT_SAMPLE_RETENTION_MS;
use crate::nodes::epoch_series::SeriesStep;
use crate::nodes::epoch_transform::TransformKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Signal transport and epoch windowing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub host: String,
    pub port: u16,
    pub epoch_duration_ms: u64,
    pub sampling_rate_hz: u32,
    /// Sample positions copied into epochs; all of them when unset
    pub channels: Option<Vec<usize>>,
    pub sample_retention_ms: u64,
    pub starved_epoch_grace_ms: Option<u64>,
    pub max_payload_len: Option<u64>,
    /// A transport read stalling longer than this ends the session
    pub read_timeout_ms: Option<u64>,
    /// Applied to every epoch channel, in order, before aggregation
    pub transforms: Vec<TransformKind>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1024,
            epoch_duration_ms: 1000,
            sampling_rate_hz: 250,
            channels: None,
            sample_retention_ms: DEFAULT_SAMPLE_RETENTION_MS,
            starved_epoch_grace_ms: None,
            max_payload_len: None,
            read_timeout_ms: None,
            transforms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulationConfig {
    pub signal_duration_ms: u64,
    pub pause_duration_ms: u64,
    pub stimuli: Vec<StimulusKey>,
    pub learning: bool,
    /// Cycles each learning target is held for
    pub learning_cycle_duration: u32,
    /// Defaults to `stimuli`
    pub learning_array: Option<Vec<StimulusKey>>,
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>,
}

impl Default for StimulationConfig {
    fn default() -> Self {
        Self {
            signal_duration_ms: 100,
            pause_duration_ms: 100,
            stimuli: Vec::new(),
            learning: false,
            learning_cycle_duration: 0,
            learning_array: None,
            shuffle: true,
            shuffle_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    #[default]
    Keep,
    Clear,
    MovingWindow {
        size: usize,
    },
}

impl StepConfig {
    pub fn to_step(self) -> SeriesStep {
        match self {
            Self::Keep => SeriesStep::Keep,
            Self::Clear => SeriesStep::Clear,
            Self::MovingWindow { size } => SeriesStep::MovingWindow(size),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Cycles accumulated before a forced reset, 0 for unbounded
    pub depth_limit: u32,
    pub step: StepConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub epoch_tap_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            epoch_tap_capacity: 64,
        }
    }
}

/// Everything a session needs, loaded from one JSON document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub signal: SignalConfig,
    pub stimulation: StimulationConfig,
    pub series: SeriesConfig,
    pub pipeline: PipelineConfig,
}

impl SessionConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(config).context("Failed to parse session config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("Config {} is not valid JSON", path.display()))?;
        Self::from_json(value)
    }

    pub fn epoch_timing(&self) -> EpochTiming {
        EpochTiming {
            epoch_duration_ms: self.signal.epoch_duration_ms,
            sampling_rate_hz: self.signal.sampling_rate_hz,
            signal_duration_ms: self.stimulation.signal_duration_ms,
            pause_duration_ms: self.stimulation.pause_duration_ms,
        }
    }

    pub fn window_sample_count(&self) -> usize {
        self.epoch_timing().window_sample_count()
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid =
            |msg: &str| -> Result<(), SyncError> { Err(SyncError::InvalidConfig(msg.to_string())) };

        if self.stimulation.stimuli.is_empty() {
            return invalid("stimulation.stimuli must not be empty");
        }
        match self
            .stimulation
            .signal_duration_ms
            .checked_add(self.stimulation.pause_duration_ms)
        {
            None => return invalid("signal_duration_ms + pause_duration_ms overflows"),
            Some(0) => return invalid("stimulation period must be positive"),
            Some(_) => {}
        }
        if self.stimulation.learning
            && self.stimulation.learning_array.as_ref().is_some_and(|a| a.is_empty())
        {
            return invalid("stimulation.learning_array must not be empty in learning mode");
        }
        match self.epoch_timing().checked_window_sample_count() {
            None => return invalid("epoch_duration_ms * sampling_rate_hz overflows"),
            Some(0) => {
                return invalid("epoch_duration_ms * sampling_rate_hz / 1000 must be at least 1")
            }
            Some(_) => {}
        }
        if self.signal.channels.as_ref().is_some_and(|c| c.is_empty()) {
            return invalid("signal.channels must select at least one channel");
        }
        if let StepConfig::MovingWindow { size: 0 } = self.series.step {
            return invalid("series.step moving window size must be positive");
        }
        if self.pipeline.channel_capacity == 0 || self.pipeline.epoch_tap_capacity == 0 {
            return invalid("pipeline channel capacities must be positive");
        }
        Ok(())
    }
}
