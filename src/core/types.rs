use serde::{Deserialize, Serialize};

/// Stimulus identifier as configured in the stimulation sequence.
pub type StimulusKey = u32;

/// One length-delimited message taken off the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Decoded multi-channel reading at a single instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    /// Producer clock, milliseconds
    pub timestamp: u64,

    /// One value per channel, positional
    pub values: Vec<f64>,
}

impl SampleFrame {
    pub fn new(timestamp: u64, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimulusEvent {
    /// Wall clock, milliseconds
    pub timestamp: u64,
    pub key: StimulusKey,
    /// Only set in learning mode
    pub target: Option<bool>,
    pub cycle: u32,
}

/// Stimulation and sampling parameters an epoch was cut with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EpochTiming {
    pub epoch_duration_ms: u64,
    pub sampling_rate_hz: u32,
    pub signal_duration_ms: u64,
    pub pause_duration_ms: u64,
}

impl EpochTiming {
    /// Number of samples per channel in a full epoch, `None` on overflow.
    pub fn checked_window_sample_count(&self) -> Option<usize> {
        let scaled = self
            .epoch_duration_ms
            .checked_mul(u64::from(self.sampling_rate_hz))?;
        usize::try_from(scaled / 1000).ok()
    }

    /// Number of samples per channel in a full epoch; 0 if it does not fit.
    pub fn window_sample_count(&self) -> usize {
        self.checked_window_sample_count().unwrap_or(0)
    }
}

/// Fixed-length multi-channel window anchored to one stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub key: StimulusKey,
    /// Window start, equal to the triggering stimulus timestamp
    pub timestamp: u64,
    pub cycle: u32,
    pub target: Option<bool>,
    pub timing: EpochTiming,
    pub channels: Vec<Vec<f64>>,
    pub full: bool,
}

impl Epoch {
    pub fn from_stimulus(event: &StimulusEvent, timing: EpochTiming) -> Self {
        Self {
            key: event.key,
            timestamp: event.timestamp,
            cycle: event.cycle,
            target: event.target,
            timing,
            channels: Vec::new(),
            full: false,
        }
    }

    /// Last timestamp (inclusive) that belongs to this window.
    pub fn window_end(&self) -> u64 {
        self.timestamp.saturating_add(self.timing.epoch_duration_ms)
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        timestamp >= self.timestamp && timestamp <= self.window_end()
    }

    /// Samples collected so far in the first channel.
    pub fn sample_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
}
