use crate::config::SessionConfig;
use crate::core::{Epoch, EpochTiming, ProcessingNode, SampleFrame, StimulusEvent};
use crate::error::SyncError;
use anyhow::Result;
use std::collections::VecDeque;

/// Default horizon for samples kept while no epoch is in flight.
pub const DEFAULT_SAMPLE_RETENTION_MS: u64 = 10_000;

/// Upper bound on per-channel capacity reserved up front for a new epoch.
const MAX_PREALLOCATED_SAMPLES: usize = 64 * 1024;

/// The two inputs merged at the extractor, serialized through one channel
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorInput {
    Stimulus(StimulusEvent),
    Sample(SampleFrame),
}

impl From<StimulusEvent> for ExtractorInput {
    fn from(event: StimulusEvent) -> Self {
        Self::Stimulus(event)
    }
}

impl From<SampleFrame> for ExtractorInput {
    fn from(sample: SampleFrame) -> Self {
        Self::Sample(sample)
    }
}

/// Cuts stimulus-locked epochs out of the sample stream.
///
/// Both input streams must be monotonic in time, but may interleave in any
/// order. Each stimulus opens a window `[t, t + epoch_duration_ms]`; the
/// window is emitted once every channel holds `window_sample_count` values.
/// Samples older than the oldest open window are dropped, since no later
/// stimulus can reach back to them.
pub struct EpochExtractor {
    timing: EpochTiming,
    window: usize,
    selection: Option<Vec<usize>>,
    channel_count: Option<usize>,
    epochs: VecDeque<Epoch>,
    samples: VecDeque<SampleFrame>,
    latest_sample: Option<u64>,
    sample_retention_ms: u64,
    starved_epoch_grace_ms: Option<u64>,
    emitted: u64,
    evicted: u64,
}

impl EpochExtractor {
    pub fn new(timing: EpochTiming) -> Result<Self, SyncError> {
        let window = match timing.checked_window_sample_count() {
            Some(0) => {
                return Err(SyncError::InvalidConfig(format!(
                    "{} ms at {} Hz leaves no samples per epoch",
                    timing.epoch_duration_ms, timing.sampling_rate_hz
                )))
            }
            Some(window) => window,
            None => {
                return Err(SyncError::InvalidConfig(format!(
                    "{} ms at {} Hz overflows the epoch length",
                    timing.epoch_duration_ms, timing.sampling_rate_hz
                )))
            }
        };

        Ok(Self {
            timing,
            window,
            selection: None,
            channel_count: None,
            epochs: VecDeque::new(),
            samples: VecDeque::new(),
            latest_sample: None,
            sample_retention_ms: DEFAULT_SAMPLE_RETENTION_MS,
            starved_epoch_grace_ms: None,
            emitted: 0,
            evicted: 0,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SyncError> {
        let mut extractor = Self::new(config.epoch_timing())?
            .with_sample_retention_ms(config.signal.sample_retention_ms);
        if let Some(channels) = &config.signal.channels {
            extractor = extractor.with_channels(channels.clone());
        }
        if let Some(grace) = config.signal.starved_epoch_grace_ms {
            extractor = extractor.with_starved_epoch_grace_ms(grace);
        }
        Ok(extractor)
    }

    /// Copy only these sample positions, in this order, into epochs
    pub fn with_channels(mut self, channels: Vec<usize>) -> Self {
        self.selection = Some(channels);
        self
    }

    pub fn with_sample_retention_ms(mut self, retention_ms: u64) -> Self {
        self.sample_retention_ms = retention_ms;
        self
    }

    /// Evict open windows that ended more than `grace_ms` before the newest sample
    pub fn with_starved_epoch_grace_ms(mut self, grace_ms: u64) -> Self {
        self.starved_epoch_grace_ms = Some(grace_ms);
        self
    }

    pub fn window_sample_count(&self) -> usize {
        self.window
    }

    pub fn in_flight(&self) -> usize {
        self.epochs.len()
    }

    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Open a window for `event` and fill it from samples that arrived first.
    pub fn on_stimulus(&mut self, event: StimulusEvent) -> Vec<Epoch> {
        let mut ready = Vec::new();
        let mut epoch = Epoch::from_stimulus(&event, self.timing);

        // Older windows have already seen every buffered sample.
        for sample in &self.samples {
            if epoch.contains(sample.timestamp) {
                append(&mut epoch, &sample.values, self.window);
                if epoch.full {
                    break;
                }
            }
        }

        if epoch.full {
            ready.push(epoch);
        } else {
            self.epochs.push_back(epoch);
        }

        self.purge();
        self.finish(ready)
    }

    /// Route one sample into every open window it falls in.
    pub fn on_sample(&mut self, sample: SampleFrame) -> Result<Vec<Epoch>, SyncError> {
        let sample = self.project(sample)?;
        self.latest_sample = Some(
            self.latest_sample
                .map_or(sample.timestamp, |t| t.max(sample.timestamp)),
        );

        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.epochs.len() {
            let epoch = &mut self.epochs[i];
            if epoch.contains(sample.timestamp) {
                append(epoch, &sample.values, self.window);
            }
            if epoch.full {
                if let Some(epoch) = self.epochs.remove(i) {
                    ready.push(epoch);
                }
            } else {
                i += 1;
            }
        }

        self.samples.push_back(sample);
        self.evict_starved();
        self.purge();
        Ok(self.finish(ready))
    }

    /// Check the channel count and apply the channel selection.
    fn project(&mut self, sample: SampleFrame) -> Result<SampleFrame, SyncError> {
        let got = sample.values.len();
        if got == 0 {
            return Err(SyncError::MalformedSample(
                "sample carries no channels".to_string(),
            ));
        }

        match self.channel_count {
            Some(expected) if expected != got => {
                return Err(SyncError::ChannelCountMismatch { expected, got });
            }
            Some(_) => {}
            None => {
                if let Some(selection) = &self.selection {
                    if let Some(&index) = selection.iter().find(|&&index| index >= got) {
                        return Err(SyncError::ChannelOutOfRange {
                            index,
                            channels: got,
                        });
                    }
                }
                log::debug!("epoch channel layout fixed at {} channels", got);
                self.channel_count = Some(got);
            }
        }

        match &self.selection {
            None => Ok(sample),
            Some(selection) => Ok(SampleFrame::new(
                sample.timestamp,
                selection.iter().map(|&index| sample.values[index]).collect(),
            )),
        }
    }

    fn evict_starved(&mut self) {
        let (Some(grace), Some(latest)) = (self.starved_epoch_grace_ms, self.latest_sample) else {
            return;
        };

        let before = self.epochs.len();
        self.epochs.retain(|epoch| {
            let starved = latest > epoch.window_end().saturating_add(grace);
            if starved {
                log::warn!(
                    "evicting starved epoch key={} at {} with {}/{} samples",
                    epoch.key,
                    epoch.timestamp,
                    epoch.sample_count(),
                    epoch.timing.window_sample_count()
                );
            }
            !starved
        });
        self.evicted += (before - self.epochs.len()) as u64;
    }

    fn purge(&mut self) {
        let bound = match self.epochs.iter().map(|e| e.timestamp).min() {
            Some(oldest) => oldest,
            None => match self.latest_sample {
                Some(latest) => latest.saturating_sub(self.sample_retention_ms),
                None => return,
            },
        };

        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp < bound)
        {
            self.samples.pop_front();
        }
    }

    fn finish(&mut self, ready: Vec<Epoch>) -> Vec<Epoch> {
        for epoch in &ready {
            log::debug!(
                "epoch ready: key={} cycle={} start={}",
                epoch.key,
                epoch.cycle,
                epoch.timestamp
            );
        }
        self.emitted += ready.len() as u64;
        ready
    }
}

fn append(epoch: &mut Epoch, values: &[f64], window: usize) {
    if epoch.full {
        return;
    }
    if epoch.channels.is_empty() {
        let capacity = window.min(MAX_PREALLOCATED_SAMPLES);
        epoch.channels = (0..values.len()).map(|_| Vec::with_capacity(capacity)).collect();
    }
    for (channel, &value) in epoch.channels.iter_mut().zip(values) {
        channel.push(value);
    }
    if epoch.channels.iter().all(|channel| channel.len() >= window) {
        epoch.full = true;
    }
}

impl ProcessingNode for EpochExtractor {
    type Input = ExtractorInput;
    type Output = Epoch;

    fn process(&mut self, input: ExtractorInput) -> Result<Vec<Epoch>> {
        match input {
            ExtractorInput::Stimulus(event) => Ok(self.on_stimulus(event)),
            ExtractorInput::Sample(sample) => Ok(self.on_sample(sample)?),
        }
    }

    fn on_destroy(&mut self) {
        if !self.epochs.is_empty() {
            log::debug!("discarding {} partial epochs", self.epochs.len());
        }
    }

    fn gauges(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("in_flight", self.in_flight() as u64),
            ("buffered_samples", self.buffered_samples() as u64),
            ("evicted", self.evicted),
        ]
    }
}
