use crate::config::SeriesConfig;
use crate::core::{Epoch, ProcessingNode, StimulusKey};
use crate::error::SyncError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type StepFn = Arc<dyn Fn(&mut Vec<f64>) + Send + Sync>;

/// Accumulated values: key -> channel -> sample position -> one value per epoch
pub type Flows = BTreeMap<StimulusKey, Vec<Vec<Vec<f64>>>>;

/// What each accumulated vector keeps once a cycle has been emitted
#[derive(Clone, Default)]
pub enum SeriesStep {
    /// Keep everything; each emission grows by one value per position
    #[default]
    Keep,
    /// Start over; adjacent, non-overlapping ensembles
    Clear,
    /// Keep the newest `n - 1` values so the next emission holds `n`
    MovingWindow(usize),
    Custom(StepFn),
}

impl SeriesStep {
    pub fn apply(&self, values: &mut Vec<f64>) {
        match self {
            Self::Keep => {}
            Self::Clear => values.clear(),
            Self::MovingWindow(n) => {
                let keep = n.saturating_sub(1);
                if values.len() > keep {
                    values.drain(..values.len() - keep);
                }
            }
            Self::Custom(f) => f(values),
        }
    }
}

impl fmt::Debug for SeriesStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => write!(f, "Keep"),
            Self::Clear => write!(f, "Clear"),
            Self::MovingWindow(n) => write!(f, "MovingWindow({})", n),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Snapshot emitted once per completed stimulus cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSeries {
    /// Cycle number of the epoch that completed the snapshot
    pub cycle: u32,
    /// Complete cycles accumulated since the last reset
    pub depth: u64,
    pub flows: Flows,
}

impl EpochSeries {
    pub fn keys(&self) -> impl Iterator<Item = StimulusKey> + '_ {
        self.flows.keys().copied()
    }

    /// Ensemble mean per key, channel and sample position.
    pub fn averaged(&self) -> BTreeMap<StimulusKey, Vec<Vec<f64>>> {
        self.flows
            .iter()
            .map(|(&key, channels)| {
                let means = channels
                    .iter()
                    .map(|positions| {
                        positions
                            .iter()
                            .map(|values| {
                                if values.is_empty() {
                                    0.0
                                } else {
                                    values.iter().sum::<f64>() / values.len() as f64
                                }
                            })
                            .collect()
                    })
                    .collect();
                (key, means)
            })
            .collect()
    }
}

/// What the aggregator stage consumes: epochs, interleaved with key changes
/// that must take effect at a precise point in the epoch stream.
#[derive(Debug, Clone)]
pub enum SeriesInput {
    Epoch(Epoch),
    Reconfigure(Vec<StimulusKey>),
}

impl From<Epoch> for SeriesInput {
    fn from(epoch: Epoch) -> Self {
        Self::Epoch(epoch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    ForeignKey,
    IncompleteCycle,
    ShapeChanged,
    DepthLimit,
    Reconfigured,
}

/// Stacks epochs of the same stimulus across cycles for signal averaging.
///
/// One cycle is `stimuli.len()` consecutive epochs sharing a cycle number.
/// A snapshot goes out each time a cycle completes. Anything that breaks the
/// cycle structure clears the accumulator instead of failing.
pub struct EpochSeriesAggregator {
    stimuli: Vec<StimulusKey>,
    cycle_length: u64,
    depth_limit: u32,
    step: SeriesStep,
    flows: Flows,
    shape: Option<(usize, usize)>,
    last_cycle: Option<u32>,
    epoch_in_series: u64,
    epoch_in_series_cycle: u64,
    cycles_in_series: u64,
    resets: u64,
    emitted: u64,
}

impl EpochSeriesAggregator {
    pub fn new(stimuli: Vec<StimulusKey>, depth_limit: u32) -> Result<Self, SyncError> {
        if stimuli.is_empty() {
            return Err(SyncError::InvalidConfig(
                "series needs at least one stimulus key".to_string(),
            ));
        }

        Ok(Self {
            cycle_length: stimuli.len() as u64,
            stimuli,
            depth_limit,
            step: SeriesStep::Keep,
            flows: Flows::new(),
            shape: None,
            last_cycle: None,
            epoch_in_series: 0,
            epoch_in_series_cycle: 0,
            cycles_in_series: 0,
            resets: 0,
            emitted: 0,
        })
    }

    pub fn from_config(stimuli: Vec<StimulusKey>, config: &SeriesConfig) -> Result<Self, SyncError> {
        Ok(Self::new(stimuli, config.depth_limit)?.with_step(config.step.to_step()))
    }

    pub fn with_step(mut self, step: SeriesStep) -> Self {
        self.step = step;
        self
    }

    pub fn stimuli(&self) -> &[StimulusKey] {
        &self.stimuli
    }

    pub fn flows(&self) -> &Flows {
        &self.flows
    }

    pub fn epoch_in_series(&self) -> u64 {
        self.epoch_in_series
    }

    pub fn cycles_in_series(&self) -> u64 {
        self.cycles_in_series
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Replace the expected identifier set, dropping everything accumulated.
    pub fn reconfigure(&mut self, stimuli: Vec<StimulusKey>) -> Result<(), SyncError> {
        if stimuli.is_empty() {
            return Err(SyncError::InvalidConfig(
                "series needs at least one stimulus key".to_string(),
            ));
        }
        log::info!("series keys {:?} -> {:?}", self.stimuli, stimuli);
        self.cycle_length = stimuli.len() as u64;
        self.stimuli = stimuli;
        self.reset(ResetReason::Reconfigured);
        Ok(())
    }

    /// Feed one completed epoch; returns the snapshot if it closed a cycle.
    pub fn push(&mut self, epoch: Epoch) -> Result<Option<EpochSeries>, SyncError> {
        if !self.stimuli.contains(&epoch.key) {
            log::warn!(
                "junk epoch: key {} not in {:?}, discarding and resetting series",
                epoch.key,
                self.stimuli
            );
            self.reset(ResetReason::ForeignKey);
            return Ok(None);
        }

        let shape = epoch_shape(&epoch)?;

        if self.epoch_in_series_cycle != 0 && self.last_cycle != Some(epoch.cycle) {
            log::warn!(
                "incomplete cycle: epoch from cycle {} while cycle {:?} has {}/{} epochs, resetting series",
                epoch.cycle,
                self.last_cycle,
                self.epoch_in_series_cycle,
                self.cycle_length
            );
            self.reset(ResetReason::IncompleteCycle);
        }

        if self.shape.is_some_and(|current| current != shape) {
            log::warn!(
                "epoch shape {:?} differs from series shape {:?}, resetting series",
                shape,
                self.shape
            );
            self.reset(ResetReason::ShapeChanged);
        }
        self.shape = Some(shape);

        self.accumulate(&epoch);
        self.last_cycle = Some(epoch.cycle);

        self.epoch_in_series += 1;
        self.epoch_in_series_cycle = self.epoch_in_series % self.cycle_length;
        self.cycles_in_series = self.epoch_in_series / self.cycle_length;

        if self.epoch_in_series_cycle != 0 {
            return Ok(None);
        }

        let series = EpochSeries {
            cycle: epoch.cycle,
            depth: self.cycles_in_series,
            flows: self.flows.clone(),
        };
        self.emitted += 1;
        log::debug!(
            "series ready: cycle {} depth {} ({} epochs)",
            series.cycle,
            series.depth,
            self.epoch_in_series
        );

        for channels in self.flows.values_mut() {
            for positions in channels.iter_mut() {
                for values in positions.iter_mut() {
                    self.step.apply(values);
                }
            }
        }

        if self.depth_limit > 0 && self.cycles_in_series >= u64::from(self.depth_limit) {
            log::debug!("series reached depth limit {}", self.depth_limit);
            self.reset(ResetReason::DepthLimit);
        }

        Ok(Some(series))
    }

    fn accumulate(&mut self, epoch: &Epoch) {
        let channels = self.flows.entry(epoch.key).or_insert_with(|| {
            epoch
                .channels
                .iter()
                .map(|channel| vec![Vec::new(); channel.len()])
                .collect()
        });

        for (positions, samples) in channels.iter_mut().zip(&epoch.channels) {
            for (values, &sample) in positions.iter_mut().zip(samples) {
                values.push(sample);
            }
        }
    }

    fn reset(&mut self, reason: ResetReason) {
        log::debug!(
            "series reset ({:?}) after {} epochs / {} cycles",
            reason,
            self.epoch_in_series,
            self.cycles_in_series
        );
        self.flows.clear();
        self.shape = None;
        self.last_cycle = None;
        self.epoch_in_series = 0;
        self.epoch_in_series_cycle = 0;
        self.cycles_in_series = 0;
        self.resets += 1;
    }
}

fn epoch_shape(epoch: &Epoch) -> Result<(usize, usize), SyncError> {
    let len = epoch.channels.first().map(|c| c.len()).unwrap_or(0);
    if epoch.channels.iter().any(|channel| channel.len() != len) {
        return Err(SyncError::RaggedEpoch { key: epoch.key });
    }
    Ok((epoch.channels.len(), len))
}

impl ProcessingNode for EpochSeriesAggregator {
    type Input = SeriesInput;
    type Output = EpochSeries;

    fn process(&mut self, input: SeriesInput) -> Result<Vec<EpochSeries>> {
        match input {
            SeriesInput::Epoch(epoch) => Ok(self.push(epoch)?.into_iter().collect()),
            SeriesInput::Reconfigure(stimuli) => {
                self.reconfigure(stimuli)?;
                Ok(Vec::new())
            }
        }
    }

    fn gauges(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("epochs_in_series", self.epoch_in_series),
            ("cycles_in_series", self.cycles_in_series),
            ("resets", self.resets),
        ]
    }

    fn on_destroy(&mut self) {
        if self.epoch_in_series > 0 {
            log::debug!(
                "discarding partial series of {} epochs",
                self.epoch_in_series
            );
        }
    }
}
