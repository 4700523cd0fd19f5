use crate::core::{Epoch, ProcessingNode};
use crate::error::SyncError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type ChannelFn = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// Per-channel signal operation applied to every epoch before aggregation.
#[derive(Clone)]
pub enum ChannelTransform {
    /// Subtract the least-squares line
    Detrend,
    RemoveMean,
    Custom(ChannelFn),
}

impl ChannelTransform {
    pub fn apply(&self, samples: &[f64]) -> Vec<f64> {
        match self {
            Self::Detrend => detrend(samples),
            Self::RemoveMean => {
                let mean = mean(samples);
                samples.iter().map(|v| v - mean).collect()
            }
            Self::Custom(f) => f(samples),
        }
    }
}

impl fmt::Debug for ChannelTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detrend => write!(f, "Detrend"),
            Self::RemoveMean => write!(f, "RemoveMean"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Names accepted in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Detrend,
    RemoveMean,
}

impl From<TransformKind> for ChannelTransform {
    fn from(kind: TransformKind) -> Self {
        match kind {
            TransformKind::Detrend => Self::Detrend,
            TransformKind::RemoveMean => Self::RemoveMean,
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn detrend(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n < 2 {
        return samples.iter().map(|_| 0.0).collect();
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(samples);
    let (mut cov, mut var) = (0.0, 0.0);
    for (i, &y) in samples.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov += dx * (y - y_mean);
        var += dx * dx;
    }
    let slope = cov / var;

    samples
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (y_mean + slope * (i as f64 - x_mean)))
        .collect()
}

/// Applies a chain of channel transforms, keeping the epoch's shape intact.
#[derive(Debug, Clone, Default)]
pub struct EpochTransform {
    steps: Vec<ChannelTransform>,
}

impl EpochTransform {
    pub fn new(steps: Vec<ChannelTransform>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, mut epoch: Epoch) -> Result<Epoch, SyncError> {
        for step in &self.steps {
            for (channel, samples) in epoch.channels.iter_mut().enumerate() {
                let out = step.apply(samples);
                if out.len() != samples.len() {
                    return Err(SyncError::ShapeChanged {
                        channel,
                        before: samples.len(),
                        after: out.len(),
                    });
                }
                *samples = out;
            }
        }
        Ok(epoch)
    }
}

impl ProcessingNode for EpochTransform {
    type Input = Epoch;
    type Output = Epoch;

    fn process(&mut self, epoch: Epoch) -> Result<Vec<Epoch>> {
        Ok(vec![self.apply(epoch)?])
    }
}
