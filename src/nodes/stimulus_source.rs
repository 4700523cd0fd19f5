use crate::config::StimulationConfig;
use crate::core::{SourceNode, StimulusEvent, StimulusKey};
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

pub type SequenceFn = Arc<dyn Fn(&mut [StimulusKey]) + Send + Sync>;

/// Receives the learning array and the current target index, returns the next index.
pub type TargetFn = Arc<dyn Fn(&[StimulusKey], usize) -> usize + Send + Sync>;

/// How the identifier sequence is reordered before each pass
#[derive(Clone, Default)]
pub enum SequenceOrder {
    #[default]
    Shuffle,
    Fixed,
    Custom(SequenceFn),
}

impl fmt::Debug for SequenceOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shuffle => write!(f, "Shuffle"),
            Self::Fixed => write!(f, "Fixed"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// How the learning target moves once its cycles are spent
#[derive(Clone, Default)]
pub enum TargetOrder {
    #[default]
    RoundRobin,
    Custom(TargetFn),
}

impl fmt::Debug for TargetOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "RoundRobin"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Time-free core of the stimulus source: decides which key comes next.
///
/// A pass is reordered right before its first stimulus is drawn, so every
/// pass (including the first) sees exactly one reorder. The cycle counter
/// advances when a pass completes.
pub struct StimulusSequencer {
    sequence: Vec<StimulusKey>,
    position: usize,
    cycle: u32,
    order: SequenceOrder,
    rng: StdRng,
    reorders: u64,

    learning: bool,
    learning_cycle_duration: u32,
    learning_array: Vec<StimulusKey>,
    target_index: usize,
    learning_cycle: u32,
    target_order: TargetOrder,
}

impl StimulusSequencer {
    pub fn new(config: &StimulationConfig) -> Result<Self, SyncError> {
        if config.stimuli.is_empty() {
            return Err(SyncError::InvalidConfig(
                "stimulation sequence is empty".to_string(),
            ));
        }

        let learning_array = config
            .learning_array
            .clone()
            .unwrap_or_else(|| config.stimuli.clone());
        if config.learning && learning_array.is_empty() {
            return Err(SyncError::InvalidConfig(
                "learning mode needs a non-empty learning array".to_string(),
            ));
        }

        let rng = match config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            sequence: config.stimuli.clone(),
            position: 0,
            cycle: 0,
            order: if config.shuffle {
                SequenceOrder::Shuffle
            } else {
                SequenceOrder::Fixed
            },
            rng,
            reorders: 0,
            learning: config.learning,
            learning_cycle_duration: config.learning_cycle_duration,
            learning_array,
            target_index: 0,
            learning_cycle: 0,
            target_order: TargetOrder::RoundRobin,
        })
    }

    pub fn with_order(mut self, order: SequenceOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_target_order(mut self, target_order: TargetOrder) -> Self {
        self.target_order = target_order;
        self
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Number of passes that have been reordered so far
    pub fn reorders(&self) -> u64 {
        self.reorders
    }

    /// Order of the pass currently being presented
    pub fn sequence(&self) -> &[StimulusKey] {
        &self.sequence
    }

    /// Key currently designated as the learning target
    pub fn target_key(&self) -> Option<StimulusKey> {
        if !self.learning {
            return None;
        }
        self.learning_array.get(self.target_index).copied()
    }

    /// Draw the next stimulus, stamped with `timestamp`.
    ///
    /// In learning mode `target` is `Some(key == target_key())`: the target is
    /// matched by key, not by position in the pass.
    pub fn next_event(&mut self, timestamp: u64) -> StimulusEvent {
        if self.position == 0 {
            self.reorder();
        }

        let key = self.sequence[self.position];
        let target = self.learning.then(|| self.target_key() == Some(key));
        let event = StimulusEvent {
            timestamp,
            key,
            target,
            cycle: self.cycle,
        };

        self.position += 1;
        if self.position == self.sequence.len() {
            self.complete_pass();
        }

        event
    }

    /// Replace the identifier set and start over from cycle 0.
    pub fn reset(&mut self, stimuli: Vec<StimulusKey>) -> Result<(), SyncError> {
        if stimuli.is_empty() {
            return Err(SyncError::InvalidConfig(
                "stimulation sequence is empty".to_string(),
            ));
        }
        self.sequence = stimuli;
        self.position = 0;
        self.cycle = 0;
        self.learning_cycle = 0;
        Ok(())
    }

    fn reorder(&mut self) {
        match &self.order {
            SequenceOrder::Shuffle => self.sequence.shuffle(&mut self.rng),
            SequenceOrder::Fixed => {}
            SequenceOrder::Custom(f) => f(&mut self.sequence),
        }
        self.reorders += 1;
    }

    fn complete_pass(&mut self) {
        self.position = 0;
        self.cycle = self.cycle.wrapping_add(1);

        if !self.learning {
            return;
        }

        self.learning_cycle = self.learning_cycle.wrapping_add(1);
        if self.learning_cycle >= self.learning_cycle_duration {
            let len = self.learning_array.len();
            let next = match &self.target_order {
                TargetOrder::RoundRobin => (self.target_index + 1) % len,
                TargetOrder::Custom(f) => f(&self.learning_array, self.target_index) % len,
            };
            log::debug!(
                "learning target moves from {:?} to {:?}",
                self.learning_array.get(self.target_index),
                self.learning_array.get(next)
            );
            self.target_index = next;
            self.learning_cycle = 0;
        }
    }
}

/// Requests accepted by a running [`StimulusSource`]
#[derive(Debug, Clone)]
pub enum StimulusCommand {
    Reset {
        stimuli: Vec<StimulusKey>,
        signal_duration_ms: u64,
        pause_duration_ms: u64,
    },
}

/// Sends commands to a running stimulus source
#[derive(Debug, Clone)]
pub struct StimulusHandle {
    tx: mpsc::Sender<StimulusCommand>,
}

impl StimulusHandle {
    pub async fn reset(
        &self,
        stimuli: Vec<StimulusKey>,
        signal_duration_ms: u64,
        pause_duration_ms: u64,
    ) -> Result<()> {
        self.tx
            .send(StimulusCommand::Reset {
                stimuli,
                signal_duration_ms,
                pause_duration_ms,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Stimulus source is not running"))
    }
}

/// Timer-driven producer emitting one stimulus per `signal + pause` period.
pub struct StimulusSource {
    sequencer: StimulusSequencer,
    period: Duration,
    commands_tx: mpsc::Sender<StimulusCommand>,
    commands_rx: mpsc::Receiver<StimulusCommand>,
    emitted: u64,
}

impl StimulusSource {
    pub fn new(config: &StimulationConfig) -> Result<Self, SyncError> {
        let sequencer = StimulusSequencer::new(config)?;
        Self::from_sequencer(
            sequencer,
            config.signal_duration_ms,
            config.pause_duration_ms,
        )
    }

    pub fn from_sequencer(
        sequencer: StimulusSequencer,
        signal_duration_ms: u64,
        pause_duration_ms: u64,
    ) -> Result<Self, SyncError> {
        let period = stimulus_period(signal_duration_ms, pause_duration_ms)?;
        let (commands_tx, commands_rx) = mpsc::channel(8);
        Ok(Self {
            sequencer,
            period,
            commands_tx,
            commands_rx,
            emitted: 0,
        })
    }

    pub fn handle(&self) -> StimulusHandle {
        StimulusHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn sequencer(&self) -> &StimulusSequencer {
        &self.sequencer
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn apply(&mut self, command: StimulusCommand) -> Result<(), SyncError> {
        match command {
            StimulusCommand::Reset {
                stimuli,
                signal_duration_ms,
                pause_duration_ms,
            } => {
                let period = stimulus_period(signal_duration_ms, pause_duration_ms)?;
                self.sequencer.reset(stimuli)?;
                self.period = period;
                log::info!(
                    "stimulus sequence reset to {:?}, period {:?}",
                    self.sequencer.sequence(),
                    self.period
                );
                Ok(())
            }
        }
    }
}

fn stimulus_period(signal_duration_ms: u64, pause_duration_ms: u64) -> Result<Duration, SyncError> {
    let period_ms = signal_duration_ms.saturating_add(pause_duration_ms);
    if period_ms == 0 {
        return Err(SyncError::InvalidConfig(
            "signal and pause durations are both zero".to_string(),
        ));
    }
    Ok(Duration::from_millis(period_ms))
}

#[async_trait]
impl SourceNode for StimulusSource {
    type Output = StimulusEvent;

    async fn run<T>(
        &mut self,
        tx: mpsc::Sender<T>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()>
    where
        T: From<StimulusEvent> + Send + 'static,
    {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(command) = self.commands_rx.recv() => {
                    match self.apply(command) {
                        Ok(()) => {
                            ticker = interval_at(Instant::now() + self.period, self.period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                        Err(e) => log::warn!("ignoring stimulus reset: {}", e),
                    }
                }
                _ = ticker.tick() => {
                    let event = self.sequencer.next_event(wall_clock_ms());
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        sent = tx.send(T::from(event)) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                    self.emitted += 1;
                }
            }
        }

        log::debug!("stimulus source stopped after {} events", self.emitted);
        Ok(())
    }
}
