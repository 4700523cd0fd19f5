use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

/// A synchronous stage in the pipeline.
///
/// Nodes are pure reducers over their input: `process` must return promptly
/// and never block, since it runs inline on the stage's task. One input may
/// produce zero or more outputs.
pub trait ProcessingNode: Send {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Consume one input, returning whatever became ready because of it
    fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>>;

    /// Called once after the input channel closes. Partial state is dropped.
    fn on_destroy(&mut self) {}

    /// Stage-specific values published to the stage metrics after every input
    fn gauges(&self) -> Vec<(&'static str, u64)> {
        Vec::new()
    }
}

/// A producer that drives the pipeline from an external clock or transport.
#[async_trait]
pub trait SourceNode: Send {
    type Output: Send + 'static;

    /// Produce until the shutdown signal fires, the downstream channel closes,
    /// or the underlying source ends.
    async fn run<T>(
        &mut self,
        tx: mpsc::Sender<T>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()>
    where
        T: From<Self::Output> + Send + 'static;
}
