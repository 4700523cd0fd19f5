use crate::core::ProcessingNode;
use crate::observability::NodeMetrics;
use super::ErrorPolicy;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drives a [`ProcessingNode`] from a channel, with metrics and an error policy.
pub struct ResilientNode<N: ProcessingNode> {
    inner: N,
    metrics: Arc<NodeMetrics>,
    error_policy: ErrorPolicy,
}

impl<N: ProcessingNode> ResilientNode<N> {
    pub fn new(inner: N, metrics: Arc<NodeMetrics>, error_policy: ErrorPolicy) -> Self {
        Self {
            inner,
            metrics,
            error_policy,
        }
    }

    /// Process a single input under the error policy.
    ///
    /// `Ok(None)` means the input was dropped by `SkipInput`.
    pub fn process(&mut self, input: N::Input) -> Result<Option<Vec<N::Output>>> {
        let start = self.metrics.start_processing();
        self.metrics.record_input();

        let result = self.inner.process(input);
        for (name, value) in self.inner.gauges() {
            self.metrics.set_gauge(name, value);
        }

        match result {
            Ok(outputs) => {
                self.metrics.finish_processing(start);
                self.metrics.record_outputs(outputs.len() as u64);
                Ok(Some(outputs))
            }
            Err(e) => {
                self.metrics.record_error();

                match self.error_policy {
                    ErrorPolicy::Propagate => Err(e),
                    ErrorPolicy::SkipInput => {
                        log::warn!("[{}] skipping input: {}", self.metrics.node_id(), e);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Run until `rx` closes or every receiver of `tx` is gone.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<N::Input>,
        tx: mpsc::Sender<N::Output>,
    ) -> Result<N> {
        'inputs: while let Some(input) = rx.recv().await {
            let Some(outputs) = self.process(input)? else {
                continue;
            };
            for output in outputs {
                if tx.send(output).await.is_err() {
                    log::debug!("[{}] downstream closed", self.metrics.node_id());
                    break 'inputs;
                }
            }
        }

        self.inner.on_destroy();
        Ok(self.inner)
    }

    pub fn into_inner(self) -> N {
        self.inner
    }
}
