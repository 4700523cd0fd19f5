use crate::core::{SampleFrame, SourceNode};
use crate::nodes::{FrameDecoder, SampleDecoder};
use crate::observability::NodeMetrics;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Reads length-prefixed sample frames off a byte stream (usually TCP).
///
/// Frames are reassembled by [`FrameDecoder`] and handed to the configured
/// [`SampleDecoder`]. Undecodable payloads are logged and skipped; a desync
/// can only be noticed through `read_timeout` or `max_payload_len`.
pub struct SignalStreamReader<R> {
    reader: R,
    decoder: FrameDecoder,
    sample_decoder: Arc<dyn SampleDecoder>,
    read_timeout: Option<Duration>,
    chunk_size: usize,
    metrics: Option<Arc<NodeMetrics>>,
    bytes_read: u64,
}

impl<R> SignalStreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, sample_decoder: Arc<dyn SampleDecoder>) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            sample_decoder,
            read_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            metrics: None,
            bytes_read: 0,
        }
    }

    pub fn with_frame_decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<NodeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.read(buf))
                .await
                .map_err(|_| anyhow!("No signal data for {:?}, assuming stream desync", limit))?
                .map_err(Into::into),
            None => Ok(self.reader.read(buf).await?),
        }
    }
}

#[async_trait]
impl<R> SourceNode for SignalStreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    type Output = SampleFrame;

    async fn run<T>(
        &mut self,
        tx: mpsc::Sender<T>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()>
    where
        T: From<SampleFrame> + Send + 'static,
    {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let read = tokio::select! {
                _ = shutdown.recv() => break,
                read = self.read_chunk(&mut buf) => read?,
            };

            if read == 0 {
                log::info!("signal stream closed after {} bytes", self.bytes_read);
                break;
            }
            self.bytes_read += read as u64;
            if let Some(metrics) = &self.metrics {
                metrics.set_gauge("bytes_read", self.bytes_read);
            }

            let frames = self.decoder.push(&buf[..read])?;
            for frame in frames {
                if let Some(metrics) = &self.metrics {
                    metrics.record_input();
                }

                let sample = match self.sample_decoder.decode(&frame.payload) {
                    Ok(sample) => sample,
                    Err(e) => {
                        log::warn!("skipping undecodable frame of {} bytes: {}", frame.len(), e);
                        if let Some(metrics) = &self.metrics {
                            metrics.record_error();
                        }
                        continue;
                    }
                };

                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    sent = tx.send(T::from(sample)) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_outputs(1);
                }
            }

            // Frames ahead of a rejected prefix are delivered first
            if let Some(e) = self.decoder.failure() {
                return Err(anyhow!(e.clone()));
            }
        }

        Ok(())
    }
}
