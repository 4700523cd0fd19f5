use crate::core::{Frame, ProcessingNode};
use crate::error::SyncError;
use anyhow::Result;

/// Size of the little-endian length prefix in front of every frame.
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Consumed bytes are only compacted away past this point.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Reassembles `[u64 LE length][payload]` frames from arbitrarily split chunks.
///
/// A corrupted length prefix cannot be detected here; it shows up as a stall
/// (no further frames) unless `max_payload_len` is set.
///
/// A rejected prefix poisons the decoder. Frames completed earlier in the same
/// chunk are still returned; the error comes back from that call if nothing
/// was completed, otherwise from [`failure`](Self::failure) and every later push.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    cursor: usize,
    expected: Option<usize>,
    max_payload_len: Option<u64>,
    failed: Option<SyncError>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject prefixes above `max` instead of waiting for the payload forever
    pub fn with_max_payload_len(max: u64) -> Self {
        Self {
            max_payload_len: Some(max),
            ..Self::default()
        }
    }

    /// Bytes received but not yet emitted as part of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Bytes currently held by the accumulation buffer, consumed or not
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Payload length announced by the last prefix, if its payload is incomplete
    pub fn expected_len(&self) -> Option<usize> {
        self.expected
    }

    /// The rejected prefix that stopped decoding, if any
    pub fn failure(&self) -> Option<&SyncError> {
        self.failed.as_ref()
    }

    /// Feed one chunk and hand every completed frame to `emit`, in order.
    pub fn push_with<F>(&mut self, chunk: &[u8], mut emit: F) -> Result<(), SyncError>
    where
        F: FnMut(Frame),
    {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        self.buffer.extend_from_slice(chunk);

        let mut completed = 0usize;
        while self.cursor < self.buffer.len() {
            let unread = self.buffer.len() - self.cursor;

            let expected = match self.expected {
                Some(len) => len,
                None if unread >= LENGTH_PREFIX_LEN => match self.read_prefix() {
                    Ok(len) => {
                        self.cursor += LENGTH_PREFIX_LEN;
                        self.expected = Some(len);
                        len
                    }
                    Err(e) => {
                        self.failed = Some(e);
                        break;
                    }
                },
                None => break,
            };

            if self.buffer.len() - self.cursor < expected {
                break;
            }

            let end = self.cursor + expected;
            let payload = self.buffer[self.cursor..end].to_vec();
            self.cursor = end;
            self.expected = None;
            emit(Frame::new(payload));
            completed += 1;
        }

        self.compact();
        match &self.failed {
            Some(e) if completed == 0 => Err(e.clone()),
            _ => Ok(()),
        }
    }

    /// Feed one chunk and collect the frames it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, SyncError> {
        let mut frames = Vec::new();
        self.push_with(chunk, |frame| frames.push(frame))?;
        Ok(frames)
    }

    fn read_prefix(&self) -> Result<usize, SyncError> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&self.buffer[self.cursor..self.cursor + LENGTH_PREFIX_LEN]);
        let len = u64::from_le_bytes(prefix);

        if let Some(max) = self.max_payload_len {
            if len > max {
                return Err(SyncError::FrameTooLarge { len, max });
            }
        }

        usize::try_from(len).map_err(|_| SyncError::FrameTooLarge {
            len,
            max: usize::MAX as u64,
        })
    }

    fn compact(&mut self) {
        if self.cursor == self.buffer.len() {
            self.buffer.clear();
            self.cursor = 0;
        } else if self.cursor >= COMPACT_THRESHOLD && self.cursor * 2 >= self.buffer.len() {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

impl ProcessingNode for FrameDecoder {
    type Input = Vec<u8>;
    type Output = Frame;

    fn process(&mut self, input: Vec<u8>) -> Result<Vec<Frame>> {
        Ok(self.push(&input)?)
    }

    fn gauges(&self) -> Vec<(&'static str, u64)> {
        vec![("pending_bytes", self.pending() as u64)]
    }

    fn on_destroy(&mut self) {
        if self.pending() > 0 {
            log::debug!("dropping {} undelivered transport bytes", self.pending());
        }
    }
}

/// Wrap a payload in the transport's length-prefixed framing.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}
