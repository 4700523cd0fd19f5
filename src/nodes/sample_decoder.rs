use crate::core::SampleFrame;
use crate::error::SyncError;

const HEADER_LEN: usize = 12;

/// Turns one frame payload into a typed sample.
///
/// Implementations must keep the channel count stable for the lifetime of a
/// run; the extractor rejects samples whose count changes.
pub trait SampleDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<SampleFrame, SyncError>;
}

/// Reference payload layout: `[u64 LE timestamp ms][u32 LE n][n x f64 LE]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeSampleDecoder;

impl SampleDecoder for LeSampleDecoder {
    fn decode(&self, payload: &[u8]) -> Result<SampleFrame, SyncError> {
        if payload.len() < HEADER_LEN {
            return Err(SyncError::MalformedSample(format!(
                "payload of {} bytes is shorter than the {}-byte header",
                payload.len(),
                HEADER_LEN
            )));
        }

        let timestamp = u64::from_le_bytes(le_array(&payload[0..8]));
        let count = u32::from_le_bytes(le_array(&payload[8..12])) as usize;

        let body = &payload[HEADER_LEN..];
        if body.len() != count * 8 {
            return Err(SyncError::MalformedSample(format!(
                "header announces {} channels but body holds {} bytes",
                count,
                body.len()
            )));
        }

        let values = body
            .chunks_exact(8)
            .map(|chunk| f64::from_le_bytes(le_array(chunk)))
            .collect();

        Ok(SampleFrame::new(timestamp, values))
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Inverse of [`LeSampleDecoder`], used by synthetic sources.
pub fn encode_sample(sample: &SampleFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + sample.values.len() * 8);
    out.extend_from_slice(&sample.timestamp.to_le_bytes());
    out.extend_from_slice(&(sample.values.len() as u32).to_le_bytes());
    for value in &sample.values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
