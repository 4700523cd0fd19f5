use thiserror::Error;

/// Typed failures raised by pipeline stages.
///
/// Expected anomalies in the stimulus stream (foreign keys, incomplete
/// cycles) are not errors: the aggregator recovers from them by resetting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("frame length prefix {len} exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("malformed sample payload: {0}")]
    MalformedSample(String),

    #[error("sample carries {got} channels, run started with {expected}")]
    ChannelCountMismatch { expected: usize, got: usize },

    #[error("channel index {index} out of range for a {channels}-channel sample")]
    ChannelOutOfRange { index: usize, channels: usize },

    #[error("transform changed channel {channel} length from {before} to {after}")]
    ShapeChanged {
        channel: usize,
        before: usize,
        after: usize,
    },

    #[error("epoch for key {key} has channels of unequal length")]
    RaggedEpoch { key: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
