pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod hal;
pub mod nodes;
pub mod observability;
pub mod resilience;

pub use config::SessionConfig;
pub use engine::{EpochPipeline, PipelineOutputs, PipelineState};
pub use error::SyncError;
