pub mod pipeline;
pub mod state;

pub use pipeline::{EpochPipeline, PipelineOutputs};
pub use state::PipelineState;
