pub mod node;
pub mod types;

pub use node::{ProcessingNode, SourceNode};
pub use types::{Epoch, EpochTiming, Frame, SampleFrame, StimulusEvent, StimulusKey};
