pub mod epoch_extractor;
pub mod epoch_series;
pub mod epoch_transform;
pub mod frame_decoder;
pub mod sample_decoder;
pub mod stimulus_source;

pub use epoch_extractor::{EpochExtractor, ExtractorInput};
pub use epoch_series::{EpochSeries, EpochSeriesAggregator, SeriesInput, SeriesStep};
pub use epoch_transform::{ChannelTransform, EpochTransform};
pub use frame_decoder::{encode_frame, FrameDecoder};
pub use sample_decoder::{encode_sample, LeSampleDecoder, SampleDecoder};
pub use stimulus_source::{SequenceOrder, StimulusSequencer, StimulusSource, TargetOrder};
