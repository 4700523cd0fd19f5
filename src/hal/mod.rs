pub mod signal_stream;

pub use signal_stream::SignalStreamReader;
