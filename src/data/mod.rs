//! Per-run telemetry buffers.
pub mod sample_stream;

pub use sample_stream::{ChannelSpec, LineStyle, Sample, SampleStream, StreamObserver};
