//! Acquired data: the in-memory time series and its file export.

pub mod export;
pub mod sample_buffer;

pub use export::{export_samples, ExportRequest};
pub use sample_buffer::{LastSample, Sample, SampleBuffer};
