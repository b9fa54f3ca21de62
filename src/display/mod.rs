//! Human-readable reports over pipelines and provenance logs.
pub mod trace;

pub use trace::{inspect, timings};
