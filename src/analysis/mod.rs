//! Graph algorithms over the pipeline arena.
pub mod topology;
