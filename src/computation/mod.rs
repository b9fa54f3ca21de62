//! Executes validated pipelines.
pub mod cancel;
pub mod config;
pub mod context;
pub mod engine;
mod invoke;
pub mod ledger;
mod parallel;

pub use cancel::CancellationToken;
pub use config::{ExecutionMode, FailurePolicy, RunConfig};
pub use context::{Context, Metadata, Payload};
pub use engine::{run, Engine, RunResult, RunStatus};
pub use ledger::{ExecutionError, Ledger, NodeErrorKind, NodeExecutionError, NodeOutcome};
