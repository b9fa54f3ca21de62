//! Cooperative cancellation of a run.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable flag checked before each node is scheduled.
///
/// Nodes already running are allowed to finish; nothing new starts once the
/// token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.flag.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.flag.load(Ordering::SeqCst) }
}
