//! Run configuration.
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Topological order on the caller thread.
    #[default]
    Sequential,
    /// Independent branches run concurrently on a worker pool.
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first node failure stops scheduling.
    #[default]
    FailFast,
    /// Branches independent of a failure keep running.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunConfig {
    pub mode: ExecutionMode,
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrently running nodes in parallel mode; 0 uses the
    /// worker pool's default size.
    pub max_workers: usize,
    /// Wall-clock limit per node invocation. `None` and `0` both mean no
    /// limit.
    pub per_node_timeout_ms: Option<u64>,
}

impl RunConfig {
    pub fn new() -> Self { Self::default() }

    pub fn sequential() -> Self { Self::default() }

    pub fn parallel(max_workers: usize) -> Self {
        Self { mode: ExecutionMode::Parallel, max_workers, ..Self::default() }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the per-node limit, rounded up to whole milliseconds. A zero
    /// duration clears it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.per_node_timeout_ms = (millis > 0).then(|| u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    pub fn per_node_timeout(&self) -> Option<Duration> {
        self.per_node_timeout_ms.filter(|&ms| ms > 0).map(Duration::from_millis)
    }

    /// Parses a JSON object; omitted fields take their defaults.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> { serde_json::from_str(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("{}", RunConfig::default())]
    #[case(r#"{"mode": "parallel", "max_workers": 4}"#, RunConfig::parallel(4))]
    #[case(
        r#"{"failure_policy": "best_effort", "per_node_timeout_ms": 250}"#,
        RunConfig::new().with_failure_policy(FailurePolicy::BestEffort).with_timeout(Duration::from_millis(250))
    )]
    fn test_from_json(#[case] text: &str, #[case] expected: RunConfig) {
        assert_eq!(RunConfig::from_json_str(text).unwrap(), expected);
    }

    #[rstest]
    #[case(Duration::from_micros(900), Some(Duration::from_millis(1)))]
    #[case(Duration::from_nanos(1), Some(Duration::from_millis(1)))]
    #[case(Duration::from_micros(1500), Some(Duration::from_millis(2)))]
    #[case(Duration::from_secs(3), Some(Duration::from_secs(3)))]
    #[case(Duration::ZERO, None)]
    fn test_timeout_rounds_up_to_whole_millis(#[case] timeout: Duration, #[case] expected: Option<Duration>) {
        assert_eq!(RunConfig::new().with_timeout(timeout).per_node_timeout(), expected);
    }

    #[test]
    fn test_zero_timeout_from_json_means_no_limit() {
        let config = RunConfig::from_json_str(r#"{"per_node_timeout_ms": 0}"#).unwrap();
        assert_eq!(config.per_node_timeout(), None);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(RunConfig::from_json_str(r#"{"mode": "distributed"}"#).is_err());
    }
}
