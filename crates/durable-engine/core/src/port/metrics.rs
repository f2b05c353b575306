//! Metrics port.
//!
//! Instrumentation goes through [`MetricsHandler`] so callers can plug in
//! Prometheus, a recording double, or nothing at all.

/// Metric names emitted by the engine.
pub mod names {
    pub const EVENT_BLOB_SIZE: &str = "event_blob_size";
    pub const EVENT_BLOB_SIZE_EXCEEDS_LIMIT: &str = "event_blob_size_exceeds_limit";
    pub const MEMO_SIZE: &str = "memo_size";
    pub const MEMO_SIZE_EXCEEDS_LIMIT: &str = "memo_size_exceeds_limit";
    pub const WORKFLOW_RUN_TIMEOUT_OVERRIDE_COUNT: &str = "workflow_run_timeout_overrides";
    pub const WORKFLOW_TASK_TIMEOUT_OVERRIDE_COUNT: &str = "workflow_task_timeout_overrides";
    pub const RECLAIM_RESOURCES_NAMESPACE_DELETE_SUCCESS_COUNT: &str =
        "reclaim_resources_namespace_delete_success";
    pub const RECLAIM_RESOURCES_NAMESPACE_DELETE_FAILURE_COUNT: &str =
        "reclaim_resources_namespace_delete_failure";
    pub const RECLAIM_RESOURCES_DELETE_EXECUTIONS_SUCCESS_COUNT: &str =
        "reclaim_resources_delete_executions_success";
    pub const RECLAIM_RESOURCES_DELETE_EXECUTIONS_FAILURE_COUNT: &str =
        "reclaim_resources_delete_executions_failure";
}

/// Tag keys attached to engine metrics.
pub mod tags {
    pub const OPERATION: &str = "operation";
    pub const NAMESPACE: &str = "namespace";
    pub const COMMAND_TYPE: &str = "command_type";
}

/// Sink for counters and distributions.
pub trait MetricsHandler: Send + Sync {
    /// Increment a counter.
    fn counter(&self, name: &str, value: u64, tags: &[(&str, &str)]);

    /// Record one observation of a distribution.
    fn record(&self, name: &str, value: i64, tags: &[(&str, &str)]);
}

/// Handler that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsHandler;

impl MetricsHandler for NoopMetricsHandler {
    fn counter(&self, _name: &str, _value: u64, _tags: &[(&str, &str)]) {}

    fn record(&self, _name: &str, _value: i64, _tags: &[(&str, &str)]) {}
}

/// Wraps a handler and drops emissions while a workflow is replaying
/// history, so replays never double count.
pub struct ReplayAwareMetrics<'a> {
    inner: &'a dyn MetricsHandler,
    replaying: bool,
}

impl<'a> ReplayAwareMetrics<'a> {
    pub fn new(inner: &'a dyn MetricsHandler, replaying: bool) -> Self {
        Self { inner, replaying }
    }
}

impl MetricsHandler for ReplayAwareMetrics<'_> {
    fn counter(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        if !self.replaying {
            self.inner.counter(name, value, tags);
        }
    }

    fn record(&self, name: &str, value: i64, tags: &[(&str, &str)]) {
        if !self.replaying {
            self.inner.record(name, value, tags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting {
        calls: Mutex<Vec<String>>,
    }

    impl MetricsHandler for Counting {
        fn counter(&self, name: &str, _value: u64, _tags: &[(&str, &str)]) {
            self.calls.lock().unwrap().push(name.to_string());
        }

        fn record(&self, name: &str, _value: i64, _tags: &[(&str, &str)]) {
            self.calls.lock().unwrap().push(name.to_string());
        }
    }

    #[test]
    fn test_replay_aware_metrics_suppresses_during_replay() {
        let inner = Counting::default();

        ReplayAwareMetrics::new(&inner, true).counter(names::MEMO_SIZE, 1, &[]);
        assert!(inner.calls.lock().unwrap().is_empty());

        ReplayAwareMetrics::new(&inner, false).record(names::MEMO_SIZE, 10, &[]);
        assert_eq!(inner.calls.lock().unwrap().as_slice(), [names::MEMO_SIZE]);
    }
}
