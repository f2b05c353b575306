//! Timeout normalization applied to start requests after validation.

use std::time::Duration;

use super::config::HistoryConfig;
use super::request::{StartWorkflowExecutionRequest, duration_value, wire_duration};
use crate::port::MetricsHandler;
use crate::port::metrics::{names, tags};

/// Smallest workflow task timeout ever handed to a worker.
pub const MIN_WORKFLOW_TASK_TIMEOUT: Duration = Duration::from_secs(1);

/// A timeout the normalizer rewrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOverride {
    WorkflowRun { from: Duration, to: Duration },
    WorkflowTask { from: Duration, to: Duration },
}

/// Cap the run timeout by the execution timeout. Zero means unbounded.
pub fn override_workflow_run_timeout(run_timeout: Duration, execution_timeout: Duration) -> Duration {
    if execution_timeout.is_zero() {
        return run_timeout;
    }
    if run_timeout.is_zero() {
        return execution_timeout;
    }
    run_timeout.min(execution_timeout)
}

/// Resolve the workflow task timeout: default when unset, capped by the
/// maximum, floored above zero, then capped by a bounded run timeout.
pub fn override_workflow_task_timeout(
    task_timeout: Duration,
    run_timeout: Duration,
    default_task_timeout: Duration,
    max_task_timeout: Duration,
) -> Duration {
    let mut timeout = if task_timeout.is_zero() {
        default_task_timeout
    } else {
        task_timeout
    };
    timeout = timeout.min(max_task_timeout).max(MIN_WORKFLOW_TASK_TIMEOUT);
    if !run_timeout.is_zero() {
        timeout = timeout.min(run_timeout);
    }
    timeout
}

/// Rewrite the request's run and task timeouts in place and count every
/// rewrite. The execution timeout is left as is.
pub fn override_start_workflow_execution_request(
    request: &mut StartWorkflowExecutionRequest,
    operation: &str,
    config: &HistoryConfig,
    metrics: &dyn MetricsHandler,
) -> Vec<TimeoutOverride> {
    let mut overrides = Vec::new();
    let namespace = request.namespace.clone();
    let metric_tags = [(tags::OPERATION, operation), (tags::NAMESPACE, namespace.as_str())];

    let requested_run = duration_value(request.workflow_run_timeout.as_ref());
    let run_timeout = override_workflow_run_timeout(
        requested_run,
        duration_value(request.workflow_execution_timeout.as_ref()),
    );
    if run_timeout != requested_run {
        request.workflow_run_timeout = Some(wire_duration(run_timeout));
        metrics.counter(names::WORKFLOW_RUN_TIMEOUT_OVERRIDE_COUNT, 1, &metric_tags);
        overrides.push(TimeoutOverride::WorkflowRun {
            from: requested_run,
            to: run_timeout,
        });
    }

    let requested_task = duration_value(request.workflow_task_timeout.as_ref());
    let task_timeout = override_workflow_task_timeout(
        requested_task,
        run_timeout,
        config.default_workflow_task_timeout(&namespace),
        config.max_workflow_task_timeout,
    );
    if task_timeout != requested_task {
        request.workflow_task_timeout = Some(wire_duration(task_timeout));
        metrics.counter(names::WORKFLOW_TASK_TIMEOUT_OVERRIDE_COUNT, 1, &metric_tags);
        overrides.push(TimeoutOverride::WorkflowTask {
            from: requested_task,
            to: task_timeout,
        });
    }

    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::NoopMetricsHandler;

    const MAX: Duration = Duration::from_secs(120);
    const DEFAULT: Duration = Duration::from_secs(10);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_run_timeout_capped_by_execution_timeout() {
        assert_eq!(override_workflow_run_timeout(secs(100), secs(50)), secs(50));
        assert_eq!(override_workflow_run_timeout(secs(30), secs(50)), secs(30));
        assert_eq!(override_workflow_run_timeout(Duration::ZERO, secs(50)), secs(50));
        assert_eq!(override_workflow_run_timeout(secs(30), Duration::ZERO), secs(30));
        assert_eq!(
            override_workflow_run_timeout(Duration::ZERO, Duration::ZERO),
            Duration::ZERO
        );
    }

    #[test]
    fn test_task_timeout_resolution() {
        assert_eq!(override_workflow_task_timeout(Duration::ZERO, Duration::ZERO, DEFAULT, MAX), DEFAULT);
        assert_eq!(override_workflow_task_timeout(secs(500), Duration::ZERO, DEFAULT, MAX), MAX);
        assert_eq!(override_workflow_task_timeout(secs(30), secs(5), DEFAULT, MAX), secs(5));
        assert_eq!(override_workflow_task_timeout(Duration::ZERO, Duration::ZERO, Duration::ZERO, MAX), MIN_WORKFLOW_TASK_TIMEOUT);
        assert_eq!(
            override_workflow_task_timeout(Duration::ZERO, Duration::from_millis(300), Duration::ZERO, MAX),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn test_task_timeout_bounds_hold_across_inputs() {
        let samples = [0u64, 1, 5, 10, 60, 119, 120, 121, 1000];
        for task in samples {
            for run in samples {
                let task = secs(task);
                let run = secs(run);
                let resolved = override_workflow_task_timeout(task, run, DEFAULT, MAX);
                assert!(resolved > Duration::ZERO);
                assert!(resolved <= MAX);
                if !run.is_zero() {
                    assert!(resolved <= run, "task {task:?} run {run:?} -> {resolved:?}");
                }
            }
        }
    }

    #[test]
    fn test_request_rewrite_reports_overrides() {
        let mut request = StartWorkflowExecutionRequest {
            namespace: "orders".to_string(),
            workflow_execution_timeout: Some(wire_duration(secs(60))),
            workflow_run_timeout: Some(wire_duration(secs(600))),
            ..Default::default()
        };

        let overrides = override_start_workflow_execution_request(
            &mut request,
            "StartWorkflowExecution",
            &HistoryConfig::default(),
            &NoopMetricsHandler,
        );

        assert_eq!(
            overrides,
            vec![
                TimeoutOverride::WorkflowRun { from: secs(600), to: secs(60) },
                TimeoutOverride::WorkflowTask { from: Duration::ZERO, to: DEFAULT },
            ]
        );
        assert_eq!(duration_value(request.workflow_run_timeout.as_ref()), secs(60));
        assert_eq!(duration_value(request.workflow_task_timeout.as_ref()), DEFAULT);
    }
}
