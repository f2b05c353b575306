//! Activity, local activity and child workflow options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ApplicationError;

/// Error type recorded when an attempt exceeds its start-to-close timeout.
pub const START_TO_CLOSE_TIMEOUT_ERROR_TYPE: &str = "StartToCloseTimeout";

/// Retry policy applied by the runtime between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    /// Defaults to 100x the initial interval when unset.
    #[serde(default, with = "humantime_serde")]
    pub maximum_interval: Option<Duration>,
    /// Zero means unlimited.
    pub maximum_attempts: u32,
    #[serde(default)]
    pub non_retryable_error_types: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: None,
            maximum_attempts: 0,
            non_retryable_error_types: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration, maximum_interval: Duration) -> Self {
        Self {
            initial_interval,
            maximum_interval: Some(maximum_interval),
            ..Self::default()
        }
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    pub fn with_non_retryable_error_types(mut self, types: &[&str]) -> Self {
        self.non_retryable_error_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    fn maximum_interval(&self) -> Duration {
        self.maximum_interval
            .unwrap_or_else(|| self.initial_interval.saturating_mul(100))
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let seconds = self.initial_interval.as_secs_f64() * factor;
        let maximum = self.maximum_interval();
        if !seconds.is_finite() || seconds >= maximum.as_secs_f64() {
            return maximum;
        }
        Duration::from_secs_f64(seconds)
    }

    /// Whether another attempt is allowed after `attempt` failed with `failure`.
    pub fn should_retry(&self, attempt: u32, failure: &ApplicationError) -> bool {
        if failure.is_non_retryable() {
            return false;
        }
        if self
            .non_retryable_error_types
            .iter()
            .any(|t| t == failure.error_type())
        {
            return false;
        }
        self.maximum_attempts == 0 || attempt < self.maximum_attempts
    }
}

/// Options for an activity dispatched through a task queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    pub task_queue: Option<String>,
    pub start_to_close_timeout: Duration,
    pub schedule_to_close_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(start_to_close_timeout: Duration) -> Self {
        Self {
            task_queue: None,
            start_to_close_timeout,
            schedule_to_close_timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }

    pub fn with_schedule_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Options for an activity run in-process by the workflow's worker.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalActivityOptions {
    pub start_to_close_timeout: Duration,
    pub schedule_to_close_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl LocalActivityOptions {
    pub fn new(start_to_close_timeout: Duration) -> Self {
        Self {
            start_to_close_timeout,
            schedule_to_close_timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_schedule_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Options for a child workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildWorkflowOptions {
    /// Deterministic id; at most one run per id is live at a time.
    pub workflow_id: Option<String>,
    pub task_queue: Option<String>,
    /// Absent means a single attempt.
    pub retry_policy: Option<RetryPolicy>,
}

impl ChildWorkflowOptions {
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}
