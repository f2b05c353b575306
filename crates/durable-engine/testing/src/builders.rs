//! Builders for start requests with valid defaults.

use std::time::Duration;

use durable_engine_core::history::request::wire_duration;
use durable_engine_core::history::{
    HistoryStartRequest, Memo, NamespaceId, Payload, Payloads, RetryPolicy,
    StartWorkflowExecutionRequest, TaskQueue, VersioningOverride, WorkflowType,
};

/// Fluent [`StartWorkflowExecutionRequest`] builder. The defaults pass
/// validation.
#[derive(Debug, Clone)]
pub struct StartRequestBuilder {
    request: StartWorkflowExecutionRequest,
}

impl StartRequestBuilder {
    pub fn new(namespace: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            request: StartWorkflowExecutionRequest {
                namespace: namespace.into(),
                request_id: format!("request-{workflow_id}"),
                workflow_id,
                workflow_type: Some(WorkflowType::new("test-workflow")),
                task_queue: Some(TaskQueue::new("test-queue")),
                identity: "test-worker".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn workflow_type(mut self, name: impl Into<String>) -> Self {
        self.request.workflow_type = Some(WorkflowType::new(name));
        self
    }

    pub fn without_workflow_type(mut self) -> Self {
        self.request.workflow_type = None;
        self
    }

    pub fn task_queue(mut self, name: impl Into<String>) -> Self {
        self.request.task_queue = Some(TaskQueue::new(name));
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request.request_id = request_id.into();
        self
    }

    /// Single input payload of `size` bytes.
    pub fn input_of_size(mut self, size: usize) -> Self {
        self.request.input = Some(Payloads::single(Payload::new(vec![b'x'; size])));
        self
    }

    /// Memo with one field holding `size` bytes.
    pub fn memo_of_size(mut self, size: usize) -> Self {
        let mut memo = Memo::default();
        memo.fields.insert("memo".to_string(), Payload::new(vec![b'm'; size]));
        self.request.memo = Some(memo);
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.request.workflow_execution_timeout = Some(wire_duration(timeout));
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.request.workflow_run_timeout = Some(wire_duration(timeout));
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.request.workflow_task_timeout = Some(wire_duration(timeout));
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.request.workflow_start_delay = Some(wire_duration(delay));
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.request.retry_policy = Some(policy);
        self
    }

    pub fn cron_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.request.cron_schedule = schedule.into();
        self
    }

    pub fn eager(mut self) -> Self {
        self.request.request_eager_execution = true;
        self
    }

    pub fn versioning_override(mut self, versioning: VersioningOverride) -> Self {
        self.request.versioning_override = Some(versioning);
        self
    }

    pub fn build(self) -> StartWorkflowExecutionRequest {
        self.request
    }

    /// Wrap as a first-attempt history request.
    pub fn build_history(self, namespace_id: impl Into<String>) -> HistoryStartRequest {
        HistoryStartRequest {
            namespace_id: NamespaceId::new(namespace_id),
            start_request: self.request,
            attempt: 1,
            ..Default::default()
        }
    }
}

/// Valid first-attempt request for `workflow_id` in namespace `ns-1`/`acme`.
pub fn history_start_request(workflow_id: &str) -> HistoryStartRequest {
    StartRequestBuilder::new("acme", workflow_id).build_history("ns-1")
}
