//! Start request types.
//!
//! Timeouts arrive as protobuf [`WireDuration`]s and are converted to
//! [`std::time::Duration`] only after validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use prost_types::Duration as WireDuration;

use super::namespace::NamespaceId;

/// Opaque payload with encoding metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub metadata: HashMap<String, Vec<u8>>,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata: HashMap::new(),
            data: data.into(),
        }
    }

    /// JSON-encoded payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let mut payload = Self::new(serde_json::to_vec(value)?);
        payload
            .metadata
            .insert("encoding".to_string(), b"json/plain".to_vec());
        Ok(payload)
    }

    /// Encoded size: data plus metadata keys and values.
    pub fn size(&self) -> usize {
        self.data.len()
            + self
                .metadata
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payloads {
    pub payloads: Vec<Payload>,
}

impl Payloads {
    pub fn single(payload: Payload) -> Self {
        Self {
            payloads: vec![payload],
        }
    }

    pub fn size(&self) -> usize {
        self.payloads.iter().map(Payload::size).sum()
    }
}

/// Non-indexed key/value attachments shown alongside an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub fields: HashMap<String, Payload>,
}

impl Memo {
    pub fn size(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.size())
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub fields: HashMap<String, Payload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueue {
    pub name: String,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Retry policy as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Option<WireDuration>,
    pub backoff_coefficient: f64,
    pub maximum_interval: Option<WireDuration>,
    /// Zero means unlimited.
    pub maximum_attempts: i32,
    pub non_retryable_error_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningBehavior {
    #[default]
    Unspecified,
    Pinned,
    AutoUpgrade,
}

/// Caller-supplied override of the worker deployment version an execution runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningOverride {
    pub behavior: VersioningBehavior,
    /// Required for [`VersioningBehavior::Pinned`], forbidden otherwise.
    pub pinned_version: Option<String>,
}

/// Frontend start request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartWorkflowExecutionRequest {
    pub namespace: String,
    pub workflow_id: String,
    pub workflow_type: Option<WorkflowType>,
    pub task_queue: Option<TaskQueue>,
    pub input: Option<Payloads>,
    pub workflow_execution_timeout: Option<WireDuration>,
    pub workflow_run_timeout: Option<WireDuration>,
    pub workflow_task_timeout: Option<WireDuration>,
    pub workflow_start_delay: Option<WireDuration>,
    pub identity: String,
    pub request_id: String,
    pub retry_policy: Option<RetryPolicy>,
    pub cron_schedule: String,
    pub memo: Option<Memo>,
    pub header: Option<Header>,
    pub request_eager_execution: bool,
    pub versioning_override: Option<VersioningOverride>,
}

/// Link to the parent execution of a child workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentExecutionInfo {
    pub namespace_id: NamespaceId,
    pub namespace: String,
    pub workflow_id: String,
    pub run_id: String,
    pub initiated_event_id: u64,
}

/// Start request as the history service receives it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStartRequest {
    pub namespace_id: NamespaceId,
    pub start_request: StartWorkflowExecutionRequest,
    pub parent_execution_info: Option<ParentExecutionInfo>,
    /// Attempt number, 1 for a first run.
    pub attempt: i32,
    /// Delay before the first workflow task may be dispatched.
    pub first_workflow_task_backoff: Option<Duration>,
    pub continued_run_id: Option<String>,
}

/// Signal delivered atomically with a start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalWithStartRequest {
    pub request_id: String,
    pub signal_name: String,
    pub signal_input: Option<Payloads>,
    pub identity: String,
    pub header: Option<Header>,
}

/// Protobuf duration as a std duration. Absent and negative values read as zero.
pub fn duration_value(duration: Option<&WireDuration>) -> Duration {
    match duration {
        Some(d) if d.seconds >= 0 && d.nanos >= 0 => Duration::new(d.seconds as u64, d.nanos as u32),
        _ => Duration::ZERO,
    }
}

/// Std duration as a protobuf duration.
pub fn wire_duration(duration: Duration) -> WireDuration {
    WireDuration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}
