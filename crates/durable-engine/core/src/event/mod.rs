//! Event types for durable execution history.
//!
//! This module contains [`HistoryEvent`], [`EventType`], and [`EventCategory`].
//! Both the execution-creation path and the replaying workflow runtime write
//! their history as sequences of these events.


use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Id of the first event of every history.
pub const FIRST_EVENT_ID: u64 = 1;

/// Version sentinel meaning "no version recorded".
pub const EMPTY_VERSION: i64 = 0;

/// Unique event ID type.
///
/// Event IDs are monotonically increasing u64 values, local to each history,
/// starting at [`FIRST_EVENT_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one history stream (a workflow run).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Category of events for filtering and organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Workflow execution lifecycle events.
    Workflow,
    /// Workflow task scheduling events.
    WorkflowTask,
    /// Activity task lifecycle events.
    Activity,
    /// Timer events (started, fired, canceled).
    Timer,
    /// External signal events.
    Signal,
    /// Version and user-defined marker events.
    Marker,
    /// Child workflow lifecycle events.
    ChildWorkflow,
    /// Workflow update events.
    Update,
}

impl EventCategory {
    /// Returns true if this is a workflow event.
    pub fn is_workflow(&self) -> bool {
        matches!(self, EventCategory::Workflow)
    }

    /// Returns true if this is a timer event.
    pub fn is_timer(&self) -> bool {
        matches!(self, EventCategory::Timer)
    }
}

/// Type of events in an execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Workflow Events
    /// Workflow execution has started.
    WorkflowExecutionStarted,
    /// Workflow execution completed successfully.
    WorkflowExecutionCompleted,
    /// Workflow execution failed with an error.
    WorkflowExecutionFailed,
    /// Workflow execution was canceled.
    WorkflowExecutionCanceled,
    /// A signal was delivered to the execution.
    WorkflowExecutionSignaled,

    // Workflow Task Events
    WorkflowTaskScheduled,
    WorkflowTaskStarted,

    // Activity Events
    /// An activity (remote or local) has been scheduled.
    ActivityTaskScheduled,
    ActivityTaskCompleted,
    ActivityTaskFailed,

    // Timer Events
    TimerStarted,
    TimerFired,
    TimerCanceled,

    // Marker Events
    /// A version marker has been recorded.
    MarkerRecorded,

    // Child Workflow Events
    StartChildWorkflowExecutionInitiated,
    /// One attempt of a child workflow was started.
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,

    // Update Events
    WorkflowUpdateAccepted,
    WorkflowUpdateCompleted,
}

impl EventType {
    /// Returns the category for this event type.
    pub fn category(&self) -> EventCategory {
        match self {
            EventType::WorkflowExecutionStarted
            | EventType::WorkflowExecutionCompleted
            | EventType::WorkflowExecutionFailed
            | EventType::WorkflowExecutionCanceled => EventCategory::Workflow,

            EventType::WorkflowExecutionSignaled => EventCategory::Signal,

            EventType::WorkflowTaskScheduled | EventType::WorkflowTaskStarted => {
                EventCategory::WorkflowTask
            }

            EventType::ActivityTaskScheduled
            | EventType::ActivityTaskCompleted
            | EventType::ActivityTaskFailed => EventCategory::Activity,

            EventType::TimerStarted | EventType::TimerFired | EventType::TimerCanceled => {
                EventCategory::Timer
            }

            EventType::MarkerRecorded => EventCategory::Marker,

            EventType::StartChildWorkflowExecutionInitiated
            | EventType::ChildWorkflowExecutionStarted
            | EventType::ChildWorkflowExecutionCompleted
            | EventType::ChildWorkflowExecutionFailed => EventCategory::ChildWorkflow,

            EventType::WorkflowUpdateAccepted | EventType::WorkflowUpdateCompleted => {
                EventCategory::Update
            }
        }
    }

    /// Returns true for events that close an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::WorkflowExecutionCompleted
                | EventType::WorkflowExecutionFailed
                | EventType::WorkflowExecutionCanceled
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "workflowexecutionstarted" => Ok(EventType::WorkflowExecutionStarted),
            "workflowexecutioncompleted" => Ok(EventType::WorkflowExecutionCompleted),
            "workflowexecutionfailed" => Ok(EventType::WorkflowExecutionFailed),
            "workflowexecutioncanceled" => Ok(EventType::WorkflowExecutionCanceled),
            "workflowexecutionsignaled" => Ok(EventType::WorkflowExecutionSignaled),

            "workflowtaskscheduled" => Ok(EventType::WorkflowTaskScheduled),
            "workflowtaskstarted" => Ok(EventType::WorkflowTaskStarted),

            "activitytaskscheduled" => Ok(EventType::ActivityTaskScheduled),
            "activitytaskcompleted" => Ok(EventType::ActivityTaskCompleted),
            "activitytaskfailed" => Ok(EventType::ActivityTaskFailed),

            "timerstarted" => Ok(EventType::TimerStarted),
            "timerfired" => Ok(EventType::TimerFired),
            "timercanceled" => Ok(EventType::TimerCanceled),

            "markerrecorded" => Ok(EventType::MarkerRecorded),

            "startchildworkflowexecutioninitiated" => {
                Ok(EventType::StartChildWorkflowExecutionInitiated)
            }
            "childworkflowexecutionstarted" => Ok(EventType::ChildWorkflowExecutionStarted),
            "childworkflowexecutioncompleted" => Ok(EventType::ChildWorkflowExecutionCompleted),
            "childworkflowexecutionfailed" => Ok(EventType::ChildWorkflowExecutionFailed),

            "workflowupdateaccepted" => Ok(EventType::WorkflowUpdateAccepted),
            "workflowupdatecompleted" => Ok(EventType::WorkflowUpdateCompleted),

            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// A single event in an execution history.
///
/// Events are immutable once appended. `attributes` carries the
/// event-specific payload; runtime command events carry a `seq` attribute
/// used to match them against the workflow code on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Position of this event within its history (monotonic, local).
    pub event_id: EventId,

    /// History stream this event belongs to.
    pub instance_id: InstanceId,

    /// Type of the event.
    pub event_type: EventType,

    /// Category of the event for filtering.
    pub category: EventCategory,

    /// Timestamp when the event was created.
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Failover version the event was written under.
    pub version: i64,

    /// Arbitrary JSON payload for event-specific data.
    pub attributes: Value,

    /// Task queue for routing.
    pub task_queue: Option<String>,
}

impl HistoryEvent {
    /// Create a new event with the current time and an empty version.
    pub fn new(
        event_id: EventId,
        instance_id: InstanceId,
        event_type: EventType,
        attributes: Value,
    ) -> Self {
        Self::builder(event_id, instance_id, event_type)
            .payload(attributes)
            .build()
    }

    /// Start building an event with its required fields.
    pub fn builder(
        event_id: EventId,
        instance_id: InstanceId,
        event_type: EventType,
    ) -> HistoryEventBuilder {
        HistoryEventBuilder {
            event_id,
            instance_id,
            event_type,
            timestamp: None,
            version: EMPTY_VERSION,
            attributes: Value::Null,
            task_queue: None,
        }
    }

    /// The runtime command sequence number, when this event carries one.
    pub fn seq(&self) -> Option<u64> {
        self.attributes.get("seq").and_then(Value::as_u64)
    }

    /// A string attribute by name.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Decode a single attribute.
    pub fn attr<T: DeserializeOwned>(&self, name: &str) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.attributes.get(name).cloned().unwrap_or(Value::Null))
    }

    /// Decode all attributes into a typed struct.
    pub fn decode_attributes<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.attributes.clone())
    }
}

/// Builder for [`HistoryEvent`].
#[derive(Debug)]
pub struct HistoryEventBuilder {
    event_id: EventId,
    instance_id: InstanceId,
    event_type: EventType,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    version: i64,
    attributes: Value,
    task_queue: Option<String>,
}

impl HistoryEventBuilder {
    /// Set the event payload.
    pub fn payload(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the failover version.
    pub fn version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Set an explicit timestamp instead of the current time.
    pub fn timestamp(mut self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the task queue.
    pub fn task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }

    /// Build the event.
    pub fn build(self) -> HistoryEvent {
        HistoryEvent {
            event_id: self.event_id,
            instance_id: self.instance_id,
            category: self.event_type.category(),
            event_type: self.event_type,
            timestamp: self.timestamp.unwrap_or_else(chrono::Utc::now),
            version: self.version,
            attributes: self.attributes,
            task_queue: self.task_queue,
        }
    }
}
