//! In-memory state of one workflow run while it is being created.
//!
//! Every mutating method checks its preconditions before touching any field,
//! so a failed call leaves the state exactly as it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::Duration;

use super::namespace::{NamespaceEntry, NamespaceId};
use super::request::{
    Header, HistoryStartRequest, Memo, ParentExecutionInfo, Payloads, TaskQueue,
    VersioningOverride, duration_value,
};
use crate::error::{Error, Result};
use crate::event::{EventId, EventType, FIRST_EVENT_ID, HistoryEvent, InstanceId};

/// Identity of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub namespace_id: NamespaceId,
    pub workflow_id: String,
    pub run_id: String,
}

impl ExecutionKey {
    pub fn new(namespace_id: NamespaceId, workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            namespace_id,
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }

    /// History stream id for this run.
    pub fn instance_id(&self) -> InstanceId {
        InstanceId(format!("{}/{}/{}", self.namespace_id, self.workflow_id, self.run_id))
    }
}

impl std::fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace_id, self.workflow_id, self.run_id)
    }
}

/// Location of a run's history in the history tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBranch {
    pub tree_id: String,
    pub branch_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Created,
    Running,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowTaskStatus {
    #[default]
    None,
    Scheduled,
    Started,
}

/// Pending workflow task of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowTaskInfo {
    pub status: WorkflowTaskStatus,
    pub scheduled_event_id: Option<EventId>,
    pub started_event_id: Option<EventId>,
    pub attempt: u32,
    pub task_queue: String,
    pub start_to_close_timeout: Duration,
    pub request_id: Option<String>,
    pub identity: Option<String>,
}

/// Static facts recorded when the run starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionInfo {
    pub workflow_type: String,
    pub task_queue: String,
    pub workflow_execution_timeout: Duration,
    pub workflow_run_timeout: Duration,
    pub default_workflow_task_timeout: Duration,
    pub attempt: i32,
    pub parent: Option<ParentExecutionInfo>,
    pub start_time: Option<DateTime<Utc>>,
    pub execution_expiration_time: Option<DateTime<Utc>>,
    pub run_expiration_time: Option<DateTime<Utc>>,
    pub first_workflow_task_backoff: Duration,
    pub versioning_override: Option<VersioningOverride>,
    pub cron_schedule: String,
    pub request_id: String,
}

/// Side work emitted alongside history events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedTask {
    /// Dispatch a workflow task to a worker.
    WorkflowTask { scheduled_event_id: EventId, task_queue: String },
    /// Schedule the first workflow task once the backoff elapses.
    WorkflowBackoffTimer { fire_at: DateTime<Utc> },
    WorkflowRunTimeout { fire_at: DateTime<Utc> },
    WorkflowExecutionTimeout { fire_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StartedAttributes {
    workflow_type: String,
    task_queue: String,
    #[serde(default)]
    input: Option<Payloads>,
    #[serde(with = "humantime_serde")]
    workflow_execution_timeout: Duration,
    #[serde(with = "humantime_serde")]
    workflow_run_timeout: Duration,
    #[serde(with = "humantime_serde")]
    workflow_task_timeout: Duration,
    #[serde(with = "humantime_serde")]
    first_workflow_task_backoff: Duration,
    #[serde(default)]
    parent_execution_info: Option<ParentExecutionInfo>,
    identity: String,
    attempt: i32,
    request_id: String,
    cron_schedule: String,
    #[serde(default)]
    memo: Option<Memo>,
    #[serde(default)]
    header: Option<Header>,
    #[serde(default)]
    versioning_override: Option<VersioningOverride>,
    #[serde(default)]
    continued_run_id: Option<String>,
    original_execution_run_id: String,
}

/// Mutable state of a run under construction.
#[derive(Debug, Clone)]
pub struct MutableState {
    key: ExecutionKey,
    namespace_entry: NamespaceEntry,
    current_version: i64,
    status: ExecutionStatus,
    execution_info: ExecutionInfo,
    history_branch: Option<HistoryBranch>,
    next_event_id: u64,
    events: Vec<HistoryEvent>,
    workflow_task: WorkflowTaskInfo,
    signal_requested_ids: HashSet<String>,
    signal_count: u64,
    tasks: Vec<GeneratedTask>,
    now: DateTime<Utc>,
}

impl MutableState {
    /// Empty state for a new run, stamped with the shard's clock.
    pub fn new(namespace_entry: NamespaceEntry, workflow_id: impl Into<String>, run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: ExecutionKey::new(namespace_entry.id().clone(), workflow_id, run_id),
            current_version: namespace_entry.current_version(),
            namespace_entry,
            status: ExecutionStatus::Created,
            execution_info: ExecutionInfo::default(),
            history_branch: None,
            next_event_id: FIRST_EVENT_ID,
            events: Vec::new(),
            workflow_task: WorkflowTaskInfo::default(),
            signal_requested_ids: HashSet::new(),
            signal_count: 0,
            tasks: Vec::new(),
            now,
        }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    pub fn namespace_entry(&self) -> &NamespaceEntry {
        &self.namespace_entry
    }

    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.execution_info
    }

    pub fn history_branch(&self) -> Option<&HistoryBranch> {
        self.history_branch.as_ref()
    }

    /// Events buffered for the first history write, in order.
    pub fn history_events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn next_event_id(&self) -> u64 {
        self.next_event_id
    }

    pub fn workflow_task(&self) -> &WorkflowTaskInfo {
        &self.workflow_task
    }

    pub fn has_pending_workflow_task(&self) -> bool {
        self.workflow_task.status != WorkflowTaskStatus::None
    }

    /// Tasks generated so far, in order.
    pub fn generated_tasks(&self) -> &[GeneratedTask] {
        &self.tasks
    }

    pub fn is_signal_requested(&self, request_id: &str) -> bool {
        self.signal_requested_ids.contains(request_id)
    }

    pub fn signal_count(&self) -> u64 {
        self.signal_count
    }

    /// Attach the run to a fresh history branch and remember its timeouts.
    pub fn set_history_tree(&mut self, branch: HistoryBranch, execution_timeout: Duration, run_timeout: Duration) -> Result<()> {
        if self.history_branch.is_some() {
            return Err(Error::invalid_state("history tree is already set"));
        }
        self.history_branch = Some(branch);
        self.execution_info.workflow_execution_timeout = execution_timeout;
        self.execution_info.workflow_run_timeout = run_timeout;
        Ok(())
    }

    /// Record the start of the run. Must be the first event.
    pub fn add_workflow_execution_started_event(&mut self, request: &HistoryStartRequest) -> Result<HistoryEvent> {
        if self.status != ExecutionStatus::Created || self.next_event_id != FIRST_EVENT_ID {
            return Err(Error::invalid_state("workflow execution is already started")
                .with_context("run_id", self.key.run_id.clone()));
        }
        if self.history_branch.is_none() {
            return Err(Error::invalid_state("history tree must be set before the first event"));
        }

        let start = &request.start_request;
        let execution_timeout = duration_value(start.workflow_execution_timeout.as_ref());
        let run_timeout = duration_value(start.workflow_run_timeout.as_ref());
        let task_timeout = duration_value(start.workflow_task_timeout.as_ref());
        let backoff = request.first_workflow_task_backoff.unwrap_or(Duration::ZERO);
        let task_queue = start.task_queue.clone().unwrap_or_default().name;
        let workflow_type = start.workflow_type.clone().unwrap_or_default().name;

        let attributes = encode(&StartedAttributes {
            workflow_type: workflow_type.clone(),
            task_queue: task_queue.clone(),
            input: start.input.clone(),
            workflow_execution_timeout: execution_timeout,
            workflow_run_timeout: run_timeout,
            workflow_task_timeout: task_timeout,
            first_workflow_task_backoff: backoff,
            parent_execution_info: request.parent_execution_info.clone(),
            identity: start.identity.clone(),
            attempt: request.attempt.max(1),
            request_id: start.request_id.clone(),
            cron_schedule: start.cron_schedule.clone(),
            memo: start.memo.clone(),
            header: start.header.clone(),
            versioning_override: start.versioning_override.clone(),
            continued_run_id: request.continued_run_id.clone(),
            original_execution_run_id: self.key.run_id.clone(),
        })?;
        let execution_expiration = deadline(self.now, execution_timeout)?;
        let run_expiration = deadline(self.now, run_timeout)?;

        let event = self.append(EventType::WorkflowExecutionStarted, attributes, Some(&task_queue));

        let info = &mut self.execution_info;
        info.workflow_type = workflow_type;
        info.task_queue = task_queue;
        info.workflow_execution_timeout = execution_timeout;
        info.workflow_run_timeout = run_timeout;
        info.default_workflow_task_timeout = task_timeout;
        info.attempt = request.attempt.max(1);
        info.parent = request.parent_execution_info.clone();
        info.start_time = Some(self.now);
        info.execution_expiration_time = execution_expiration;
        info.run_expiration_time = run_expiration;
        info.first_workflow_task_backoff = backoff;
        info.versioning_override = start.versioning_override.clone();
        info.cron_schedule = start.cron_schedule.clone();
        info.request_id = start.request_id.clone();
        self.status = ExecutionStatus::Running;

        if let Some(fire_at) = run_expiration {
            self.tasks.push(GeneratedTask::WorkflowRunTimeout { fire_at });
        }
        if let Some(fire_at) = execution_expiration {
            if Some(fire_at) != run_expiration {
                self.tasks.push(GeneratedTask::WorkflowExecutionTimeout { fire_at });
            }
        }

        Ok(event)
    }

    /// Remember a signal request id so a retried signal is not applied twice.
    pub fn add_signal_requested(&mut self, request_id: impl Into<String>) {
        self.signal_requested_ids.insert(request_id.into());
    }

    pub fn add_workflow_execution_signaled(
        &mut self,
        signal_name: &str,
        input: Option<&Payloads>,
        identity: &str,
        header: Option<&Header>,
    ) -> Result<HistoryEvent> {
        self.require_running("signal")?;
        let attributes = json!({
            "signal_name": signal_name,
            "input": encode(&input)?,
            "identity": identity,
            "header": encode(&header)?,
        });
        let event = self.append(EventType::WorkflowExecutionSignaled, attributes, None);
        self.signal_count += 1;
        Ok(event)
    }

    /// Schedule the first workflow task, or a backoff timer when the start
    /// event asks for one. Returns the scheduled event id when scheduled.
    pub fn add_first_workflow_task_scheduled(&mut self, start_event: &HistoryEvent, bypass_task_generation: bool) -> Result<Option<EventId>> {
        if start_event.event_type != EventType::WorkflowExecutionStarted {
            return Err(Error::invalid_state(format!(
                "expected a started event, got {}",
                start_event.event_type
            )));
        }
        let attributes: StartedAttributes = start_event
            .decode_attributes()
            .map_err(|e| Error::from_source("malformed started event", crate::error::ErrorKind::InvalidState, e))?;

        if !attributes.first_workflow_task_backoff.is_zero() {
            self.require_running("schedule a backoff timer")?;
            let fire_at = deadline(self.now, attributes.first_workflow_task_backoff)?
                .unwrap_or(self.now);
            self.tasks.push(GeneratedTask::WorkflowBackoffTimer { fire_at });
            return Ok(None);
        }

        self.add_workflow_task_scheduled_event(bypass_task_generation).map(Some)
    }

    pub fn add_workflow_task_scheduled_event(&mut self, bypass_task_generation: bool) -> Result<EventId> {
        self.require_running("schedule a workflow task")?;
        if self.has_pending_workflow_task() {
            return Err(Error::invalid_state("a workflow task is already pending"));
        }
        let task_queue = self.execution_info.task_queue.clone();
        let timeout = self.execution_info.default_workflow_task_timeout;
        let attributes = json!({
            "task_queue": task_queue,
            "start_to_close_timeout": humantime::format_duration(timeout).to_string(),
            "attempt": 1,
        });
        let event = self.append(EventType::WorkflowTaskScheduled, attributes, Some(&task_queue));

        self.workflow_task = WorkflowTaskInfo {
            status: WorkflowTaskStatus::Scheduled,
            scheduled_event_id: Some(event.event_id),
            started_event_id: None,
            attempt: 1,
            task_queue: task_queue.clone(),
            start_to_close_timeout: timeout,
            request_id: None,
            identity: None,
        };
        if !bypass_task_generation {
            self.tasks.push(GeneratedTask::WorkflowTask {
                scheduled_event_id: event.event_id,
                task_queue,
            });
        }
        Ok(event.event_id)
    }

    /// Mark the scheduled workflow task as started by `identity`.
    pub fn add_workflow_task_started_event(
        &mut self,
        scheduled_event_id: EventId,
        request_id: &str,
        task_queue: Option<&TaskQueue>,
        identity: &str,
    ) -> Result<(HistoryEvent, WorkflowTaskInfo)> {
        self.require_running("start a workflow task")?;
        if self.workflow_task.status != WorkflowTaskStatus::Scheduled
            || self.workflow_task.scheduled_event_id != Some(scheduled_event_id)
        {
            return Err(Error::invalid_state(format!(
                "no scheduled workflow task with id {scheduled_event_id}"
            )));
        }
        let task_queue = task_queue
            .map(|tq| tq.name.clone())
            .unwrap_or_else(|| self.workflow_task.task_queue.clone());
        let attributes = json!({
            "scheduled_event_id": scheduled_event_id.0,
            "request_id": request_id,
            "identity": identity,
        });
        let event = self.append(EventType::WorkflowTaskStarted, attributes, Some(&task_queue));

        let task = &mut self.workflow_task;
        task.status = WorkflowTaskStatus::Started;
        task.started_event_id = Some(event.event_id);
        task.request_id = Some(request_id.to_string());
        task.identity = Some(identity.to_string());
        task.task_queue = task_queue;
        Ok((event, task.clone()))
    }

    fn require_running(&self, action: &str) -> Result<()> {
        if self.status != ExecutionStatus::Running {
            return Err(Error::invalid_state(format!(
                "cannot {action} before the execution has started"
            )));
        }
        Ok(())
    }

    fn append(&mut self, event_type: EventType, attributes: Value, task_queue: Option<&str>) -> HistoryEvent {
        let mut builder = HistoryEvent::builder(EventId(self.next_event_id), self.key.instance_id(), event_type)
            .payload(attributes)
            .version(self.current_version)
            .timestamp(self.now);
        if let Some(task_queue) = task_queue {
            builder = builder.task_queue(task_queue);
        }
        let event = builder.build();
        self.events.push(event.clone());
        self.next_event_id += 1;
        event
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::from_source("unable to encode event attributes", crate::error::ErrorKind::InvalidState, e))
}

/// `now + timeout`, or `None` when the timeout is unbounded.
fn deadline(now: DateTime<Utc>, timeout: Duration) -> Result<Option<DateTime<Utc>>> {
    if timeout.is_zero() {
        return Ok(None);
    }
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map(Some)
        .ok_or_else(|| Error::invalid_state(format!("timeout {timeout:?} overflows the clock")))
}
