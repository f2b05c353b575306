//! Replaying execution context handed to workflow code.
//!
//! Every operation is addressed by a per-instance sequence number. While the
//! cursor is inside recorded history, operations consume their recorded
//! events and return the recorded outcome. Once the cursor reaches the end,
//! operations run live and append their outcome. A recorded event that does
//! not match the operation the code issues is a nondeterminism error.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::error::ApplicationError;
use crate::event::{EventId, EventType, HistoryEvent, InstanceId, FIRST_EVENT_ID};
use crate::port::ReplayAwareMetrics;
use crate::telemetry;
use crate::workflow::options::{
    ActivityOptions, ChildWorkflowOptions, LocalActivityOptions, RetryPolicy,
    START_TO_CLOSE_TIMEOUT_ERROR_TYPE,
};
use crate::workflow::runtime::{execute_instance, RunningSlot, RuntimeServices};
use crate::workflow::update::{
    InstanceLocals, TimerId, TimerOutcome, TimerTable, UpdateHandler, UpdateRequest, UpdateScope,
};
use crate::workflow::{
    Activity, DurableWorkflow, UpdateError, WorkflowError, WorkflowRunError, DEFAULT_VERSION,
};

/// Failure type recorded when a child's workflow id is held by a live run.
pub const CHILD_WORKFLOW_ALREADY_STARTED_ERROR_TYPE: &str = "ChildWorkflowExecutionAlreadyStarted";

/// Attributes compared between a recorded command and the issued one.
const IDENTITY_ATTRIBUTES: [&str; 3] = ["activity_type", "workflow_type", "workflow_id"];

enum Wake<T> {
    Ready(T),
    Canceled,
    Update(UpdateRequest),
    InboxClosed,
}

#[derive(Debug, Clone, Copy)]
enum ActivityKind {
    Remote,
    Local,
}

impl ActivityKind {
    fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Remote => "remote",
            ActivityKind::Local => "local",
        }
    }
}

struct ActivityPlan<'a> {
    kind: ActivityKind,
    task_queue: Option<&'a str>,
    start_to_close: Duration,
    schedule_to_close: Option<Duration>,
    retry_policy: &'a RetryPolicy,
}

#[derive(Deserialize)]
struct AcceptedUpdate {
    update_id: String,
    name: String,
    argument: String,
}

/// Execution context of one workflow instance.
pub struct WorkflowContext {
    instance_id: InstanceId,
    workflow_type: &'static str,
    services: RuntimeServices,
    history: Vec<HistoryEvent>,
    cursor: usize,
    next_event_id: u64,
    next_seq: u64,
    cancellation: CancellationToken,
    inbox: Option<mpsc::Receiver<UpdateRequest>>,
    update_handlers: HashMap<String, UpdateHandler>,
    locals: InstanceLocals,
    timers: TimerTable,
    versions: HashMap<String, i32>,
    fatal: Option<WorkflowError>,
    replay_only: bool,
}

impl WorkflowContext {
    pub(crate) fn new(
        services: RuntimeServices,
        instance_id: InstanceId,
        workflow_type: &'static str,
        history: Vec<HistoryEvent>,
        cancellation: CancellationToken,
        inbox: Option<mpsc::Receiver<UpdateRequest>>,
    ) -> Self {
        let next_event_id = history
            .last()
            .map(|event| event.event_id.0 + 1)
            .unwrap_or(FIRST_EVENT_ID);
        Self {
            instance_id,
            workflow_type,
            services,
            history,
            cursor: 0,
            next_event_id,
            next_seq: 1,
            cancellation,
            inbox,
            update_handlers: HashMap::new(),
            locals: InstanceLocals::default(),
            timers: TimerTable::default(),
            versions: HashMap::new(),
            fatal: None,
            replay_only: false,
        }
    }

    /// Fail instead of running live once recorded history is exhausted.
    pub(crate) fn set_replay_only(&mut self) {
        self.replay_only = true;
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn workflow_type(&self) -> &str {
        self.workflow_type
    }

    /// True while the code is re-executing recorded history.
    pub fn is_replaying(&self) -> bool {
        self.cursor < self.history.len()
    }

    /// True once cancellation of this instance was requested.
    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Metrics sink that drops emissions during replay.
    pub fn metrics(&self) -> ReplayAwareMetrics<'_> {
        ReplayAwareMetrics::new(self.services.metrics.as_ref(), self.is_replaying())
    }

    /// Register an update handler. Names are unique per instance.
    pub fn set_update_handler(&mut self, handler: UpdateHandler) -> Result<(), WorkflowError> {
        if self.update_handlers.contains_key(handler.name()) {
            return Err(WorkflowError::DuplicateUpdateHandler(
                handler.name().to_string(),
            ));
        }
        self.update_handlers
            .insert(handler.name().to_string(), handler);
        Ok(())
    }

    /// Store a value shared with update handlers, replacing any value of
    /// the same type.
    pub fn insert_local<T: std::any::Any + Send>(&mut self, value: T) {
        self.locals.insert(value);
    }

    pub fn local<T: std::any::Any + Send>(&self) -> Option<&T> {
        self.locals.get::<T>()
    }

    pub fn local_mut<T: std::any::Any + Send>(&mut self) -> Option<&mut T> {
        self.locals.get_mut::<T>()
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Start a durable timer.
    pub async fn start_timer(&mut self, duration: Duration) -> Result<TimerId, WorkflowError> {
        let seq = self.next_seq();
        let now = chrono::Utc::now();
        let fire_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        let event = self
            .issue(
                EventType::TimerStarted,
                json!({
                    "seq": seq,
                    "duration_ms": u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    "fire_at": fire_at,
                }),
            )
            .await?;
        let fire_at = decode(&event, "fire_at")?;
        let id = TimerId(seq);
        self.timers.insert(id, fire_at);
        Ok(id)
    }

    /// Wait until the timer fires or is cancelled.
    pub async fn await_timer(&mut self, id: TimerId) -> Result<TimerOutcome, WorkflowError> {
        let accept = [EventType::TimerFired, EventType::TimerCanceled];
        if let Some(event) = self.replay_until(id.0, &accept).await? {
            self.timers.remove(id);
            return Ok(match event.event_type {
                EventType::TimerFired => TimerOutcome::Fired,
                _ => TimerOutcome::Canceled,
            });
        }

        let fire_at = self
            .timers
            .get(id)
            .map(|entry| entry.fire_at)
            .ok_or(WorkflowError::UnknownTimer(id.0))?;
        let remaining = (fire_at - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let outcome = match self.suspend(tokio::time::sleep(remaining), Some(id)).await? {
            Some(()) => TimerOutcome::Fired,
            None => TimerOutcome::Canceled,
        };
        let event_type = match outcome {
            TimerOutcome::Fired => EventType::TimerFired,
            TimerOutcome::Canceled => EventType::TimerCanceled,
        };
        self.record(event_type, json!({ "seq": id.0 })).await?;
        self.timers.remove(id);
        Ok(outcome)
    }

    /// Request cancellation of a pending timer from workflow code.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    /// Start a timer and wait for it.
    pub async fn sleep(&mut self, duration: Duration) -> Result<TimerOutcome, WorkflowError> {
        let id = self.start_timer(duration).await?;
        self.await_timer(id).await
    }

    // ---------------------------------------------------------------------
    // Activities
    // ---------------------------------------------------------------------

    /// Run an activity routed through a task queue.
    pub async fn execute_activity<A: Activity>(
        &mut self,
        activity: &A,
        input: A::Input,
        options: ActivityOptions,
    ) -> Result<A::Output, WorkflowError> {
        let plan = ActivityPlan {
            kind: ActivityKind::Remote,
            task_queue: options.task_queue.as_deref(),
            start_to_close: options.start_to_close_timeout,
            schedule_to_close: options.schedule_to_close_timeout,
            retry_policy: &options.retry_policy,
        };
        self.run_activity(activity, input, plan).await
    }

    /// Run an activity in the workflow's own worker.
    pub async fn execute_local_activity<A: Activity>(
        &mut self,
        activity: &A,
        input: A::Input,
        options: LocalActivityOptions,
    ) -> Result<A::Output, WorkflowError> {
        let plan = ActivityPlan {
            kind: ActivityKind::Local,
            task_queue: None,
            start_to_close: options.start_to_close_timeout,
            schedule_to_close: options.schedule_to_close_timeout,
            retry_policy: &options.retry_policy,
        };
        self.run_activity(activity, input, plan).await
    }

    async fn run_activity<A: Activity>(
        &mut self,
        activity: &A,
        input: A::Input,
        plan: ActivityPlan<'_>,
    ) -> Result<A::Output, WorkflowError> {
        let seq = self.next_seq();
        let encoded = serde_json::to_value(&input).map_err(WorkflowError::serialization)?;
        self.issue(
            EventType::ActivityTaskScheduled,
            json!({
                "seq": seq,
                "activity_type": A::TYPE_ID,
                "kind": plan.kind.as_str(),
                "task_queue": plan.task_queue,
                "input": encoded,
            }),
        )
        .await?;

        let accept = [
            EventType::ActivityTaskCompleted,
            EventType::ActivityTaskFailed,
        ];
        if let Some(event) = self.replay_until(seq, &accept).await? {
            return match event.event_type {
                EventType::ActivityTaskCompleted => decode(&event, "result"),
                _ => Err(activity_failed::<A>(decode(&event, "failure")?)),
            };
        }

        let scheduled = tokio::time::Instant::now();
        let mut attempt = 1;
        loop {
            let span = telemetry::activity_span(A::TYPE_ID, seq);
            let outcome = self
                .wait(attempt_activity(activity, input.clone(), plan.start_to_close).instrument(span))
                .await?;

            let failure = match outcome {
                Ok(output) => {
                    let result =
                        serde_json::to_value(&output).map_err(WorkflowError::serialization)?;
                    self.record(
                        EventType::ActivityTaskCompleted,
                        json!({ "seq": seq, "attempt": attempt, "result": result }),
                    )
                    .await?;
                    return Ok(output);
                }
                Err(failure) => failure,
            };

            let delay = plan.retry_policy.backoff(attempt);
            let within_deadline = plan
                .schedule_to_close
                .map_or(true, |limit| scheduled.elapsed() + delay < limit);
            if !plan.retry_policy.should_retry(attempt, &failure) || !within_deadline {
                warn!(
                    activity_type = A::TYPE_ID,
                    seq,
                    attempt,
                    error = %failure,
                    "Activity failed"
                );
                self.record(
                    EventType::ActivityTaskFailed,
                    json!({ "seq": seq, "attempt": attempt, "failure": failure }),
                )
                .await?;
                return Err(activity_failed::<A>(failure));
            }

            debug!(
                activity_type = A::TYPE_ID,
                seq,
                attempt,
                delay = %humantime::format_duration(delay),
                error = %failure,
                "Activity attempt failed, retrying"
            );
            self.wait(tokio::time::sleep(delay)).await?;
            attempt += 1;
        }
    }

    // ---------------------------------------------------------------------
    // Child workflows
    // ---------------------------------------------------------------------

    /// Run a child workflow to completion.
    ///
    /// Each attempt is a separate run with its own history, identified as
    /// `{workflow_id}/run-{attempt}`. The child inherits this instance's
    /// cancellation.
    pub async fn execute_child_workflow<W: DurableWorkflow>(
        &mut self,
        workflow: Arc<W>,
        input: W::Input,
        options: ChildWorkflowOptions,
    ) -> Result<W::Output, WorkflowError> {
        let seq = self.next_seq();
        let workflow_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| format!("{}/child-{seq}", self.instance_id));
        let encoded = serde_json::to_value(&input).map_err(WorkflowError::serialization)?;
        self.issue(
            EventType::StartChildWorkflowExecutionInitiated,
            json!({
                "seq": seq,
                "workflow_id": workflow_id,
                "workflow_type": W::TYPE_ID,
                "task_queue": options.task_queue,
                "input": encoded,
            }),
        )
        .await?;

        let child_failed = |failure: ApplicationError| WorkflowError::ChildWorkflowFailed {
            workflow_type: W::TYPE_ID.to_string(),
            workflow_id: workflow_id.clone(),
            failure,
        };

        let accept = [
            EventType::ChildWorkflowExecutionStarted,
            EventType::ChildWorkflowExecutionCompleted,
            EventType::ChildWorkflowExecutionFailed,
        ];
        let mut resumed_attempt = None;
        while let Some(event) = self.replay_until(seq, &accept).await? {
            match event.event_type {
                EventType::ChildWorkflowExecutionStarted => {
                    resumed_attempt = Some(decode::<u32>(&event, "attempt")?);
                }
                EventType::ChildWorkflowExecutionCompleted => return decode(&event, "result"),
                _ => return Err(child_failed(decode(&event, "failure")?)),
            }
        }

        let Some(_slot) = RunningSlot::claim(&self.services.running, &workflow_id) else {
            let failure = ApplicationError::non_retryable(
                format!("child workflow {workflow_id} is already running"),
                CHILD_WORKFLOW_ALREADY_STARTED_ERROR_TYPE,
            );
            self.record(
                EventType::ChildWorkflowExecutionFailed,
                json!({ "seq": seq, "failure": failure }),
            )
            .await?;
            return Err(child_failed(failure));
        };

        let mut attempt = match resumed_attempt {
            Some(attempt) => attempt,
            None => {
                self.record_child_started(seq, &workflow_id, 1).await?;
                1
            }
        };
        loop {
            let run_id = child_run_id(&workflow_id, attempt);
            let services = self.services.clone();
            let cancellation = self.cancellation.child_token();
            let span = telemetry::workflow_span(W::TYPE_ID, run_id.as_str());
            let outcome = self
                .wait(
                    execute_instance(
                        &services,
                        workflow.as_ref(),
                        run_id,
                        input.clone(),
                        cancellation,
                        None,
                    )
                    .instrument(span),
                )
                .await?;

            let failure = match outcome {
                Ok(output) => {
                    let result =
                        serde_json::to_value(&output).map_err(WorkflowError::serialization)?;
                    self.record(
                        EventType::ChildWorkflowExecutionCompleted,
                        json!({ "seq": seq, "result": result }),
                    )
                    .await?;
                    return Ok(output);
                }
                Err(WorkflowRunError::Runtime(error)) => return Err(self.escalate(error)),
                Err(WorkflowRunError::Failed(error)) => W::failure(&error),
                Err(WorkflowRunError::Closed(failure)) => failure,
            };

            match options
                .retry_policy
                .as_ref()
                .filter(|policy| policy.should_retry(attempt, &failure))
            {
                Some(policy) => {
                    let delay = policy.backoff(attempt);
                    debug!(
                        workflow_type = W::TYPE_ID,
                        workflow_id = %workflow_id,
                        attempt,
                        error = %failure,
                        "Child workflow attempt failed, retrying"
                    );
                    self.wait(tokio::time::sleep(delay)).await?;
                    attempt += 1;
                    self.record_child_started(seq, &workflow_id, attempt).await?;
                }
                None => {
                    self.record(
                        EventType::ChildWorkflowExecutionFailed,
                        json!({ "seq": seq, "failure": failure }),
                    )
                    .await?;
                    return Err(child_failed(failure));
                }
            }
        }
    }

    async fn record_child_started(
        &mut self,
        seq: u64,
        workflow_id: &str,
        attempt: u32,
    ) -> Result<(), WorkflowError> {
        let run_id = child_run_id(workflow_id, attempt);
        self.record(
            EventType::ChildWorkflowExecutionStarted,
            json!({ "seq": seq, "attempt": attempt, "run_instance_id": run_id }),
        )
        .await
        .map(drop)
    }

    // ---------------------------------------------------------------------
    // Versioning
    // ---------------------------------------------------------------------

    /// Version gate for a code change.
    ///
    /// Live executions record `max_supported`. Replays of histories written
    /// before the change return [`DEFAULT_VERSION`]. The result is stable
    /// for the lifetime of the instance.
    pub async fn get_version(
        &mut self,
        change_id: &str,
        min_supported: i32,
        max_supported: i32,
    ) -> Result<i32, WorkflowError> {
        if let Some(version) = self.versions.get(change_id) {
            return Ok(*version);
        }
        self.drain_replayed_updates().await?;

        let recorded = self.history.get(self.cursor).map(|event| {
            (event.event_type == EventType::MarkerRecorded
                && event.attr_str("change_id") == Some(change_id))
            .then(|| decode::<i32>(event, "version"))
        });
        let version = match recorded {
            Some(Some(version)) => {
                self.cursor += 1;
                version?
            }
            Some(None) => DEFAULT_VERSION,
            None => {
                self.record(
                    EventType::MarkerRecorded,
                    json!({ "change_id": change_id, "version": max_supported }),
                )
                .await?;
                max_supported
            }
        };

        if version < min_supported || version > max_supported {
            return Err(self.nondeterminism(format!(
                "version {version} of change {change_id} is outside the supported range [{min_supported}, {max_supported}]"
            )));
        }
        self.versions.insert(change_id.to_string(), version);
        Ok(version)
    }

    // ---------------------------------------------------------------------
    // History plumbing
    // ---------------------------------------------------------------------

    /// Record the start event, or check the recorded one.
    pub(crate) async fn open_history(
        &mut self,
        version: u32,
        input: &serde_json::Value,
    ) -> Result<(), WorkflowError> {
        let Some(first) = self.history.first() else {
            self.record(
                EventType::WorkflowExecutionStarted,
                json!({
                    "workflow_type": self.workflow_type,
                    "version": version,
                    "input": input,
                }),
            )
            .await?;
            return Ok(());
        };
        if first.event_type == EventType::WorkflowExecutionStarted
            && first.attr_str("workflow_type") == Some(self.workflow_type)
        {
            self.cursor = 1;
            return Ok(());
        }
        let message = format!(
            "history of {} starts with {} for {:?}, not {}",
            self.instance_id,
            first.event_type,
            first.attr_str("workflow_type"),
            self.workflow_type
        );
        Err(self.nondeterminism(message))
    }

    /// Append an event to history.
    pub(crate) async fn record(
        &mut self,
        event_type: EventType,
        attributes: serde_json::Value,
    ) -> Result<HistoryEvent, WorkflowError> {
        if self.replay_only {
            let message = format!("replay of {} needs a new {event_type} event", self.instance_id);
            return Err(self.nondeterminism(message));
        }
        let event = HistoryEvent::builder(
            EventId(self.next_event_id),
            self.instance_id.clone(),
            event_type,
        )
        .payload(attributes)
        .build();

        match self
            .services
            .store
            .append_event(&self.instance_id, self.next_event_id, &event)
            .await
        {
            Ok(next_event_id) => {
                self.next_event_id = next_event_id;
                self.history.push(event.clone());
                self.cursor = self.history.len();
                Ok(event)
            }
            Err(error) => Err(self.escalate(WorkflowError::History(error))),
        }
    }

    /// Issue a command: consume its recorded event, or record it live.
    async fn issue(
        &mut self,
        event_type: EventType,
        attributes: serde_json::Value,
    ) -> Result<HistoryEvent, WorkflowError> {
        self.drain_replayed_updates().await?;

        let Some(recorded) = self.history.get(self.cursor) else {
            return self.record(event_type, attributes).await;
        };

        let same_identity = IDENTITY_ATTRIBUTES.iter().all(|name| {
            attributes.get(*name).is_none() || attributes.get(*name) == recorded.attributes.get(*name)
        });
        if recorded.event_type == event_type
            && recorded.seq() == attributes.get("seq").and_then(serde_json::Value::as_u64)
            && same_identity
        {
            let recorded = recorded.clone();
            self.cursor += 1;
            return Ok(recorded);
        }

        let message = format!(
            "issued {event_type} {attributes} but history event {} is {} {}",
            recorded.event_id, recorded.event_type, recorded.attributes
        );
        Err(self.nondeterminism(message))
    }

    /// Replay forward to the resolution of command `seq`.
    ///
    /// Returns `None` at the end of history. Update events found on the way
    /// re-run their handlers.
    async fn replay_until(
        &mut self,
        seq: u64,
        accept: &[EventType],
    ) -> Result<Option<HistoryEvent>, WorkflowError> {
        loop {
            let Some(event) = self.history.get(self.cursor).cloned() else {
                return Ok(None);
            };
            match event.event_type {
                EventType::WorkflowUpdateAccepted => self.replay_update(&event).await?,
                EventType::WorkflowUpdateCompleted => self.cursor += 1,
                event_type if accept.contains(&event_type) && event.seq() == Some(seq) => {
                    self.cursor += 1;
                    return Ok(Some(event));
                }
                _ => {
                    let message = format!(
                        "waiting on command {seq} but history event {} is {} {}",
                        event.event_id, event.event_type, event.attributes
                    );
                    return Err(self.nondeterminism(message));
                }
            }
        }
    }

    async fn drain_replayed_updates(&mut self) -> Result<(), WorkflowError> {
        while let Some(event) = self.history.get(self.cursor).cloned() {
            match event.event_type {
                EventType::WorkflowUpdateAccepted => self.replay_update(&event).await?,
                EventType::WorkflowUpdateCompleted => self.cursor += 1,
                _ => break,
            }
        }
        Ok(())
    }

    async fn replay_update(&mut self, event: &HistoryEvent) -> Result<(), WorkflowError> {
        let accepted: AcceptedUpdate = event
            .decode_attributes()
            .map_err(WorkflowError::serialization)?;
        self.cursor += 1;

        let Some(handler) = self.update_handlers.get(&accepted.name).cloned() else {
            let message = format!(
                "recorded update {} has no handler named {}",
                accepted.update_id, accepted.name
            );
            return Err(self.nondeterminism(message));
        };
        let outcome = {
            let mut scope = UpdateScope::new(&mut self.locals, &mut self.timers, true);
            handler.handle(&mut scope, &accepted.argument)
        };

        match self.history.get(self.cursor) {
            Some(next) if next.event_type == EventType::WorkflowUpdateCompleted => {
                self.cursor += 1;
            }
            None => {
                self.record(
                    EventType::WorkflowUpdateCompleted,
                    update_completion(&accepted.update_id, &outcome),
                )
                .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn handle_update(&mut self, request: UpdateRequest) -> Result<(), WorkflowError> {
        let Some(handler) = self.update_handlers.get(&request.name).cloned() else {
            let name = request.name.clone();
            request.respond(Err(UpdateError::UnknownUpdate(name)));
            return Ok(());
        };
        if let Err(failure) = handler.validate(&request.argument) {
            debug!(update = %request.name, error = %failure, "Update rejected");
            request.respond(Err(UpdateError::Rejected(failure)));
            return Ok(());
        }

        let accepted = self
            .record(
                EventType::WorkflowUpdateAccepted,
                json!({
                    "update_id": request.update_id,
                    "name": request.name,
                    "argument": request.argument,
                }),
            )
            .await;
        if let Err(error) = accepted {
            request.respond(Err(UpdateError::WorkflowClosed));
            return Err(error);
        }

        let outcome = {
            let mut scope = UpdateScope::new(&mut self.locals, &mut self.timers, false);
            handler.handle(&mut scope, &request.argument)
        };
        let completed = self
            .record(
                EventType::WorkflowUpdateCompleted,
                update_completion(&request.update_id, &outcome),
            )
            .await;
        if let Err(error) = completed {
            request.respond(Err(UpdateError::WorkflowClosed));
            return Err(error);
        }

        request.respond(outcome.map_err(UpdateError::Failed));
        Ok(())
    }

    /// Wait for `fut`, serving updates and watching for cancellation.
    async fn wait<F: Future>(&mut self, fut: F) -> Result<F::Output, WorkflowError> {
        // Only timers can be cancelled individually.
        self.suspend(fut, None)
            .await?
            .ok_or(WorkflowError::Canceled)
    }

    /// Wait for `fut`. Returns `None` when `timer` was cancelled first.
    async fn suspend<F: Future>(
        &mut self,
        fut: F,
        timer: Option<TimerId>,
    ) -> Result<Option<F::Output>, WorkflowError> {
        if self.replay_only {
            let message = format!("replay of {} waits past the end of its history", self.instance_id);
            return Err(self.nondeterminism(message));
        }
        let mut fut = std::pin::pin!(fut);
        loop {
            if let Some(id) = timer {
                if self.timers.is_cancel_requested(id) {
                    return Ok(None);
                }
            }

            let wake = {
                let cancellation = &self.cancellation;
                let inbox = &mut self.inbox;
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => Wake::Canceled,
                    request = next_update(inbox) => match request {
                        Some(request) => Wake::Update(request),
                        None => Wake::InboxClosed,
                    },
                    output = &mut fut => Wake::Ready(output),
                }
            };

            match wake {
                Wake::Ready(output) => return Ok(Some(output)),
                Wake::Canceled => return Err(WorkflowError::Canceled),
                Wake::Update(request) => self.handle_update(request).await?,
                Wake::InboxClosed => self.inbox = None,
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn nondeterminism(&mut self, message: String) -> WorkflowError {
        self.escalate(WorkflowError::Nondeterminism(message))
    }

    fn escalate(&mut self, error: WorkflowError) -> WorkflowError {
        if error.is_fatal() && self.fatal.is_none() {
            self.fatal = Some(error.clone());
        }
        error
    }

    pub(crate) fn take_fatal(&mut self) -> Option<WorkflowError> {
        self.fatal.take()
    }

    /// Recorded events the code has not reached yet.
    pub(crate) fn unconsumed_events(&self) -> usize {
        self.history.len() - self.cursor
    }
}

async fn next_update(inbox: &mut Option<mpsc::Receiver<UpdateRequest>>) -> Option<UpdateRequest> {
    match inbox {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn attempt_activity<A: Activity>(
    activity: &A,
    input: A::Input,
    start_to_close: Duration,
) -> Result<A::Output, ApplicationError> {
    match tokio::time::timeout(start_to_close, activity.execute(input)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ApplicationError::retryable(
            format!(
                "activity {} exceeded its start-to-close timeout of {}",
                A::TYPE_ID,
                humantime::format_duration(start_to_close)
            ),
            START_TO_CLOSE_TIMEOUT_ERROR_TYPE,
        )),
    }
}

fn activity_failed<A: Activity>(failure: ApplicationError) -> WorkflowError {
    WorkflowError::ActivityFailed {
        activity_type: A::TYPE_ID.to_string(),
        failure,
    }
}

fn child_run_id(workflow_id: &str, attempt: u32) -> InstanceId {
    InstanceId::new(format!("{workflow_id}/run-{attempt}"))
}

fn update_completion(
    update_id: &str,
    outcome: &Result<String, ApplicationError>,
) -> serde_json::Value {
    match outcome {
        Ok(result) => json!({ "update_id": update_id, "result": result }),
        Err(failure) => json!({ "update_id": update_id, "failure": failure }),
    }
}

fn decode<T: DeserializeOwned>(event: &HistoryEvent, name: &str) -> Result<T, WorkflowError> {
    event.attr(name).map_err(WorkflowError::serialization)
}
