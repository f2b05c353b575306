//! Runtime that drives workflow instances against an [`EventStore`].
//!
//! Each started instance runs on its own tokio task. The returned
//! [`WorkflowHandle`] delivers updates, requests cancellation and yields
//! the final result. An instance whose task died can be resumed from its
//! history with [`WorkflowRuntime::resume`].

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::error::{ApplicationError, Error, ErrorKind};
use crate::event::{EventType, HistoryEvent, InstanceId};
use crate::port::{EventStore, EventStoreError, MetricsHandler, NoopMetricsHandler};
use crate::telemetry;
use crate::workflow::update::UpdateRequest;
use crate::workflow::{
    DurableWorkflow, UpdateError, WorkflowContext, WorkflowError, WorkflowRegistry,
    WorkflowRunError,
};

/// Default capacity of each instance's update inbox.
pub const DEFAULT_UPDATE_BUFFER: usize = 32;

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowRuntimeConfig {
    /// Updates queued per instance before senders wait.
    pub update_buffer: usize,
}

impl Default for WorkflowRuntimeConfig {
    fn default() -> Self {
        Self {
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }
}

impl WorkflowRuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> crate::error::Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| {
            Error::from_source("invalid runtime configuration", ErrorKind::Configuration, e)
        })?;
        if config.update_buffer == 0 {
            return Err(Error::configuration("update_buffer must be positive"));
        }
        Ok(config)
    }
}

/// Shared collaborators of every context the runtime creates.
#[derive(Clone)]
pub(crate) struct RuntimeServices {
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) metrics: Arc<dyn MetricsHandler>,
    /// Keys of live runs: top-level instance ids and child workflow ids.
    pub(crate) running: Arc<DashMap<String, ()>>,
}

/// Marks a key as live until dropped.
pub(crate) struct RunningSlot {
    running: Arc<DashMap<String, ()>>,
    key: String,
}

impl RunningSlot {
    /// `None` when the key is already live.
    pub(crate) fn claim(running: &Arc<DashMap<String, ()>>, key: &str) -> Option<Self> {
        match running.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(Self {
                    running: Arc::clone(running),
                    key: key.to_string(),
                })
            }
        }
    }
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.running.remove(&self.key);
    }
}

/// Handle to a running instance.
pub struct WorkflowHandle<O, E> {
    instance_id: InstanceId,
    updates: mpsc::Sender<UpdateRequest>,
    cancellation: CancellationToken,
    abort: AbortHandle,
    result: BoxFuture<'static, Result<O, WorkflowRunError<E>>>,
}

impl<O, E> WorkflowHandle<O, E> {
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Send an update and wait for the handler's reply.
    pub async fn update(
        &self,
        name: &str,
        argument: impl Into<String>,
    ) -> Result<String, UpdateError> {
        let (request, reply) = UpdateRequest::new(name, argument);
        self.updates
            .send(request)
            .await
            .map_err(|_| UpdateError::WorkflowClosed)?;
        reply.await.map_err(|_| UpdateError::WorkflowClosed)?
    }

    /// Request cancellation. The workflow observes it at its next wait.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Stop the task without recording anything, as a process crash would.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Wait for the instance to finish.
    pub async fn result(self) -> Result<O, WorkflowRunError<E>> {
        self.result.await
    }
}

impl<O, E> WorkflowHandle<O, E>
where
    O: Serialize + Send + 'static,
    E: Send + 'static,
{
    /// Erase the output and error types.
    pub(crate) fn erase(
        self,
        failure: fn(&E) -> ApplicationError,
    ) -> WorkflowHandle<Value, ApplicationError> {
        let result = self.result;
        WorkflowHandle {
            instance_id: self.instance_id,
            updates: self.updates,
            cancellation: self.cancellation,
            abort: self.abort,
            result: Box::pin(async move {
                match result.await {
                    Ok(output) => serde_json::to_value(output).map_err(|e| {
                        WorkflowRunError::Runtime(WorkflowError::serialization(e))
                    }),
                    Err(WorkflowRunError::Failed(error)) => {
                        Err(WorkflowRunError::Failed(failure(&error)))
                    }
                    Err(WorkflowRunError::Closed(failure)) => Err(WorkflowRunError::Closed(failure)),
                    Err(WorkflowRunError::Runtime(error)) => Err(WorkflowRunError::Runtime(error)),
                }
            }),
        }
    }
}

impl<O, E> std::fmt::Debug for WorkflowHandle<O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("instance_id", &self.instance_id)
            .field("canceled", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// Starts, resumes and replays workflow instances.
pub struct WorkflowRuntime {
    services: RuntimeServices,
    config: WorkflowRuntimeConfig,
    registry: Arc<WorkflowRegistry>,
}

impl WorkflowRuntime {
    pub fn new(store: Arc<dyn EventStore>, metrics: Arc<dyn MetricsHandler>) -> Self {
        Self {
            services: RuntimeServices {
                store,
                metrics,
                running: Arc::new(DashMap::new()),
            },
            config: WorkflowRuntimeConfig::default(),
            registry: Arc::new(WorkflowRegistry::new()),
        }
    }

    pub fn with_config(mut self, config: WorkflowRuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<WorkflowRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// True while a run holds `key` (an instance id or child workflow id).
    pub fn is_running(&self, key: &str) -> bool {
        self.services.running.contains_key(key)
    }

    /// Start a new instance.
    pub async fn start<W: DurableWorkflow>(
        &self,
        workflow: Arc<W>,
        instance_id: impl Into<InstanceId>,
        input: W::Input,
    ) -> Result<WorkflowHandle<W::Output, W::Error>, WorkflowError> {
        let instance_id = instance_id.into();
        let slot = self.claim(&instance_id)?;
        if self.services.store.instance_exists(&instance_id).await? {
            return Err(WorkflowError::AlreadyStarted(instance_id));
        }
        info!(workflow_type = W::TYPE_ID, instance_id = %instance_id, "Starting workflow");
        Ok(self.spawn(workflow, instance_id, input, slot))
    }

    /// Continue an instance from its recorded history.
    pub async fn resume<W: DurableWorkflow>(
        &self,
        workflow: Arc<W>,
        instance_id: impl Into<InstanceId>,
    ) -> Result<WorkflowHandle<W::Output, W::Error>, WorkflowError> {
        let instance_id = instance_id.into();
        let slot = self.claim(&instance_id)?;
        let history = self.services.store.get_history(&instance_id).await?;
        let input = recorded_input::<W>(&instance_id, &history)?;
        info!(
            workflow_type = W::TYPE_ID,
            instance_id = %instance_id,
            events = history.len(),
            "Resuming workflow"
        );
        Ok(self.spawn(workflow, instance_id, input, slot))
    }

    /// Start an instance of a registered workflow type.
    pub async fn start_registered(
        &self,
        workflow_type: &str,
        instance_id: impl Into<InstanceId>,
        input: Value,
    ) -> Result<WorkflowHandle<Value, ApplicationError>, WorkflowError> {
        let workflow = self
            .registry
            .get_workflow(workflow_type)
            .ok_or_else(|| WorkflowError::UnknownWorkflowType(workflow_type.to_string()))?;
        workflow.start_dyn(self, instance_id.into(), input).await
    }

    /// Resume an instance, looking its workflow type up in the registry.
    pub async fn resume_registered(
        &self,
        instance_id: impl Into<InstanceId>,
    ) -> Result<WorkflowHandle<Value, ApplicationError>, WorkflowError> {
        let instance_id = instance_id.into();
        let history = self.services.store.get_history(&instance_id).await?;
        let workflow_type = history
            .first()
            .and_then(|event| event.attr_str("workflow_type"))
            .ok_or_else(|| WorkflowError::NotFound(instance_id.clone()))?;
        let workflow = self
            .registry
            .get_workflow(workflow_type)
            .ok_or_else(|| WorkflowError::UnknownWorkflowType(workflow_type.to_string()))?;
        workflow.resume_dyn(self, instance_id).await
    }

    /// Re-execute `workflow` against a recorded history without side effects.
    ///
    /// Terminal events are ignored; the replay must consume every other
    /// event and may not need any new one.
    pub async fn replay<W: DurableWorkflow>(
        workflow: &W,
        history: Vec<HistoryEvent>,
    ) -> Result<W::Output, WorkflowRunError<W::Error>> {
        let history: Vec<HistoryEvent> = history
            .into_iter()
            .filter(|event| !event.event_type.is_terminal())
            .collect();
        let instance_id = history
            .first()
            .map(|event| event.instance_id.clone())
            .ok_or_else(|| {
                WorkflowRunError::Runtime(WorkflowError::NotFound(InstanceId::new("<empty>")))
            })?;
        let input = recorded_input::<W>(&instance_id, &history).map_err(WorkflowRunError::Runtime)?;

        let services = RuntimeServices {
            store: Arc::new(ReplayStore),
            metrics: Arc::new(NoopMetricsHandler),
            running: Arc::new(DashMap::new()),
        };
        let mut ctx = WorkflowContext::new(
            services,
            instance_id,
            W::TYPE_ID,
            history,
            CancellationToken::new(),
            None,
        );
        ctx.set_replay_only();
        ctx.open_history(W::VERSION, &Value::Null)
            .await
            .map_err(WorkflowRunError::Runtime)?;

        let result = workflow.run(&mut ctx, input).await;
        if let Some(fatal) = ctx.take_fatal() {
            return Err(WorkflowRunError::Runtime(fatal));
        }
        let unconsumed = ctx.unconsumed_events();
        if unconsumed > 0 {
            return Err(WorkflowRunError::Runtime(WorkflowError::Nondeterminism(
                format!("{unconsumed} recorded events were not replayed"),
            )));
        }
        result.map_err(WorkflowRunError::Failed)
    }

    fn claim(&self, instance_id: &InstanceId) -> Result<RunningSlot, WorkflowError> {
        RunningSlot::claim(&self.services.running, instance_id.as_str())
            .ok_or_else(|| WorkflowError::AlreadyRunning(instance_id.clone()))
    }

    fn spawn<W: DurableWorkflow>(
        &self,
        workflow: Arc<W>,
        instance_id: InstanceId,
        input: W::Input,
        slot: RunningSlot,
    ) -> WorkflowHandle<W::Output, W::Error> {
        let (updates, inbox) = mpsc::channel(self.config.update_buffer.max(1));
        let cancellation = CancellationToken::new();
        let services = self.services.clone();
        let span = telemetry::workflow_span(W::TYPE_ID, instance_id.as_str());

        let task_instance = instance_id.clone();
        let task_cancellation = cancellation.clone();
        let join = tokio::spawn(
            async move {
                let _slot = slot;
                execute_instance(
                    &services,
                    workflow.as_ref(),
                    task_instance,
                    input,
                    task_cancellation,
                    Some(inbox),
                )
                .await
            }
            .instrument(span),
        );
        let abort = join.abort_handle();

        WorkflowHandle {
            instance_id,
            updates,
            cancellation,
            abort,
            result: Box::pin(async move {
                join.await.unwrap_or_else(|e| {
                    Err(WorkflowRunError::Runtime(WorkflowError::Aborted(e.to_string())))
                })
            }),
        }
    }
}

impl std::fmt::Debug for WorkflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRuntime")
            .field("config", &self.config)
            .field("running", &self.services.running.len())
            .field("registered", &self.registry.len())
            .finish()
    }
}

/// Run one instance until it closes.
///
/// A closed history returns its recorded outcome without running any code.
pub(crate) async fn execute_instance<W: DurableWorkflow>(
    services: &RuntimeServices,
    workflow: &W,
    instance_id: InstanceId,
    input: W::Input,
    cancellation: CancellationToken,
    inbox: Option<mpsc::Receiver<UpdateRequest>>,
) -> Result<W::Output, WorkflowRunError<W::Error>> {
    let history = services
        .store
        .get_history(&instance_id)
        .await
        .map_err(|e| WorkflowRunError::Runtime(e.into()))?;
    if let Some(terminal) = history.iter().find(|event| event.event_type.is_terminal()) {
        return closed_outcome::<W>(terminal);
    }

    let encoded = serde_json::to_value(&input)
        .map_err(|e| WorkflowRunError::Runtime(WorkflowError::serialization(e)))?;
    let mut ctx = WorkflowContext::new(
        services.clone(),
        instance_id,
        W::TYPE_ID,
        history,
        cancellation,
        inbox,
    );
    ctx.open_history(W::VERSION, &encoded)
        .await
        .map_err(WorkflowRunError::Runtime)?;

    let result = workflow.run(&mut ctx, input).await;
    if let Some(fatal) = ctx.take_fatal() {
        error!(
            workflow_type = W::TYPE_ID,
            instance_id = %ctx.instance_id(),
            error = %fatal,
            "Workflow stopped without closing"
        );
        return Err(WorkflowRunError::Runtime(fatal));
    }

    match result {
        Ok(output) => {
            let encoded = serde_json::to_value(&output)
                .map_err(|e| WorkflowRunError::Runtime(WorkflowError::serialization(e)))?;
            ctx.record(
                EventType::WorkflowExecutionCompleted,
                json!({ "result": encoded }),
            )
            .await
            .map_err(WorkflowRunError::Runtime)?;
            info!(workflow_type = W::TYPE_ID, instance_id = %ctx.instance_id(), "Workflow completed");
            Ok(output)
        }
        Err(error) => {
            let failure = W::failure(&error);
            let event_type = if ctx.is_canceled() {
                EventType::WorkflowExecutionCanceled
            } else {
                EventType::WorkflowExecutionFailed
            };
            if let Err(record_error) = ctx.record(event_type, json!({ "failure": failure })).await {
                warn!(
                    instance_id = %ctx.instance_id(),
                    error = %record_error,
                    "Failed to record workflow closure"
                );
            }
            info!(
                workflow_type = W::TYPE_ID,
                instance_id = %ctx.instance_id(),
                outcome = %event_type,
                error = %error,
                "Workflow closed with error"
            );
            Err(WorkflowRunError::Failed(error))
        }
    }
}

fn closed_outcome<W: DurableWorkflow>(
    terminal: &HistoryEvent,
) -> Result<W::Output, WorkflowRunError<W::Error>> {
    match terminal.event_type {
        EventType::WorkflowExecutionCompleted => terminal
            .attr("result")
            .map_err(|e| WorkflowRunError::Runtime(WorkflowError::serialization(e))),
        _ => {
            let failure: ApplicationError = terminal
                .attr("failure")
                .map_err(|e| WorkflowRunError::Runtime(WorkflowError::serialization(e)))?;
            Err(WorkflowRunError::Closed(failure))
        }
    }
}

fn recorded_input<W: DurableWorkflow>(
    instance_id: &InstanceId,
    history: &[HistoryEvent],
) -> Result<W::Input, WorkflowError> {
    let started = history
        .first()
        .filter(|event| event.event_type == EventType::WorkflowExecutionStarted)
        .ok_or_else(|| WorkflowError::NotFound(instance_id.clone()))?;
    started.attr("input").map_err(WorkflowError::serialization)
}

/// Store backing [`WorkflowRuntime::replay`]. Holds nothing and accepts nothing.
struct ReplayStore;

#[async_trait]
impl EventStore for ReplayStore {
    async fn append_events(
        &self,
        _instance_id: &InstanceId,
        _expected_next_event_id: u64,
        _events: &[HistoryEvent],
    ) -> Result<u64, EventStoreError> {
        Err(EventStoreError::Backend("replay is read-only".to_string()))
    }

    async fn get_history(
        &self,
        _instance_id: &InstanceId,
    ) -> Result<Vec<HistoryEvent>, EventStoreError> {
        Ok(Vec::new())
    }
}
