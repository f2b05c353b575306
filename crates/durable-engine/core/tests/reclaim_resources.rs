use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use durable_engine_core::error::ApplicationError;
use durable_engine_core::event::{EventId, EventType, HistoryEvent, InstanceId};
use durable_engine_core::history::NamespaceId;
use durable_engine_core::port::metrics::names;
use durable_engine_core::reclaim::{
    ReclaimError, ReclaimResourcesParams, ReclaimResourcesResult, ReclaimResourcesWorkflow,
    NOT_DELETED_EXECUTIONS_STILL_EXIST_ERROR_TYPE, UPDATE_NAMESPACE_DELETE_DELAY,
};
use durable_engine_core::workflow::{
    UpdateError, WorkflowError, WorkflowRunError, WorkflowRuntime,
};
use durable_engine_testing::{
    BackendCall, InMemoryEventStore, RecordingMetricsHandler, ScriptedNamespaceBackend,
};

const INSTANCE: &str = "reclaim/acme";

struct Harness {
    store: Arc<InMemoryEventStore>,
    metrics: Arc<RecordingMetricsHandler>,
    backend: Arc<ScriptedNamespaceBackend>,
    runtime: WorkflowRuntime,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let metrics = Arc::new(RecordingMetricsHandler::new());
        let runtime = WorkflowRuntime::new(store.clone(), metrics.clone());
        Self {
            store,
            metrics,
            backend: Arc::new(ScriptedNamespaceBackend::new()),
            runtime,
        }
    }

    fn workflow(&self) -> Arc<ReclaimResourcesWorkflow> {
        Arc::new(ReclaimResourcesWorkflow::new(self.backend.clone()))
    }

    fn history(&self) -> Vec<HistoryEvent> {
        self.store.history(&InstanceId::new(INSTANCE))
    }
}

fn params() -> ReclaimResourcesParams {
    ReclaimResourcesParams::new("ns-1", "acme")
}

fn params_with_delay(delay: Duration) -> ReclaimResourcesParams {
    params().with_namespace_delete_delay(delay)
}

fn event_types(history: &[HistoryEvent]) -> Vec<EventType> {
    history.iter().map(|event| event.event_type).collect()
}

#[tokio::test(start_paused = true)]
async fn test_empty_namespace_is_deleted_without_child_workflow() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let result = handle.result().await.unwrap();

    assert_eq!(
        result,
        ReclaimResourcesResult {
            delete_success_count: 0,
            delete_error_count: 0,
            namespace_deleted: true,
        }
    );
    assert_eq!(
        harness.backend.calls(),
        vec![
            BackendCall::CountExecutions {
                namespace: "acme".to_string()
            },
            BackendCall::DeleteNamespace {
                namespace_id: NamespaceId::new("ns-1"),
                namespace: "acme".to_string()
            },
        ]
    );

    let history = harness.history();
    let marker = history
        .iter()
        .find(|event| event.event_type == EventType::MarkerRecorded)
        .unwrap();
    assert_eq!(marker.attr_str("change_id"), Some("remove-std-vis"));
    assert_eq!(marker.attr::<i32>("version").unwrap(), 0);
    assert_eq!(
        history.last().map(|event| event.event_type),
        Some(EventType::WorkflowExecutionCompleted)
    );

    assert_eq!(
        harness
            .metrics
            .counter_total(names::RECLAIM_RESOURCES_NAMESPACE_DELETE_SUCCESS_COUNT),
        1
    );
    assert_eq!(
        harness
            .metrics
            .count(names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_SUCCESS_COUNT),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_executions_are_deleted_through_child_workflow() {
    let harness = Harness::new();
    harness.backend.push_count(Ok(5)).push_pages(&[(3, 0), (2, 0)]);

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let result = handle.result().await.unwrap();

    assert_eq!(result.delete_success_count, 5);
    assert_eq!(result.delete_error_count, 0);
    assert!(result.namespace_deleted);
    assert_eq!(harness.backend.page_calls(), 2);
    assert_eq!(
        harness.backend.call_count(|call| matches!(
            call,
            BackendCall::DeleteExecutionsPage { next_page_token: Some(token) } if token == "page-1"
        )),
        1
    );
    assert_eq!(
        harness.backend.call_count(|call| matches!(
            call,
            BackendCall::EnsureNoExecutions {
                not_deleted_count: 0
            }
        )),
        1
    );

    let child = harness
        .store
        .history(&InstanceId::new("temporal-sys-delete-executions-workflow/acme/run-1"));
    assert_eq!(
        child.first().map(|event| event.event_type),
        Some(EventType::WorkflowExecutionStarted)
    );
    assert_eq!(
        child.last().map(|event| event.event_type),
        Some(EventType::WorkflowExecutionCompleted)
    );
    assert!(harness
        .history()
        .iter()
        .any(|event| event.event_type == EventType::ChildWorkflowExecutionStarted));

    assert_eq!(
        harness
            .metrics
            .counter_total(names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_SUCCESS_COUNT),
        5
    );
    assert_eq!(
        harness
            .metrics
            .count(names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_FAILURE_COUNT),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_residual_executions_fail_as_retryable_with_progress() {
    let harness = Harness::new();
    harness
        .backend
        .push_count(Ok(5))
        .push_pages(&[(3, 2)])
        .push_ensure(Err(ApplicationError::non_retryable(
            "2 executions were not deleted",
            NOT_DELETED_EXECUTIONS_STILL_EXIST_ERROR_TYPE,
        )
        .with_details(&2u64)));

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let failure = match handle.result().await {
        Err(WorkflowRunError::Failed(failure)) => failure,
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert_eq!(
        failure.result,
        ReclaimResourcesResult {
            delete_success_count: 3,
            delete_error_count: 2,
            namespace_deleted: false,
        }
    );
    let application = match &failure.error {
        ReclaimError::Application(application) => application,
        other => panic!("unexpected error: {other:?}"),
    };
    assert!(!application.is_non_retryable());
    assert_eq!(application.error_type(), NOT_DELETED_EXECUTIONS_STILL_EXIST_ERROR_TYPE);
    assert_eq!(application.details_as::<u64>(), Some(2));
    assert!(failure.error.is_retryable());
    assert_eq!(harness.backend.delete_namespace_calls(), 0);

    let closing = harness.history().last().cloned().unwrap();
    assert_eq!(closing.event_type, EventType::WorkflowExecutionFailed);
    let recorded: ApplicationError = closing.attr("failure").unwrap();
    assert_eq!(recorded.details_as::<u64>(), Some(2));

    assert_eq!(
        harness
            .metrics
            .counter_total(names::RECLAIM_RESOURCES_NAMESPACE_DELETE_FAILURE_COUNT),
        1
    );
    assert_eq!(
        harness
            .metrics
            .counter_total(names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_SUCCESS_COUNT),
        3
    );
    assert_eq!(
        harness
            .metrics
            .counter_total(names::RECLAIM_RESOURCES_DELETE_EXECUTIONS_FAILURE_COUNT),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_clears_delay_before_it_starts() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(
            harness.workflow(),
            INSTANCE,
            params_with_delay(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    let reply = handle
        .update(UPDATE_NAMESPACE_DELETE_DELAY, "0")
        .await
        .unwrap();
    assert_eq!(reply, "Namespace delete delay is removed.");

    let result = handle.result().await.unwrap();
    assert!(result.namespace_deleted);

    let history = harness.history();
    assert!(history
        .iter()
        .any(|event| event.event_type == EventType::WorkflowUpdateAccepted));
    assert!(history
        .iter()
        .any(|event| event.event_type == EventType::WorkflowUpdateCompleted));
    // Only the cache refresh timer was started.
    assert_eq!(
        history
            .iter()
            .filter(|event| event.event_type == EventType::TimerStarted)
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_cancels_pending_delay_timer() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(
            harness.workflow(),
            INSTANCE,
            params_with_delay(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let reply = handle
        .update(UPDATE_NAMESPACE_DELETE_DELAY, "0")
        .await
        .unwrap();
    assert_eq!(
        reply,
        "Existing namespace delete delay timer is cancelled. Namespace delete delay is removed."
    );

    let result = handle.result().await.unwrap();
    assert!(result.namespace_deleted);
    assert_eq!(harness.backend.delete_namespace_calls(), 1);
    assert!(harness
        .history()
        .iter()
        .any(|event| event.event_type == EventType::TimerCanceled));
}

#[tokio::test(start_paused = true)]
async fn test_update_reschedules_delay() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(
            harness.workflow(),
            INSTANCE,
            params_with_delay(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let reply = handle
        .update(UPDATE_NAMESPACE_DELETE_DELAY, "10m")
        .await
        .unwrap();
    assert_eq!(
        reply,
        "Existing namespace delete delay timer is cancelled. Namespace delete delay is updated to 10m."
    );

    let result = handle.result().await.unwrap();
    assert!(result.namespace_deleted);

    let history = harness.history();
    let types = event_types(&history);
    let canceled = types
        .iter()
        .position(|event_type| *event_type == EventType::TimerCanceled)
        .unwrap();
    let fired_after = types[canceled..]
        .iter()
        .filter(|event_type| **event_type == EventType::TimerFired)
        .count();
    assert_eq!(fired_after, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_delay_update_is_rejected() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let rejected = handle
        .update(UPDATE_NAMESPACE_DELETE_DELAY, "-1h")
        .await
        .unwrap_err();
    assert!(rejected.is_rejected());
    assert_eq!(
        rejected.failure().map(ApplicationError::message),
        Some("delay duration must be positive")
    );

    let unknown = handle.update("pause", "").await.unwrap_err();
    assert_eq!(unknown, UpdateError::UnknownUpdate("pause".to_string()));

    handle.result().await.unwrap();
    assert!(!harness
        .history()
        .iter()
        .any(|event| event.event_type == EventType::WorkflowUpdateAccepted));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_delay_closes_as_canceled() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(
            harness.workflow(),
            INSTANCE,
            params_with_delay(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    handle.cancel();

    let failure = match handle.result().await {
        Err(WorkflowRunError::Failed(failure)) => failure,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(failure.error, ReclaimError::Canceled);
    assert!(!failure.result.namespace_deleted);
    assert_eq!(harness.backend.delete_namespace_calls(), 0);
    assert_eq!(
        harness.history().last().map(|event| event.event_type),
        Some(EventType::WorkflowExecutionCanceled)
    );
    assert_eq!(
        harness
            .metrics
            .counter_total(names::RECLAIM_RESOURCES_NAMESPACE_DELETE_FAILURE_COUNT),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_namespace_is_retried() {
    let harness = Harness::new();
    harness
        .backend
        .push_delete_namespace(Err(ApplicationError::retryable("registry busy", "Unavailable")));

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let result = handle.result().await.unwrap();

    assert!(result.namespace_deleted);
    assert_eq!(harness.backend.delete_namespace_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delete_namespace_non_retryable_failure() {
    let harness = Harness::new();
    harness
        .backend
        .push_delete_namespace(Err(ApplicationError::non_retryable("namespace is locked", "Locked")));

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let failure = handle.result().await.unwrap_err();

    let failure = failure.workflow_error().unwrap();
    match &failure.error {
        ReclaimError::UnableToExecuteActivity { activity, source } => {
            assert_eq!(*activity, "DeleteNamespaceActivity");
            assert!(matches!(source, WorkflowError::ActivityFailed { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!failure.result.namespace_deleted);
    assert_eq!(harness.backend.delete_namespace_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_params_touch_nothing() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(
            harness.workflow(),
            INSTANCE,
            ReclaimResourcesParams::new("", "acme"),
        )
        .await
        .unwrap();
    let failure = handle.result().await.unwrap_err();

    let failure = failure.workflow_error().unwrap();
    assert!(matches!(failure.error, ReclaimError::InvalidParams(_)));
    assert!(!failure.error.is_retryable());
    assert!(harness.backend.calls().is_empty());
    assert!(harness.metrics.emitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_abort_continues_from_history() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(
            harness.workflow(),
            INSTANCE,
            params_with_delay(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    handle.abort();
    assert!(matches!(
        handle.result().await,
        Err(WorkflowRunError::Runtime(WorkflowError::Aborted(_)))
    ));
    assert!(!harness.runtime.is_running(INSTANCE));

    let resumed = harness
        .runtime
        .resume(harness.workflow(), INSTANCE)
        .await
        .unwrap();
    let result = resumed.result().await.unwrap();

    assert!(result.namespace_deleted);
    assert_eq!(
        harness
            .backend
            .call_count(|call| matches!(call, BackendCall::CountExecutions { .. })),
        1
    );
    assert_eq!(harness.backend.delete_namespace_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_start_is_rejected() {
    let harness = Harness::new();

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let duplicate = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap_err();
    assert_eq!(duplicate, WorkflowError::AlreadyRunning(InstanceId::new(INSTANCE)));

    handle.result().await.unwrap();
    let again = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap_err();
    assert_eq!(again, WorkflowError::AlreadyStarted(InstanceId::new(INSTANCE)));
}

#[tokio::test(start_paused = true)]
async fn test_recorded_history_replays_without_side_effects() {
    let harness = Harness::new();
    harness.backend.push_count(Ok(5)).push_pages(&[(3, 0), (2, 0)]);

    let handle = harness
        .runtime
        .start(harness.workflow(), INSTANCE, params())
        .await
        .unwrap();
    let recorded = handle.result().await.unwrap();

    let fresh = Arc::new(ScriptedNamespaceBackend::new());
    let workflow = ReclaimResourcesWorkflow::new(fresh.clone());
    let replayed = WorkflowRuntime::replay(&workflow, harness.history())
        .await
        .unwrap();

    assert_eq!(replayed, recorded);
    assert!(fresh.calls().is_empty());
}

#[tokio::test]
async fn test_history_without_version_marker_replays_visibility_probe() {
    let instance = InstanceId::new(INSTANCE);
    let input = serde_json::to_value(params()).unwrap();
    let attributes = [
        (
            EventType::WorkflowExecutionStarted,
            json!({
                "workflow_type": "temporal-sys-reclaim-namespace-resources-workflow",
                "version": 1,
                "input": input,
            }),
        ),
        (
            EventType::TimerStarted,
            json!({ "seq": 1, "duration_ms": 11000, "fire_at": Utc::now() }),
        ),
        (EventType::TimerFired, json!({ "seq": 1 })),
        (
            EventType::ActivityTaskScheduled,
            json!({
                "seq": 2,
                "activity_type": "IsAdvancedVisibilityActivity",
                "kind": "local",
                "task_queue": null,
                "input": "acme",
            }),
        ),
        (
            EventType::ActivityTaskCompleted,
            json!({ "seq": 2, "attempt": 1, "result": true }),
        ),
        (
            EventType::ActivityTaskScheduled,
            json!({
                "seq": 3,
                "activity_type": "CountExecutionsAdvVisibilityActivity",
                "kind": "local",
                "task_queue": null,
                "input": { "namespace_id": "ns-1", "namespace": "acme" },
            }),
        ),
        (
            EventType::ActivityTaskCompleted,
            json!({ "seq": 3, "attempt": 1, "result": 0 }),
        ),
        (
            EventType::ActivityTaskScheduled,
            json!({
                "seq": 4,
                "activity_type": "DeleteNamespaceActivity",
                "kind": "local",
                "task_queue": null,
                "input": { "namespace_id": "ns-1", "namespace": "acme" },
            }),
        ),
        (
            EventType::ActivityTaskCompleted,
            json!({ "seq": 4, "attempt": 1, "result": null }),
        ),
    ];
    let history: Vec<HistoryEvent> = attributes
        .into_iter()
        .enumerate()
        .map(|(index, (event_type, attributes))| {
            HistoryEvent::new(
                EventId(index as u64 + 1),
                instance.clone(),
                event_type,
                attributes,
            )
        })
        .collect();

    let backend = Arc::new(ScriptedNamespaceBackend::new());
    let workflow = ReclaimResourcesWorkflow::new(backend.clone());
    let result = WorkflowRuntime::replay(&workflow, history).await.unwrap();

    assert!(result.namespace_deleted);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_replay_detects_changed_workflow_code() {
    let instance = InstanceId::new(INSTANCE);
    let input = serde_json::to_value(params()).unwrap();
    let history = vec![
        HistoryEvent::new(
            EventId(1),
            instance.clone(),
            EventType::WorkflowExecutionStarted,
            json!({
                "workflow_type": "temporal-sys-reclaim-namespace-resources-workflow",
                "version": 1,
                "input": input,
            }),
        ),
        HistoryEvent::new(
            EventId(2),
            instance,
            EventType::ActivityTaskScheduled,
            json!({
                "seq": 1,
                "activity_type": "DeleteNamespaceActivity",
                "kind": "local",
                "task_queue": null,
                "input": { "namespace_id": "ns-1", "namespace": "acme" },
            }),
        ),
    ];

    let workflow = ReclaimResourcesWorkflow::new(Arc::new(ScriptedNamespaceBackend::new()));
    let outcome = WorkflowRuntime::replay(&workflow, history).await;

    assert!(matches!(
        outcome,
        Err(WorkflowRunError::Runtime(WorkflowError::Nondeterminism(_)))
    ));
}
