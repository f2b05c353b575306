use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use durable_engine_core::error::ErrorKind;
use durable_engine_core::event::EventType;
use durable_engine_core::history::{
    start_workflow_execution, ClusterInfo, ClusterMetadata, ExecutionKey, GeneratedTask,
    HistoryConfig, HistoryStartRequest, LockMode, NamespaceEntry, NamespaceId, NewExecution,
    NewWorkflowLeaseBinder, ParentExecutionInfo, Payload, Payloads, SignalWithStartRequest,
    VersionedRunId, WorkflowTaskStatus,
};
use durable_engine_core::port::metrics::names;
use durable_engine_testing::{
    history_start_request, RecordingMetricsHandler, StartRequestBuilder, TestShard,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn shard() -> TestShard {
    TestShard::builder().now(now()).build()
}

fn namespace() -> NamespaceEntry {
    NamespaceEntry::local("ns-1", "acme")
}

fn binder() -> NewWorkflowLeaseBinder {
    NewWorkflowLeaseBinder::new(LockMode::FailFast)
}

fn execution(request: HistoryStartRequest) -> NewExecution {
    NewExecution::new(namespace(), request).with_run_id("run-1")
}

fn event_types(lease: &durable_engine_core::history::WorkflowLease) -> Vec<EventType> {
    lease
        .mutable_state()
        .history_events()
        .iter()
        .map(|event| event.event_type)
        .collect()
}

#[tokio::test]
async fn test_start_creates_started_and_scheduled_events() {
    let shard = shard();

    let lease = start_workflow_execution(&shard, &binder(), execution(history_start_request("order-1")))
        .await
        .unwrap();

    assert_eq!(
        event_types(&lease),
        vec![EventType::WorkflowExecutionStarted, EventType::WorkflowTaskScheduled]
    );
    let state = lease.mutable_state();
    let events = state.history_events();
    assert_eq!(events[0].event_id.0, 1);
    assert_eq!(events[1].event_id.0, 2);
    assert_eq!(events[0].timestamp, now());
    assert_eq!(state.next_event_id(), 3);

    let info = state.execution_info();
    assert_eq!(info.workflow_type, "test-workflow");
    assert_eq!(info.task_queue, "test-queue");
    assert_eq!(info.attempt, 1);
    assert_eq!(info.default_workflow_task_timeout, Duration::from_secs(10));
    assert_eq!(info.start_time, Some(now()));
    assert_eq!(info.execution_expiration_time, None);

    assert_eq!(state.workflow_task().status, WorkflowTaskStatus::Scheduled);
    assert_eq!(
        state.generated_tasks(),
        &[GeneratedTask::WorkflowTask {
            scheduled_event_id: events[1].event_id,
            task_queue: "test-queue".to_string(),
        }]
    );
    assert_eq!(
        state.history_branch().map(|branch| branch.tree_id.as_str()),
        Some("run-1")
    );

    let key = ExecutionKey::new(NamespaceId::new("ns-1"), "order-1", "run-1");
    assert_eq!(lease.key(), &key);
    assert!(shard.lock_table().is_locked(&key));
    drop(lease);
    assert!(!shard.lock_table().is_locked(&key));
}

#[tokio::test]
async fn test_generated_run_id_is_used_when_absent() {
    let shard = shard();

    let lease = start_workflow_execution(
        &shard,
        &binder(),
        NewExecution::new(namespace(), history_start_request("order-1")),
    )
    .await
    .unwrap();

    assert!(!lease.key().run_id.is_empty());
    assert_ne!(lease.key().run_id, "run-1");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let cases = [
        (
            StartRequestBuilder::new("acme", "order-1").request_id(""),
            "Missing request ID.",
        ),
        (
            StartRequestBuilder::new("acme", "order-1").without_workflow_type(),
            "Missing WorkflowType.",
        ),
        (
            StartRequestBuilder::new("acme", "order-1").task_queue(""),
            "Missing Taskqueue.",
        ),
        (
            StartRequestBuilder::new("acme", "a-workflow-id-longer-than-the-limit"),
            "WorkflowId exceeds length limit.",
        ),
    ];

    for (builder, message) in cases {
        let shard = TestShard::builder()
            .config(HistoryConfig::new().with_max_id_length(20))
            .build();
        let error = start_workflow_execution(&shard, &binder(), execution(builder.build_history("ns-1")))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InvalidArgument, "{message}");
        assert_eq!(error.message(), message);
        assert!(error.is_invalid_request());
    }
}

#[tokio::test]
async fn test_oversized_input_is_rejected_and_counted() {
    let metrics = Arc::new(RecordingMetricsHandler::new());
    let shard = TestShard::builder()
        .config(HistoryConfig::new().with_blob_size_limits(10, 20))
        .metrics(metrics.clone())
        .build();

    let request = StartRequestBuilder::new("acme", "order-1")
        .input_of_size(20)
        .build_history("ns-1");
    let error = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::BlobSizeExceeded);
    assert_eq!(error.get_context("blob_size"), Some("20"));
    assert_eq!(metrics.records(names::EVENT_BLOB_SIZE), vec![20]);
    assert_eq!(metrics.counter_total(names::EVENT_BLOB_SIZE_EXCEEDS_LIMIT), 1);
    assert!(!shard
        .lock_table()
        .is_locked(&ExecutionKey::new(NamespaceId::new("ns-1"), "order-1", "run-1")));
}

#[tokio::test]
async fn test_input_below_error_limit_only_warns() {
    let metrics = Arc::new(RecordingMetricsHandler::new());
    let shard = TestShard::builder()
        .config(HistoryConfig::new().with_blob_size_limits(10, 20))
        .metrics(metrics.clone())
        .build();

    let request = StartRequestBuilder::new("acme", "order-1")
        .input_of_size(19)
        .build_history("ns-1");
    start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap();

    assert_eq!(metrics.counter_total(names::EVENT_BLOB_SIZE_EXCEEDS_LIMIT), 0);
}

#[tokio::test]
async fn test_oversized_memo_is_rejected() {
    let metrics = Arc::new(RecordingMetricsHandler::new());
    let shard = TestShard::builder()
        .config(HistoryConfig::new().with_memo_size_limits(10, 20))
        .metrics(metrics.clone())
        .build();

    let request = StartRequestBuilder::new("acme", "order-1")
        .memo_of_size(100)
        .build_history("ns-1");
    let error = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MemoSizeExceeded);
    assert_eq!(metrics.counter_total(names::MEMO_SIZE_EXCEEDS_LIMIT), 1);
    assert_eq!(metrics.count(names::MEMO_SIZE), 1);
}

#[tokio::test]
async fn test_timeouts_are_normalized_before_creation() {
    let metrics = Arc::new(RecordingMetricsHandler::new());
    let shard = TestShard::builder()
        .now(now())
        .metrics(metrics.clone())
        .build();

    let request = StartRequestBuilder::new("acme", "order-1")
        .execution_timeout(Duration::from_secs(60))
        .build_history("ns-1");
    let lease = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap();

    let info = lease.mutable_state().execution_info();
    assert_eq!(info.workflow_execution_timeout, Duration::from_secs(60));
    assert_eq!(info.workflow_run_timeout, Duration::from_secs(60));
    assert_eq!(info.default_workflow_task_timeout, Duration::from_secs(10));

    let deadline = now() + chrono::Duration::seconds(60);
    assert_eq!(info.run_expiration_time, Some(deadline));
    // Equal deadlines produce a single timeout task.
    let timeouts: Vec<_> = lease
        .mutable_state()
        .generated_tasks()
        .iter()
        .filter(|task| !matches!(task, GeneratedTask::WorkflowTask { .. }))
        .collect();
    assert_eq!(timeouts, vec![&GeneratedTask::WorkflowRunTimeout { fire_at: deadline }]);

    assert_eq!(metrics.counter_total(names::WORKFLOW_RUN_TIMEOUT_OVERRIDE_COUNT), 1);
    assert_eq!(metrics.counter_total(names::WORKFLOW_TASK_TIMEOUT_OVERRIDE_COUNT), 1);
}

#[tokio::test]
async fn test_task_timeout_is_capped_by_maximum() {
    let shard = shard();

    let request = StartRequestBuilder::new("acme", "order-1")
        .task_timeout(Duration::from_secs(600))
        .build_history("ns-1");
    let lease = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap();

    assert_eq!(
        lease.mutable_state().execution_info().default_workflow_task_timeout,
        Duration::from_secs(120)
    );
    assert_eq!(
        lease.mutable_state().workflow_task().start_to_close_timeout,
        Duration::from_secs(120)
    );
}

#[tokio::test]
async fn test_eager_start_hands_task_to_caller() {
    let shard = shard();

    let request = StartRequestBuilder::new("acme", "order-1")
        .eager()
        .build_history("ns-1");
    let lease = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap();

    assert_eq!(
        event_types(&lease),
        vec![
            EventType::WorkflowExecutionStarted,
            EventType::WorkflowTaskScheduled,
            EventType::WorkflowTaskStarted,
        ]
    );
    let task = lease.mutable_state().workflow_task();
    assert_eq!(task.status, WorkflowTaskStatus::Started);
    assert_eq!(task.identity.as_deref(), Some("test-worker"));
    assert!(!lease
        .mutable_state()
        .generated_tasks()
        .iter()
        .any(|task| matches!(task, GeneratedTask::WorkflowTask { .. })));
}

#[tokio::test]
async fn test_first_task_backoff_schedules_timer() {
    let shard = shard();

    let mut request = StartRequestBuilder::new("acme", "order-1")
        .eager()
        .build_history("ns-1");
    request.first_workflow_task_backoff = Some(Duration::from_secs(30));
    let lease = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap();

    assert_eq!(event_types(&lease), vec![EventType::WorkflowExecutionStarted]);
    assert!(!lease.mutable_state().has_pending_workflow_task());
    assert_eq!(
        lease.mutable_state().generated_tasks(),
        &[GeneratedTask::WorkflowBackoffTimer {
            fire_at: now() + chrono::Duration::seconds(30)
        }]
    );
}

#[tokio::test]
async fn test_child_start_leaves_first_task_to_parent() {
    let shard = shard();

    let mut request = history_start_request("child-1");
    request.parent_execution_info = Some(ParentExecutionInfo {
        namespace_id: NamespaceId::new("ns-1"),
        namespace: "acme".to_string(),
        workflow_id: "parent-1".to_string(),
        run_id: "parent-run".to_string(),
        initiated_event_id: 5,
    });
    let lease = start_workflow_execution(&shard, &binder(), execution(request))
        .await
        .unwrap();

    assert_eq!(event_types(&lease), vec![EventType::WorkflowExecutionStarted]);
    assert_eq!(
        lease
            .mutable_state()
            .execution_info()
            .parent
            .as_ref()
            .map(|parent| parent.workflow_id.as_str()),
        Some("parent-1")
    );
}

#[tokio::test]
async fn test_signal_with_start_records_signal_before_first_task() {
    let shard = shard();

    let signal = SignalWithStartRequest {
        request_id: "signal-1".to_string(),
        signal_name: "approve".to_string(),
        signal_input: Some(Payloads::single(Payload::new(b"yes".to_vec()))),
        identity: "approver".to_string(),
        header: None,
    };
    let lease = start_workflow_execution(
        &shard,
        &binder(),
        execution(history_start_request("order-1")).with_signal(signal),
    )
    .await
    .unwrap();

    assert_eq!(
        event_types(&lease),
        vec![
            EventType::WorkflowExecutionStarted,
            EventType::WorkflowExecutionSignaled,
            EventType::WorkflowTaskScheduled,
        ]
    );
    assert!(lease.mutable_state().is_signal_requested("signal-1"));
    assert_eq!(lease.mutable_state().signal_count(), 1);
    assert_eq!(
        lease.mutable_state().history_events()[1].attr_str("signal_name"),
        Some("approve")
    );
}

#[tokio::test]
async fn test_signal_without_name_is_rejected() {
    let shard = shard();

    let error = start_workflow_execution(
        &shard,
        &binder(),
        execution(history_start_request("order-1")).with_signal(SignalWithStartRequest::default()),
    )
    .await
    .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    assert_eq!(error.message(), "Missing SignalName.");
}

#[tokio::test]
async fn test_history_branch_failure_creates_nothing() {
    let shard = TestShard::builder().fail_history_branch().build();

    let error = start_workflow_execution(&shard, &binder(), execution(history_start_request("order-1")))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::History);
    assert!(!shard
        .lock_table()
        .is_locked(&ExecutionKey::new(NamespaceId::new("ns-1"), "order-1", "run-1")));
}

fn two_clusters() -> ClusterMetadata {
    let mut clusters = HashMap::new();
    clusters.insert(
        "east".to_string(),
        ClusterInfo {
            initial_failover_version: 1,
            enabled: true,
        },
    );
    clusters.insert(
        "west".to_string(),
        ClusterInfo {
            initial_failover_version: 2,
            enabled: true,
        },
    );
    ClusterMetadata::new("east", 10, clusters).unwrap()
}

#[tokio::test]
async fn test_newer_previous_run_version_is_rejected() {
    let shard = TestShard::builder().cluster_metadata(two_clusters()).build();

    let execution = NewExecution::new(
        NamespaceEntry::global("ns-1", "acme", 11),
        history_start_request("order-1"),
    )
    .with_run_id("run-2")
    .with_previous_run(VersionedRunId {
        run_id: "run-1".to_string(),
        last_write_version: 22,
    });
    let error = start_workflow_execution(&shard, &binder(), execution)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NamespaceNotActive);
    assert_eq!(error.get_context("active_cluster"), Some("west"));
    assert_eq!(error.get_context("current_cluster"), Some("east"));
}

#[tokio::test]
async fn test_older_previous_run_version_is_accepted() {
    let shard = TestShard::builder().cluster_metadata(two_clusters()).build();

    let execution = NewExecution::new(
        NamespaceEntry::global("ns-1", "acme", 21),
        history_start_request("order-1"),
    )
    .with_run_id("run-2")
    .with_previous_run(VersionedRunId {
        run_id: "run-1".to_string(),
        last_write_version: 12,
    });
    let lease = start_workflow_execution(&shard, &binder(), execution)
        .await
        .unwrap();

    assert_eq!(lease.mutable_state().current_version(), 21);
    assert!(lease
        .mutable_state()
        .history_events()
        .iter()
        .all(|event| event.version == 21));
}

#[tokio::test]
async fn test_locked_run_fails_fast() {
    let shard = shard();

    let held = start_workflow_execution(&shard, &binder(), execution(history_start_request("order-1")))
        .await
        .unwrap();
    let error = start_workflow_execution(&shard, &binder(), execution(history_start_request("order-1")))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Lease);

    held.release(None);
    start_workflow_execution(&shard, &binder(), execution(history_start_request("order-1")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_existing_lease_is_reused_for_same_run() {
    let shard = shard();

    let held = start_workflow_execution(&shard, &binder(), execution(history_start_request("order-1")))
        .await
        .unwrap();
    let reused = start_workflow_execution(
        &shard,
        &binder(),
        execution(history_start_request("order-1")).with_existing_lease(held),
    )
    .await
    .unwrap();
    assert_eq!(reused.key().run_id, "run-1");

    let other = start_workflow_execution(
        &shard,
        &binder(),
        NewExecution::new(namespace(), history_start_request("order-1"))
            .with_run_id("run-2")
            .with_existing_lease(reused),
    )
    .await
    .unwrap_err();
    assert_eq!(other.kind(), ErrorKind::InvalidState);
}
