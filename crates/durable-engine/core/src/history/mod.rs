//! # Execution creation
//!
//! The history-service path that turns a start request into the initial
//! state of a new workflow run: validation, timeout normalization, state
//! initialization, the cross-cluster version check, and lease binding.

pub mod config;
pub mod initializer;
pub mod lease;
pub mod mutable_state;
pub mod namespace;
pub mod overrides;
pub mod request;
pub mod shard;
pub mod start;
pub mod validation;
pub mod version_check;

pub use config::{HistoryConfig, NamespaceLimits};
pub use initializer::{create_mutable_state, generate_first_workflow_task, new_workflow_with_signal};
pub use lease::{
    ExecutionContext, ExecutionLockTable, LeaseBinder, LockMode, NewWorkflowLeaseBinder, ReleaseFn,
    WorkflowLease, new_workflow_lease_and_context,
};
pub use mutable_state::{
    ExecutionInfo, ExecutionKey, ExecutionStatus, GeneratedTask, HistoryBranch, MutableState,
    WorkflowTaskInfo, WorkflowTaskStatus,
};
pub use namespace::{ClusterInfo, ClusterMetadata, NamespaceEntry, NamespaceId};
pub use overrides::{
    TimeoutOverride, override_start_workflow_execution_request, override_workflow_run_timeout,
    override_workflow_task_timeout,
};
pub use request::{
    Header, HistoryStartRequest, Memo, ParentExecutionInfo, Payload, Payloads, RetryPolicy,
    SignalWithStartRequest, StartWorkflowExecutionRequest, TaskQueue, VersioningBehavior,
    VersioningOverride, WireDuration, WorkflowType,
};
pub use shard::{Shard, ShardContext};
pub use start::{NewExecution, start_workflow_execution};
pub use validation::{validate_start, validate_start_workflow_execution_request};
pub use version_check::{VersionedRunId, new_workflow_version_check};
