//! Start handler: validate, normalize, initialize, version-check, lease.

use tracing::{debug, info};
use uuid::Uuid;

use super::initializer::new_workflow_with_signal;
use super::lease::{LeaseBinder, WorkflowLease};
use super::namespace::NamespaceEntry;
use super::overrides::override_start_workflow_execution_request;
use super::request::{HistoryStartRequest, SignalWithStartRequest};
use super::shard::ShardContext;
use super::validation::{check_event_blob_size_limit, validate_start_workflow_execution_request};
use super::version_check::{VersionedRunId, new_workflow_version_check};
use crate::error::{Error, Result};
use crate::event::EMPTY_VERSION;

pub const START_WORKFLOW_EXECUTION_OPERATION: &str = "StartWorkflowExecution";
pub const SIGNAL_WITH_START_WORKFLOW_EXECUTION_OPERATION: &str = "SignalWithStartWorkflowExecution";

/// Everything needed to create one new run.
#[derive(Debug)]
pub struct NewExecution {
    pub namespace_entry: NamespaceEntry,
    pub request: HistoryStartRequest,
    pub signal_with_start: Option<SignalWithStartRequest>,
    /// Run id to use; generated when absent.
    pub run_id: Option<String>,
    /// The run this one replaces, for the cross-cluster version check.
    pub previous_run: Option<VersionedRunId>,
    /// A lease the caller already holds for this run.
    pub existing_lease: Option<WorkflowLease>,
}

impl NewExecution {
    pub fn new(namespace_entry: NamespaceEntry, request: HistoryStartRequest) -> Self {
        Self {
            namespace_entry,
            request,
            signal_with_start: None,
            run_id: None,
            previous_run: None,
            existing_lease: None,
        }
    }

    pub fn with_signal(mut self, signal: SignalWithStartRequest) -> Self {
        self.signal_with_start = Some(signal);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_previous_run(mut self, previous: VersionedRunId) -> Self {
        self.previous_run = Some(previous);
        self
    }

    pub fn with_existing_lease(mut self, lease: WorkflowLease) -> Self {
        self.existing_lease = Some(lease);
        self
    }

    fn operation(&self) -> &'static str {
        if self.signal_with_start.is_some() {
            SIGNAL_WITH_START_WORKFLOW_EXECUTION_OPERATION
        } else {
            START_WORKFLOW_EXECUTION_OPERATION
        }
    }
}

/// Create a new run and return it under a lease.
///
/// Nothing is created when any step fails; the caller persists the leased
/// state's buffered events on success.
pub async fn start_workflow_execution(
    shard: &dyn ShardContext,
    binder: &dyn LeaseBinder,
    execution: NewExecution,
) -> Result<WorkflowLease> {
    let operation = execution.operation();
    let NewExecution {
        namespace_entry,
        mut request,
        signal_with_start,
        run_id,
        previous_run,
        existing_lease,
    } = execution;

    validate_start_workflow_execution_request(
        &request.start_request,
        &namespace_entry,
        operation,
        shard.config(),
        shard.metrics(),
    )?;
    if let Some(signal) = signal_with_start.as_ref() {
        validate_signal(signal, &namespace_entry, &request, shard, operation)?;
    }

    let overrides = override_start_workflow_execution_request(
        &mut request.start_request,
        operation,
        shard.config(),
        shard.metrics(),
    );
    if !overrides.is_empty() {
        debug!(?overrides, "normalized start request timeouts");
    }

    let workflow_id = request.start_request.workflow_id.clone();
    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let state = new_workflow_with_signal(
        shard,
        &namespace_entry,
        &workflow_id,
        &run_id,
        &request,
        signal_with_start.as_ref(),
    )?;

    let previous_version = previous_run
        .as_ref()
        .map_or(EMPTY_VERSION, |previous| previous.last_write_version);
    new_workflow_version_check(shard.cluster_metadata(), previous_version, &state)?;

    let lease = binder.bind(existing_lease, shard, state).await?;
    info!(
        namespace = namespace_entry.name(),
        workflow_id = %workflow_id,
        run_id = %run_id,
        operation,
        "workflow execution created"
    );
    Ok(lease)
}

fn validate_signal(
    signal: &SignalWithStartRequest,
    namespace_entry: &NamespaceEntry,
    request: &HistoryStartRequest,
    shard: &dyn ShardContext,
    operation: &str,
) -> Result<()> {
    if signal.signal_name.is_empty() {
        return Err(Error::invalid_argument("Missing SignalName."));
    }
    let config = shard.config();
    if signal.signal_name.len() > config.max_id_length_limit {
        return Err(Error::invalid_argument("SignalName exceeds length limit."));
    }
    let namespace = namespace_entry.name();
    check_event_blob_size_limit(
        signal.signal_input.as_ref().map_or(0, |input| input.size()),
        config.blob_size_limit_warn(namespace),
        config.blob_size_limit_error(namespace),
        namespace,
        &request.start_request.workflow_id,
        operation,
        shard.metrics(),
    )
    .map_err(|_| Error::blob_size_exceeded("Blob data size exceeds limit."))
}
