//! Errors surfaced by the workflow runtime.

use crate::error::ApplicationError;
use crate::event::InstanceId;
use crate::port::EventStoreError;

/// Failure of a runtime operation invoked from workflow code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// The activity exhausted its retry policy.
    #[error("activity {activity_type} failed: {failure}")]
    ActivityFailed {
        activity_type: String,
        failure: ApplicationError,
    },

    /// The child workflow exhausted its retry policy.
    #[error("child workflow {workflow_type} ({workflow_id}) failed: {failure}")]
    ChildWorkflowFailed {
        workflow_type: String,
        workflow_id: String,
        failure: ApplicationError,
    },

    /// The workflow instance was cancelled while waiting.
    #[error("workflow canceled")]
    Canceled,

    /// Workflow code diverged from its recorded history.
    #[error("nondeterminism detected: {0}")]
    Nondeterminism(String),

    #[error("history store error: {0}")]
    History(#[from] EventStoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("update handler {0} is already registered")]
    DuplicateUpdateHandler(String),

    #[error("workflow instance {0} already has history")]
    AlreadyStarted(InstanceId),

    #[error("workflow instance {0} is already running")]
    AlreadyRunning(InstanceId),

    #[error("workflow instance {0} not found")]
    NotFound(InstanceId),

    #[error("workflow type {0} is not registered")]
    UnknownWorkflowType(String),

    #[error("timer-{0} is not pending")]
    UnknownTimer(u64),

    /// The task driving the instance stopped before it finished.
    #[error("workflow task aborted: {0}")]
    Aborted(String),
}

impl WorkflowError {
    /// The application failure carried by an activity or child failure.
    pub fn application_failure(&self) -> Option<&ApplicationError> {
        match self {
            WorkflowError::ActivityFailed { failure, .. }
            | WorkflowError::ChildWorkflowFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, WorkflowError::Canceled)
    }

    /// Errors that stop the instance without closing it. The instance can be
    /// resumed from its history once the cause is fixed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkflowError::Nondeterminism(_) | WorkflowError::History(_)
        )
    }

    pub(crate) fn serialization(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

/// Why an update was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    #[error("update {0} is not registered")]
    UnknownUpdate(String),

    /// The validator refused the argument; state was not touched.
    #[error("update rejected: {0}")]
    Rejected(ApplicationError),

    /// The handler ran and returned an error.
    #[error("update failed: {0}")]
    Failed(ApplicationError),

    #[error("workflow is closed")]
    WorkflowClosed,
}

impl UpdateError {
    /// True when the validator rejected the update.
    pub fn is_rejected(&self) -> bool {
        matches!(self, UpdateError::Rejected(_))
    }

    pub fn failure(&self) -> Option<&ApplicationError> {
        match self {
            UpdateError::Rejected(failure) | UpdateError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Outcome of running a workflow instance to completion.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowRunError<E> {
    /// Workflow code returned an error in this run.
    #[error("workflow failed: {0}")]
    Failed(E),

    /// The instance had already closed with this failure.
    #[error("workflow already closed: {0}")]
    Closed(ApplicationError),

    /// The runtime could not drive the instance.
    #[error(transparent)]
    Runtime(WorkflowError),
}

impl<E> WorkflowRunError<E> {
    pub fn workflow_error(&self) -> Option<&E> {
        match self {
            WorkflowRunError::Failed(error) => Some(error),
            _ => None,
        }
    }
}
