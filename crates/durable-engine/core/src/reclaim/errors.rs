//! Error types of the reclamation workflows.

use crate::error::ApplicationError;
use crate::reclaim::ReclaimResourcesResult;
use crate::workflow::WorkflowError;

/// Error type of update validation failures.
pub const VALIDATION_ERROR_TYPE: &str = "ValidationError";
/// Executions remain in the namespace after deletion.
pub const EXECUTIONS_STILL_EXIST_ERROR_TYPE: &str = "ExecutionsStillExist";
/// Execution count did not go down between checks.
pub const NO_PROGRESS_ERROR_TYPE: &str = "NoProgress";
/// Executions that failed to delete are still listed.
pub const NOT_DELETED_EXECUTIONS_STILL_EXIST_ERROR_TYPE: &str = "NotDeletedExecutionsStillExist";

/// Ensure-no-executions failures re-raised as retryable at the workflow level.
pub const RESIDUAL_EXECUTIONS_ERROR_TYPES: [&str; 3] = [
    EXECUTIONS_STILL_EXIST_ERROR_TYPE,
    NO_PROGRESS_ERROR_TYPE,
    NOT_DELETED_EXECUTIONS_STILL_EXIST_ERROR_TYPE,
];

/// Why a reclamation step failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReclaimError {
    #[error("invalid params: {0}")]
    InvalidParams(ApplicationError),

    #[error("unable to set update handler: {0}")]
    UnableToSetUpdateHandler(WorkflowError),

    #[error("unable to execute activity: {activity}: {source}")]
    UnableToExecuteActivity {
        activity: &'static str,
        #[source]
        source: WorkflowError,
    },

    #[error("unable to execute child workflow: {workflow}: {source}")]
    UnableToExecuteChildWorkflow {
        workflow: &'static str,
        #[source]
        source: WorkflowError,
    },

    /// A remote failure re-classified at this level, carrying its details.
    #[error("{0}")]
    Application(ApplicationError),

    #[error("reclamation canceled")]
    Canceled,

    #[error(transparent)]
    Workflow(WorkflowError),
}

impl ReclaimError {
    pub(crate) fn activity(activity: &'static str, source: WorkflowError) -> Self {
        if source.is_canceled() {
            return ReclaimError::Canceled;
        }
        ReclaimError::UnableToExecuteActivity { activity, source }
    }

    pub(crate) fn child_workflow(workflow: &'static str, source: WorkflowError) -> Self {
        if source.is_canceled() {
            return ReclaimError::Canceled;
        }
        ReclaimError::UnableToExecuteChildWorkflow { workflow, source }
    }

    /// The application failure this error wraps, at any depth.
    pub fn application_failure(&self) -> Option<&ApplicationError> {
        match self {
            ReclaimError::InvalidParams(failure) | ReclaimError::Application(failure) => {
                Some(failure)
            }
            ReclaimError::UnableToExecuteActivity { source, .. }
            | ReclaimError::UnableToExecuteChildWorkflow { source, .. } => {
                source.application_failure()
            }
            _ => None,
        }
    }

    /// Whether an outer retry policy should try the reclamation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReclaimError::InvalidParams(_) | ReclaimError::Canceled => false,
            ReclaimError::Application(failure) => !failure.is_non_retryable(),
            ReclaimError::UnableToSetUpdateHandler(_) => false,
            _ => true,
        }
    }
}

impl From<WorkflowError> for ReclaimError {
    fn from(error: WorkflowError) -> Self {
        if error.is_canceled() {
            return ReclaimError::Canceled;
        }
        ReclaimError::Workflow(error)
    }
}

/// Failed reclamation with the progress made before the failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ReclaimFailure {
    pub result: ReclaimResourcesResult,
    #[source]
    pub error: ReclaimError,
}

impl ReclaimFailure {
    pub fn new(result: ReclaimResourcesResult, error: ReclaimError) -> Self {
        Self { result, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_sources_collapse_to_canceled() {
        assert_eq!(
            ReclaimError::activity("DeleteNamespaceActivity", WorkflowError::Canceled),
            ReclaimError::Canceled
        );
        assert_eq!(ReclaimError::from(WorkflowError::Canceled), ReclaimError::Canceled);
    }

    #[test]
    fn test_activity_error_names_the_activity() {
        let failure = ApplicationError::retryable("db down", "Unavailable");
        let error = ReclaimError::activity(
            "DeleteNamespaceActivity",
            WorkflowError::ActivityFailed {
                activity_type: "DeleteNamespaceActivity".into(),
                failure: failure.clone(),
            },
        );

        assert!(error
            .to_string()
            .starts_with("unable to execute activity: DeleteNamespaceActivity"));
        assert_eq!(error.application_failure(), Some(&failure));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_residual_error_is_retryable() {
        let error = ReclaimError::Application(
            ApplicationError::retryable("2 left", EXECUTIONS_STILL_EXIST_ERROR_TYPE).with_details(&2u64),
        );
        assert!(error.is_retryable());
        assert_eq!(error.application_failure().and_then(|f| f.details_as::<u64>()), Some(2));
        assert!(!ReclaimError::Canceled.is_retryable());
    }
}
