//! # Namespace reclamation
//!
//! The workflows that release everything a deleted namespace still holds.
//! [`ReclaimResourcesWorkflow`] is the entry point; it drives
//! [`DeleteExecutionsWorkflow`] as a child and reaches storage and
//! visibility only through the [`NamespaceBackend`] port.

pub mod activities;
pub mod delay;
pub mod delete_executions;
pub mod errors;
pub mod params;
pub mod workflow;

pub use activities::{
    CountExecutionsActivity, DeleteExecutionsPageActivity, DeleteExecutionsPageRequest,
    DeleteExecutionsPageResult, DeleteNamespaceActivity, EnsureNoExecutionsActivity,
    EnsureNoExecutionsInput, IsAdvancedVisibilityActivity, NamespaceBackend, NamespaceRef,
};
pub use delay::{
    namespace_delete_delay_handler, validate_namespace_delete_delay, NamespaceDeleteDelay,
    MAX_NAMESPACE_DELETE_DELAY, UPDATE_NAMESPACE_DELETE_DELAY,
};
pub use delete_executions::DeleteExecutionsWorkflow;
pub use errors::{
    ReclaimError, ReclaimFailure, EXECUTIONS_STILL_EXIST_ERROR_TYPE, NOT_DELETED_EXECUTIONS_STILL_EXIST_ERROR_TYPE,
    NO_PROGRESS_ERROR_TYPE, RESIDUAL_EXECUTIONS_ERROR_TYPES, VALIDATION_ERROR_TYPE,
};
pub use params::{
    DeleteExecutionsConfig, DeleteExecutionsParams, DeleteExecutionsResult, ReclaimResourcesParams,
    ReclaimResourcesResult, DEFAULT_DELETE_ACTIVITY_RPS, DEFAULT_PAGE_SIZE,
};
pub use workflow::{
    ReclaimOptions, ReclaimResourcesWorkflow, DELETE_NAMESPACE_ACTIVITY_TASK_QUEUE,
    REMOVE_STANDARD_VISIBILITY_CHANGE_ID,
};
