//! # Workflow runtime
//!
//! Workflow-as-code on top of an append-only history: durable timers,
//! activities with retries, child workflows, version markers and
//! validated updates, all replayed deterministically after a crash.

pub mod context;
pub mod durable;
pub mod error;
pub mod options;
pub mod registry;
pub mod runtime;
pub mod update;

pub use context::{WorkflowContext, CHILD_WORKFLOW_ALREADY_STARTED_ERROR_TYPE};
pub use durable::{Activity, DurableWorkflow, WORKFLOW_FAILED_ERROR_TYPE};
pub use error::{UpdateError, WorkflowError, WorkflowRunError};
pub use options::{
    ActivityOptions, ChildWorkflowOptions, LocalActivityOptions, RetryPolicy,
    START_TO_CLOSE_TIMEOUT_ERROR_TYPE,
};
pub use registry::{DynDurableWorkflow, WorkflowRegistry};
pub use runtime::{WorkflowHandle, WorkflowRuntime, WorkflowRuntimeConfig, DEFAULT_UPDATE_BUFFER};
pub use update::{
    InstanceLocals, TimerId, TimerOutcome, TimerTable, UpdateHandler, UpdateRequest, UpdateScope,
};

/// Version returned by [`WorkflowContext::get_version`] when replaying
/// history recorded before the change existed.
pub const DEFAULT_VERSION: i32 = -1;
