//! Workflow-as-code traits.
//!
//! A [`DurableWorkflow`] is ordinary async Rust. Every effect it has on the
//! outside world goes through the [`WorkflowContext`], which records the
//! effect in history the first time and replays the recorded result on
//! every later execution of the same instance.
//!
//! # Example
//!
//! ```rust
//! use durable_engine_core::workflow::{DurableWorkflow, WorkflowContext};
//! use std::time::Duration;
//!
//! struct Reminder;
//!
//! #[async_trait::async_trait]
//! impl DurableWorkflow for Reminder {
//!     const TYPE_ID: &'static str = "reminder";
//!
//!     type Input = String;
//!     type Output = String;
//!     type Error = durable_engine_core::workflow::WorkflowError;
//!
//!     async fn run(
//!         &self,
//!         ctx: &mut WorkflowContext,
//!         input: Self::Input,
//!     ) -> Result<Self::Output, Self::Error> {
//!         ctx.sleep(Duration::from_secs(60)).await?;
//!         Ok(format!("remember: {input}"))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::ApplicationError;
use crate::workflow::WorkflowContext;

/// Error type recorded when a workflow error has no better classification.
pub const WORKFLOW_FAILED_ERROR_TYPE: &str = "WorkflowFailed";

/// A workflow defined as Rust code.
///
/// # Execution Model
///
/// 1. The runtime calls `run(ctx, input)`
/// 2. Each `ctx` operation either replays its recorded outcome or performs
///    the effect and appends the outcome to history
/// 3. After a crash the runtime calls `run()` again on the same history;
///    replayed operations return immediately until the code reaches the end
///    of history, where execution continues live
///
/// Workflow code must therefore be deterministic: the same history must
/// lead to the same sequence of `ctx` calls.
#[async_trait]
pub trait DurableWorkflow: Send + Sync + 'static {
    /// Unique identifier for this workflow type.
    const TYPE_ID: &'static str;

    /// Version of this workflow definition, recorded in the start event.
    const VERSION: u32 = 1;

    /// Input, persisted in the start event.
    type Input: Serialize + DeserializeOwned + Send + Sync + Clone + Debug + 'static;

    /// Output, persisted in the completion event.
    type Output: Serialize + DeserializeOwned + Send + Sync + Clone + Debug + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Main workflow method.
    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        input: Self::Input,
    ) -> Result<Self::Output, Self::Error>;

    /// Failure written to history when `run` returns `error`.
    ///
    /// Parents and retry policies only see this value.
    fn failure(error: &Self::Error) -> ApplicationError {
        ApplicationError::retryable(error.to_string(), WORKFLOW_FAILED_ERROR_TYPE)
    }
}

/// A unit of side-effecting work invoked from workflow code.
///
/// Activities run at least once; the runtime records their outcome so a
/// completed activity is never executed again for the same instance.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Unique identifier for this activity type.
    const TYPE_ID: &'static str;

    type Input: Serialize + DeserializeOwned + Send + Sync + Clone + Debug + 'static;

    type Output: Serialize + DeserializeOwned + Send + Sync + Clone + Debug + 'static;

    /// Run one attempt.
    async fn execute(&self, input: Self::Input) -> Result<Self::Output, ApplicationError>;
}
