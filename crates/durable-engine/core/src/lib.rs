//! # durable-engine-core
//!
//! Durable execution core with no infrastructure dependencies.
//!
//! ## Modules
//!
//! - [`history`]: turns a start request into the initial state of a new run
//!   (validation, timeout overrides, state initialization, version check,
//!   lease binding)
//! - [`workflow`]: replaying workflow runtime with timers, activities, child
//!   workflows, version markers and updates
//! - [`reclaim`]: workflows that reclaim the resources of a deleted namespace
//! - [`event`]: [`HistoryEvent`] and [`EventType`], shared by both paths
//! - [`port`]: [`EventStore`](port::EventStore) and
//!   [`MetricsHandler`](port::MetricsHandler)
//! - [`error`]: crate [`Error`] and remote-call [`ApplicationError`]
//! - [`telemetry`]: tracing subscriber setup and runtime spans
//!
//! ## Usage
//!
//! ```rust,no_run
//! use durable_engine_core::reclaim::{ReclaimResourcesParams, ReclaimResourcesWorkflow};
//! # async fn demo(
//! #     runtime: durable_engine_core::workflow::WorkflowRuntime,
//! #     backend: std::sync::Arc<dyn durable_engine_core::reclaim::NamespaceBackend>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let workflow = std::sync::Arc::new(ReclaimResourcesWorkflow::new(backend));
//! let handle = runtime
//!     .start(workflow, "reclaim/acme", ReclaimResourcesParams::new("ns-1", "acme"))
//!     .await?;
//! let result = handle.result().await?;
//! assert!(result.namespace_deleted);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod history;
pub mod port;
pub mod reclaim;
pub mod telemetry;
pub mod workflow;

pub use error::{ApplicationError, Error, ErrorCategory, ErrorKind, Result};
pub use event::{EventCategory, EventId, EventType, HistoryEvent, InstanceId};
pub use port::{EventStore, EventStoreError, MetricsHandler, NoopMetricsHandler};
pub use workflow::{DurableWorkflow, WorkflowContext, WorkflowError, WorkflowRuntime};
