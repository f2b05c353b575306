//! Ports for durable-engine infrastructure adapters.
//!
//! The trait abstractions the engine uses to reach storage and metrics
//! backends. Each port can have multiple implementations (in-memory,
//! Prometheus, mocks).

pub mod event_store;
pub mod metrics;

pub use event_store::{EventStore, EventStoreError};
pub use metrics::{MetricsHandler, NoopMetricsHandler, ReplayAwareMetrics};
