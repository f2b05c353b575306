//! # durable-engine-testing
//!
//! Testing utilities for durable-engine with in-memory implementations.
//! Provides [`InMemoryEventStore`], [`TestShard`], [`RecordingMetricsHandler`],
//! [`ScriptedNamespaceBackend`] and request builders.

pub mod builders;
pub mod memory_event_store;
pub mod namespace_backend;
pub mod recording_metrics;
pub mod test_shard;

pub use builders::{StartRequestBuilder, history_start_request};
pub use memory_event_store::InMemoryEventStore;
pub use namespace_backend::{BackendCall, ScriptedNamespaceBackend};
pub use recording_metrics::{RecordedMetric, RecordingMetricsHandler};
pub use test_shard::{TestShard, TestShardBuilder};
