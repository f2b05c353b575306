//! EventStore port trait definition.
//!
//! This module defines the [`EventStore`] trait that backends must implement
//! to persist execution histories.

use crate::event::{FIRST_EVENT_ID, HistoryEvent, InstanceId};
use async_trait::async_trait;

/// Errors that can occur when operating on the event store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventStoreError {
    /// Optimistic locking detected a concurrent writer.
    #[error("Conflict: expected next event_id {expected}, but current is {actual}")]
    Conflict {
        /// The event ID the writer expected to be next.
        expected: u64,
        /// The actual next event ID.
        actual: u64,
    },

    /// The requested history was not found.
    #[error("Instance not found: {instance_id}")]
    NotFound { instance_id: InstanceId },

    /// Backend-specific error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl EventStoreError {
    /// Create a conflict error.
    pub fn conflict(expected: u64, actual: u64) -> Self {
        Self::Conflict { expected, actual }
    }

    /// Create a not found error.
    pub fn not_found(instance_id: InstanceId) -> Self {
        Self::NotFound { instance_id }
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Append-only storage of execution histories.
///
/// # Concurrency Model
///
/// Implementations use optimistic locking:
/// 1. `append_events` requires `expected_next_event_id`
/// 2. If the history's next event id differs, return `EventStoreError::Conflict`
/// 3. Nothing from a rejected batch is stored
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events atomically.
    ///
    /// Returns the next event id after the batch.
    async fn append_events(
        &self,
        instance_id: &InstanceId,
        expected_next_event_id: u64,
        events: &[HistoryEvent],
    ) -> Result<u64, EventStoreError>;

    /// Append a single event.
    async fn append_event(
        &self,
        instance_id: &InstanceId,
        expected_next_event_id: u64,
        event: &HistoryEvent,
    ) -> Result<u64, EventStoreError> {
        self.append_events(instance_id, expected_next_event_id, std::slice::from_ref(event))
            .await
    }

    /// The full history in order. Empty when the instance has no events.
    async fn get_history(&self, instance_id: &InstanceId) -> Result<Vec<HistoryEvent>, EventStoreError>;

    /// The id the next appended event must carry.
    async fn get_next_event_id(&self, instance_id: &InstanceId) -> Result<u64, EventStoreError> {
        let history = self.get_history(instance_id).await?;
        Ok(history
            .last()
            .map(|event| event.event_id.0 + 1)
            .unwrap_or(FIRST_EVENT_ID))
    }

    /// `true` if the instance has any events.
    async fn instance_exists(&self, instance_id: &InstanceId) -> Result<bool, EventStoreError> {
        Ok(!self.get_history(instance_id).await?.is_empty())
    }
}
