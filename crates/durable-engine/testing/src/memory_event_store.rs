//! In-memory implementation of EventStore for testing.
//!
//! Thread-safe, with the same optimistic concurrency rules as a real
//! backend, plus failure injection for crash and outage scenarios.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use durable_engine_core::event::{FIRST_EVENT_ID, HistoryEvent, InstanceId};
use durable_engine_core::port::event_store::{EventStore, EventStoreError};

/// In-memory event store implementation.
///
/// # Example
///
/// ```rust
/// use durable_engine_core::event::{EventId, EventType, HistoryEvent, InstanceId};
/// use durable_engine_core::port::EventStore;
/// use durable_engine_testing::InMemoryEventStore;
///
/// # tokio_test_block_on(async {
/// let store = InMemoryEventStore::new();
/// let id = InstanceId::new("wf-1");
/// let event = HistoryEvent::new(
///     EventId(1),
///     id.clone(),
///     EventType::WorkflowExecutionStarted,
///     serde_json::json!({}),
/// );
/// assert_eq!(store.append_event(&id, 1, &event).await.unwrap(), 2);
/// assert_eq!(store.get_history(&id).await.unwrap().len(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    histories: RwLock<HashMap<InstanceId, Vec<HistoryEvent>>>,

    /// Appends still to reject with a backend error.
    failing_appends: AtomicUsize,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one history.
    pub fn with_history(instance_id: InstanceId, events: Vec<HistoryEvent>) -> Self {
        let store = Self::new();
        store.histories.write().insert(instance_id, events);
        store
    }

    /// Reject the next `count` appends with a backend error.
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Synchronous snapshot of one history.
    pub fn history(&self, instance_id: &InstanceId) -> Vec<HistoryEvent> {
        self.histories
            .read()
            .get(instance_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of every stored history.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.histories.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get the total number of events stored.
    pub fn event_count(&self) -> usize {
        self.histories.read().values().map(Vec::len).sum()
    }

    /// Clear all data.
    pub fn clear(&self) {
        self.histories.write().clear();
    }

    fn take_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_events(
        &self,
        instance_id: &InstanceId,
        expected_next_event_id: u64,
        events: &[HistoryEvent],
    ) -> Result<u64, EventStoreError> {
        if self.take_failure() {
            return Err(EventStoreError::Backend("injected append failure".to_string()));
        }

        let mut histories = self.histories.write();
        let history = histories.entry(instance_id.clone()).or_default();
        let next = history
            .last()
            .map(|event| event.event_id.0 + 1)
            .unwrap_or(FIRST_EVENT_ID);
        if next != expected_next_event_id {
            return Err(EventStoreError::conflict(expected_next_event_id, next));
        }
        for (offset, event) in events.iter().enumerate() {
            let expected = next + offset as u64;
            if event.event_id.0 != expected {
                return Err(EventStoreError::conflict(expected, event.event_id.0));
            }
        }

        history.extend_from_slice(events);
        Ok(next + events.len() as u64)
    }

    async fn get_history(&self, instance_id: &InstanceId) -> Result<Vec<HistoryEvent>, EventStoreError> {
        Ok(self.history(instance_id))
    }
}
