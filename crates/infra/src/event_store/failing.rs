use std::sync::atomic::{AtomicU32, Ordering};

use gamify_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use super::InMemoryEventStore;

/// In-memory store that rejects the next `n` appends to one aggregate type
/// with a backend error. Everything else passes through.
#[derive(Debug)]
pub(crate) struct FailingAppends {
    inner: InMemoryEventStore,
    aggregate_type: &'static str,
    remaining: AtomicU32,
}

impl FailingAppends {
    pub(crate) fn new(aggregate_type: &'static str) -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            aggregate_type,
            remaining: AtomicU32::new(0),
        }
    }

    pub(crate) fn fail_next(&self, n: u32) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    /// Failures armed but not yet triggered.
    pub(crate) fn pending_failures(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

impl EventStore for FailingAppends {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let targeted = events.first().is_some_and(|e| e.aggregate_type == self.aggregate_type);
        if targeted
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(EventStoreError::Backend("injected append failure".to_string()));
        }
        self.inner.append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_id)
    }
}
