//! Command execution pipeline for event-sourced aggregates.
//!
//! Every write in the system (players, registry, roster, monthly accounts and
//! the points `Collection`) goes through `CommandDispatcher::dispatch`, so the
//! load, version check and publish rules live in one place.
//!
//! ## Command Execution Flow
//!
//! ```text
//! Command
//!   ↓
//! 0. Enter the critical section for the target aggregate id
//!   ↓
//! 1. Load the stream and validate it (right id, monotonic sequence)
//!   ↓
//! 2. Rehydrate (fold historical events through `Aggregate::apply`)
//!   ↓
//! 3. Handle (pure decision, produces events)
//!   ↓
//! 4. Append with `ExpectedVersion::Exact(loaded version)`
//!      └─ version conflict → reload and retry (bounded)
//!   ↓
//! 5. Publish committed envelopes on the bus
//! ```
//!
//! ## Concurrency
//!
//! - Commands for the same aggregate id run one at a time (per-id mutex)
//! - Commands for different ids run fully in parallel
//! - The optimistic check in step 4 still guards against writers outside this
//!   process; a conflict reloads and re-decides up to
//!   `max_conflict_retries` times before surfacing as `DispatchError::Concurrency`
//!
//! ## Failure Handling
//!
//! - **Domain rejection**: `DispatchError::Domain`, nothing is written
//! - **Store failure**: `DispatchError::Store`, nothing is written
//! - **Corrupt history**: `DispatchError::InvalidStream` / `Deserialize`
//! - **Publish failure**: logged only; the events are already durable and
//!   consumers recover from the log
//!
//! ## Reads
//!
//! `load` and `load_until` rehydrate an aggregate without deciding anything,
//! for queries and for consumers that need state as of a given sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use gamify_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion};
use gamify_events::{Command, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Default number of reload-and-retry rounds after a version conflict.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure that survived every retry.
    #[error("version conflict: {0}")]
    Concurrency(String),

    /// The aggregate rejected the command (deterministic).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A stored payload does not decode into the aggregate's event enum
    /// (unknown event kind or schema drift).
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// The store returned a stream that breaks its own contract.
    #[error("invalid stream: {0}")]
    InvalidStream(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// `S` is any `EventStore`, `B` any bus carrying JSON envelopes; tests use the
/// in-memory implementations of both.
///
/// A publish failure after a successful append is logged, not returned: the
/// events are durable and the points process can catch up from the log.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
    max_conflict_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            locks: Mutex::new(HashMap::new()),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn stream_lock(&self, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        // The map only hands out lock handles, so a poisoned map is still usable.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(aggregate_id).or_default())
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// `make_aggregate` builds the empty instance to fold history into; its id
    /// must equal the command's target id. Returns the committed events, which
    /// is empty when the aggregate accepted the command without changes.
    pub fn dispatch<A>(
        &self,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn() -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + AggregateRoot<Id = AggregateId>,
        A::Command: Command,
        A::Event: gamify_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_id = command.target_aggregate_id();
        let lock = self.stream_lock(aggregate_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut attempt = 0;
        loop {
            match self.try_dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(DispatchError::Concurrency(msg)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempt,
                        reason = %msg,
                        "version conflict, reloading and retrying"
                    );
                }
                other => return other,
            }
        }
    }

    fn try_dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn() -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + AggregateRoot<Id = AggregateId>,
        A::Event: gamify_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate
        let mut aggregate = make_aggregate();
        if *aggregate.id() != aggregate_id {
            return Err(DispatchError::InvalidStream(format!(
                "aggregate factory produced {} for command targeting {aggregate_id}",
                aggregate.id()
            )));
        }
        apply_history(&mut aggregate, &history)?;

        // 3) Decide
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            debug!(aggregate_id = %aggregate_id, aggregate_type, "command produced no events");
            return Ok(vec![]);
        }

        // 4) Persist
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        debug!(
            aggregate_id = %aggregate_id,
            aggregate_type,
            events = committed.len(),
            version = committed.last().map(|e| e.sequence_number).unwrap_or(0),
            "events appended"
        );

        // 5) Publish
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    aggregate_id = %aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "publish failed after append"
                );
            }
        }

        Ok(committed)
    }

    /// Rehydrate an aggregate. `None` when its stream is empty.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<Option<(A, u64)>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.load_until(aggregate_id, u64::MAX, make_aggregate)
    }

    /// Rehydrate an aggregate from the events with `sequence_number <= until`.
    pub fn load_until<A>(
        &self,
        aggregate_id: AggregateId,
        until: u64,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<Option<(A, u64)>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let mut history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        history.retain(|e| e.sequence_number <= until);

        if history.is_empty() {
            return Ok(None);
        }

        let mut aggregate = make_aggregate();
        apply_history(&mut aggregate, &history)?;
        Ok(Some((aggregate, stream_version(&history))))
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::InvalidStream(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::InvalidStream(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            DispatchError::Deserialize(format!(
                "{} #{} ({}): {e}",
                stored.aggregate_id, stored.sequence_number, stored.event_type
            ))
        })?;
        aggregate.apply(&ev);
    }

    Ok(())
}
