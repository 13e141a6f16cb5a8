//! Append-only event log.
//!
//! One ordered stream per aggregate identity, appended with an optimistic
//! version check and replayed in sequence order.

#[cfg(test)]
pub(crate) mod failing;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
