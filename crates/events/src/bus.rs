//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes committed envelopes to consumers such as the points
//! process. It is **not** the source of truth: the event log is. Events are
//! appended first and published second, so a failed publish never loses data.
//!
//! Delivery is **at-least-once** and possibly duplicated; every consumer must
//! be idempotent with respect to `(aggregate_id, sequence_number)`.
//!
//! ## Delivery Model
//!
//! - **Broadcast**: every subscription receives its own copy of each message
//! - **Per-publisher order**: one publisher's messages arrive in publish order;
//!   concurrent publishers interleave arbitrarily
//! - **No persistence**: a subscriber that is not attached misses messages and
//!   must recover from the event log
//!
//! ## Consumers
//!
//! A consumer that fails on a message must not assume the next message will
//! retry it. The points process handles this by replaying every unconsumed
//! event of the stream before the one delivered.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to the bus (broadcast: every subscriber sees every message).
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(envelope) => process(envelope)?,
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Intended for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic pub/sub bus.
///
/// ```text
/// Command → Event log (append) → Bus (publish) → Points process / other readers
/// ```
///
/// The event log is already durable when `publish()` runs, so a failed publish
/// loses nothing: consumers catch up from the log.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
