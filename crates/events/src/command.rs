use gamify_core::AggregateId;

/// A command targets exactly one aggregate.
///
/// Commands are **intent** ("record 500 collected on the 5th"); events are the
/// facts an aggregate emits once it accepts that intent. Commands are
/// transient and never persisted.
///
/// The target id is derived from the command's natural key, which lets the
/// runtime route it and serialize it against other commands for the same
/// aggregate while commands for different aggregates run in parallel.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
