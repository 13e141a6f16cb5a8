use gamify_core::AggregateId;

use crate::EventEnvelope;

/// Messages that belong to one aggregate stream.
///
/// Workers use this to ignore streams they do not consume (e.g. the points
/// process only cares about `account.monthly` streams) without deserializing
/// the payload.
pub trait StreamScoped {
    fn stream_aggregate_type(&self) -> &str;

    fn stream_aggregate_id(&self) -> AggregateId;
}

impl<E> StreamScoped for EventEnvelope<E> {
    fn stream_aggregate_type(&self) -> &str {
        self.aggregate_type()
    }

    fn stream_aggregate_id(&self) -> AggregateId {
        self.aggregate_id()
    }
}
