//! Results of committed operations and the envelopes they publish.

use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use lotkeeper_events::{Event, EventEnvelope};

pub const INSPECTION_AGGREGATE: &str = "quality.inspection";
pub const BATCH_AGGREGATE: &str = "inventory.batch";
pub const MOVEMENT_AGGREGATE: &str = "inventory.stock_movement";

/// The value an operation produced plus the envelopes of the domain events it
/// committed, in commit order. Publishing is left to the caller so that it
/// only happens once the transaction is durable.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<EventEnvelope<JsonValue>>,
}

impl<T> Committed<T> {
    pub fn new(value: T, events: Vec<EventEnvelope<JsonValue>>) -> Self {
        Self { value, events }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Committed<U> {
        Committed {
            value: f(self.value),
            events: self.events,
        }
    }

    pub fn into_parts(self) -> (T, Vec<EventEnvelope<JsonValue>>) {
        (self.value, self.events)
    }
}

/// Wrap events just applied to an aggregate that was at `version_before`.
///
/// Sequence numbers continue the aggregate's version: the first event gets
/// `version_before + 1`.
pub(crate) fn envelopes<E>(
    aggregate_id: Uuid,
    aggregate_type: &str,
    version_before: u64,
    events: &[E],
) -> Result<Vec<EventEnvelope<JsonValue>>, serde_json::Error>
where
    E: Event + Serialize,
{
    events
        .iter()
        .zip(version_before + 1..)
        .map(|(event, seq)| EventEnvelope::from_typed(aggregate_id, aggregate_type, seq, event))
        .collect()
}
