//! Domain events and their distribution.
//!
//! Aggregates in the quality and inventory modules emit typed events that
//! implement [`Event`]. The application layer persists the resulting state,
//! commits, and then publishes the events wrapped in an [`EventEnvelope`] on an
//! [`EventBus`] for downstream consumers.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
