//! `lotkeeper-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the quality and
//! inventory modules (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
mod macros;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::{Entity, children_of};
pub use error::{DomainError, DomainResult};
pub use id::{
    ActorId, BatchId, DefectId, InspectionId, MeasurementId, MovementId, ProductId, WarehouseId,
};
