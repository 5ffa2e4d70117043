//! Infrastructure layer: transactional stores, the quality and inventory
//! components built on them, configuration and the caller-facing service.

pub mod committed;
pub mod config;
pub mod error;
pub mod inspections;
pub mod ledger;
pub mod movements;
pub mod services;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use committed::Committed;
pub use config::{ConfigError, InfraConfig, StorageConfig};
pub use error::{ServiceError, ServiceResult};
pub use inspections::{InspectionRegistry, NewInspection};
pub use ledger::{BatchLedger, NewBatch};
pub use movements::StockMovementEngine;
pub use services::QualityInventoryService;
pub use store::{
    InMemoryStore, InspectionFilter, MovementFilter, Page, Pagination, PostgresStore, Store,
    StoreError, StoreTx,
};
