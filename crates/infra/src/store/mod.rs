//! Transactional storage boundary.
//!
//! Every service operation opens one transaction with [`Store::begin`], performs
//! its reads and writes through the returned [`StoreTx`], and finishes with
//! [`StoreTx::commit`]. Dropping an uncommitted transaction rolls it back, so
//! an error returned with `?` half way through never leaves partial writes.
//!
//! The trait makes no storage assumptions: the in-memory adapter backs tests
//! and dev, the Postgres adapter backs production.

pub mod in_memory;
pub mod postgres;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lotkeeper_core::{BatchId, ExpectedVersion, InspectionId, ProductId, WarehouseId};
use lotkeeper_inventory::{BatchRecord, MovementType, QcStatus, Stock, StockMovement, StockSummary};
use lotkeeper_quality::{
    Defect, InspectionRecord, InspectionStatus, InspectionType, Measurement,
};

pub use in_memory::{InMemoryStore, InMemoryTx};
pub use postgres::{PostgresStore, PostgresTx};

/// Storage operation error.
///
/// These are infrastructure failures, as opposed to domain errors (validation,
/// availability, lifecycle).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write lost a race: stale version or a unique key already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A persisted row could not be mapped back into a domain record.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// Connection, protocol or other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn stale(entity: &str, expected: ExpectedVersion) -> Self {
        StoreError::Conflict(format!(
            "{entity} was modified concurrently (expected version {expected:?})"
        ))
    }
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(100).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// One page of results plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + items.len() as u64;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

/// Filter for inspection listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionFilter {
    pub batch_id: Option<BatchId>,
    pub kind: Option<InspectionType>,
    pub status: Option<InspectionStatus>,
}

impl InspectionFilter {
    pub fn matches(&self, record: &InspectionRecord) -> bool {
        self.batch_id.is_none_or(|id| record.batch_id == id)
            && self.kind.is_none_or(|k| record.kind == k)
            && self.status.is_none_or(|s| record.status == s)
    }
}

/// Filter for movement listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub movement_type: Option<MovementType>,
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.movement_type.is_none_or(|t| movement.movement_type == t)
            && self.product_id.is_none_or(|p| movement.product_id == p)
            && self.warehouse_id.is_none_or(|w| movement.warehouse_id == w)
    }
}

/// Transactional store.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTx;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// An open transaction.
///
/// `load_*_for_update` reads take a row lock held until commit/rollback, so a
/// read-check-write sequence on the same row cannot interleave with another
/// transaction. Version-checked updates fail with [`StoreError::Conflict`]
/// when the row moved on since it was read.
#[async_trait::async_trait]
pub trait StoreTx: Send {
    // Catalog lookups (rows owned by the product/warehouse collaborator).
    async fn product_exists(&mut self, id: ProductId) -> Result<bool, StoreError>;
    async fn warehouse_exists(&mut self, id: WarehouseId) -> Result<bool, StoreError>;

    /// Increment and return the counter for `(prefix, day)`, starting at 1.
    async fn next_sequence(&mut self, prefix: &str, day: NaiveDate) -> Result<u32, StoreError>;

    // Batches.
    async fn insert_batch(&mut self, batch: &BatchRecord) -> Result<(), StoreError>;
    async fn load_batch(&mut self, id: BatchId) -> Result<Option<BatchRecord>, StoreError>;
    async fn load_batch_for_update(
        &mut self,
        id: BatchId,
    ) -> Result<Option<BatchRecord>, StoreError>;
    async fn update_batch(
        &mut self,
        batch: &BatchRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;
    /// Batches of one product in creation order.
    async fn batches_for_product(
        &mut self,
        product_id: ProductId,
        qc_status: Option<QcStatus>,
        active_only: bool,
    ) -> Result<Vec<BatchRecord>, StoreError>;
    /// Active, QC-passed batches of one product with quantity left, locked
    /// against other writers until the transaction ends.
    async fn lock_exportable_batches(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<BatchRecord>, StoreError>;

    // Stock.
    /// Lock the `(warehouse, product)` row. Stores may create it at zero
    /// first so concurrent first receipts queue on the same lock.
    async fn load_stock_for_update(
        &mut self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Option<Stock>, StoreError>;
    /// Insert the row or overwrite its quantity.
    async fn save_stock(&mut self, stock: &Stock) -> Result<(), StoreError>;
    /// Subtract `quantity` only if at least that much is on hand.
    ///
    /// Returns the new quantity, or `None` when the row is missing or short.
    async fn decrement_stock(
        &mut self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        quantity: i64,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<i64>, StoreError>;
    async fn stock_summary(
        &mut self,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockSummary>, StoreError>;

    // Movement ledger.
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;
    /// Newest first.
    async fn list_movements(
        &mut self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError>;

    // Inspections.
    async fn insert_inspection(&mut self, record: &InspectionRecord) -> Result<(), StoreError>;
    async fn load_inspection(
        &mut self,
        id: InspectionId,
    ) -> Result<Option<InspectionRecord>, StoreError>;
    async fn load_inspection_for_update(
        &mut self,
        id: InspectionId,
    ) -> Result<Option<InspectionRecord>, StoreError>;
    async fn update_inspection(
        &mut self,
        record: &InspectionRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;
    async fn insert_defects(&mut self, defects: &[Defect]) -> Result<(), StoreError>;
    async fn insert_measurements(&mut self, measurements: &[Measurement]) -> Result<(), StoreError>;
    /// Defects of one inspection in recording order.
    async fn defects_for(&mut self, id: InspectionId) -> Result<Vec<Defect>, StoreError>;
    /// Measurements of one inspection in recording order.
    async fn measurements_for(&mut self, id: InspectionId)
    -> Result<Vec<Measurement>, StoreError>;
    /// Newest `started_at` first.
    async fn list_inspections(
        &mut self,
        filter: &InspectionFilter,
    ) -> Result<Vec<InspectionRecord>, StoreError>;

    /// Make every write of this transaction visible atomically.
    async fn commit(self) -> Result<(), StoreError>;
}
