use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use lotkeeper_core::{BatchId, ExpectedVersion, InspectionId, ProductId, WarehouseId, children_of};
use lotkeeper_inventory::{BatchRecord, QcStatus, Stock, StockMovement, StockSummary, summarize};
use lotkeeper_quality::{Defect, InspectionRecord, Measurement};

use super::{
    InspectionFilter, MovementFilter, Page, Pagination, Store, StoreError, StoreTx,
};

#[derive(Debug, Clone, Default)]
struct State {
    products: HashSet<ProductId>,
    warehouses: HashSet<WarehouseId>,
    counters: HashMap<(String, NaiveDate), u32>,

    // Insertion order doubles as creation order.
    batches: Vec<BatchRecord>,
    batch_index: HashMap<BatchId, usize>,

    stocks: HashMap<(WarehouseId, ProductId), Stock>,
    movements: Vec<StockMovement>,

    inspections: Vec<InspectionRecord>,
    inspection_index: HashMap<InspectionId, usize>,
    defects: Vec<Defect>,
    measurements: Vec<Measurement>,

    // Batches whose writes fail with a version conflict.
    #[cfg(test)]
    frozen_batches: HashSet<BatchId>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. A single async mutex serialises transactions; each
/// transaction works on a private copy of the state that replaces the shared
/// one on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a product known to the catalog lookup.
    pub async fn register_product(&self, id: ProductId) {
        self.state.lock().await.products.insert(id);
    }

    /// Make a warehouse known to the catalog lookup.
    pub async fn register_warehouse(&self, id: WarehouseId) {
        self.state.lock().await.warehouses.insert(id);
    }

    /// Fail every later write to batch `id` as a concurrent modification.
    #[cfg(test)]
    pub(crate) async fn freeze_batch(&self, id: BatchId) {
        self.state.lock().await.frozen_batches.insert(id);
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let work = (*guard).clone();
        Ok(InMemoryTx { guard, work })
    }
}

/// Transaction over [`InMemoryStore`]; holds the store lock until dropped.
#[derive(Debug)]
pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

impl InMemoryTx {
    fn batch_mut(&mut self, id: BatchId) -> Option<&mut BatchRecord> {
        let idx = *self.work.batch_index.get(&id)?;
        self.work.batches.get_mut(idx)
    }

    #[cfg(test)]
    fn is_frozen(&self, id: BatchId) -> bool {
        self.work.frozen_batches.contains(&id)
    }

    #[cfg(not(test))]
    fn is_frozen(&self, _id: BatchId) -> bool {
        false
    }

    fn inspection_mut(&mut self, id: InspectionId) -> Option<&mut InspectionRecord> {
        let idx = *self.work.inspection_index.get(&id)?;
        self.work.inspections.get_mut(idx)
    }
}

#[async_trait::async_trait]
impl StoreTx for InMemoryTx {
    async fn product_exists(&mut self, id: ProductId) -> Result<bool, StoreError> {
        Ok(self.work.products.contains(&id))
    }

    async fn warehouse_exists(&mut self, id: WarehouseId) -> Result<bool, StoreError> {
        Ok(self.work.warehouses.contains(&id))
    }

    async fn next_sequence(&mut self, prefix: &str, day: NaiveDate) -> Result<u32, StoreError> {
        let counter = self
            .work
            .counters
            .entry((prefix.to_string(), day))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_batch(&mut self, batch: &BatchRecord) -> Result<(), StoreError> {
        if self.work.batch_index.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!("batch {} already exists", batch.id)));
        }
        if self
            .work
            .batches
            .iter()
            .any(|b| b.batch_number == batch.batch_number)
        {
            return Err(StoreError::Conflict(format!(
                "batch number {} already taken",
                batch.batch_number
            )));
        }
        self.work
            .batch_index
            .insert(batch.id, self.work.batches.len());
        self.work.batches.push(batch.clone());
        Ok(())
    }

    async fn load_batch(&mut self, id: BatchId) -> Result<Option<BatchRecord>, StoreError> {
        Ok(self.batch_mut(id).map(|b| b.clone()))
    }

    async fn load_batch_for_update(
        &mut self,
        id: BatchId,
    ) -> Result<Option<BatchRecord>, StoreError> {
        // The transaction already holds the store lock.
        self.load_batch(id).await
    }

    async fn update_batch(
        &mut self,
        batch: &BatchRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        if self.is_frozen(batch.id) {
            return Err(StoreError::stale("batch", expected));
        }
        let current = self
            .batch_mut(batch.id)
            .ok_or_else(|| StoreError::Conflict(format!("batch {} vanished", batch.id)))?;
        if !expected.matches(current.version) {
            return Err(StoreError::stale("batch", expected));
        }
        *current = batch.clone();
        Ok(())
    }

    async fn batches_for_product(
        &mut self,
        product_id: ProductId,
        qc_status: Option<QcStatus>,
        active_only: bool,
    ) -> Result<Vec<BatchRecord>, StoreError> {
        Ok(self
            .work
            .batches
            .iter()
            .filter(|b| b.product_id == product_id)
            .filter(|b| qc_status.is_none_or(|s| b.qc_status == s))
            .filter(|b| !active_only || b.is_active)
            .cloned()
            .collect())
    }

    async fn lock_exportable_batches(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<BatchRecord>, StoreError> {
        Ok(self
            .work
            .batches
            .iter()
            .filter(|b| b.product_id == product_id && b.is_exportable())
            .cloned()
            .collect())
    }

    async fn load_stock_for_update(
        &mut self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Option<Stock>, StoreError> {
        Ok(self.work.stocks.get(&(warehouse_id, product_id)).cloned())
    }

    async fn save_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        self.work
            .stocks
            .insert((stock.warehouse_id, stock.product_id), stock.clone());
        Ok(())
    }

    async fn decrement_stock(
        &mut self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let Some(stock) = self.work.stocks.get_mut(&(warehouse_id, product_id)) else {
            return Ok(None);
        };
        if stock.quantity < quantity {
            return Ok(None);
        }
        stock.quantity -= quantity;
        stock.updated_at = at;
        Ok(Some(stock.quantity))
    }

    async fn stock_summary(
        &mut self,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockSummary>, StoreError> {
        Ok(summarize(
            self.work
                .stocks
                .values()
                .filter(|s| product_id.is_none_or(|p| s.product_id == p)),
        ))
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        if self
            .work
            .movements
            .iter()
            .any(|m| m.movement_number == movement.movement_number)
        {
            return Err(StoreError::Conflict(format!(
                "movement number {} already taken",
                movement.movement_number
            )));
        }
        self.work.movements.push(movement.clone());
        Ok(())
    }

    async fn list_movements(
        &mut self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError> {
        let matching: Vec<&StockMovement> = self
            .work
            .movements
            .iter()
            .rev()
            .filter(|m| filter.matches(m))
            .collect();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    async fn insert_inspection(&mut self, record: &InspectionRecord) -> Result<(), StoreError> {
        if self.work.inspection_index.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!(
                "inspection {} already exists",
                record.id
            )));
        }
        self.work
            .inspection_index
            .insert(record.id, self.work.inspections.len());
        self.work.inspections.push(record.clone());
        Ok(())
    }

    async fn load_inspection(
        &mut self,
        id: InspectionId,
    ) -> Result<Option<InspectionRecord>, StoreError> {
        Ok(self.inspection_mut(id).map(|r| r.clone()))
    }

    async fn load_inspection_for_update(
        &mut self,
        id: InspectionId,
    ) -> Result<Option<InspectionRecord>, StoreError> {
        self.load_inspection(id).await
    }

    async fn update_inspection(
        &mut self,
        record: &InspectionRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self.inspection_mut(record.id).ok_or_else(|| {
            StoreError::Conflict(format!("inspection {} vanished", record.id))
        })?;
        if !expected.matches(current.version) {
            return Err(StoreError::stale("inspection", expected));
        }
        *current = record.clone();
        Ok(())
    }

    async fn insert_defects(&mut self, defects: &[Defect]) -> Result<(), StoreError> {
        self.work.defects.extend_from_slice(defects);
        Ok(())
    }

    async fn insert_measurements(
        &mut self,
        measurements: &[Measurement],
    ) -> Result<(), StoreError> {
        self.work.measurements.extend_from_slice(measurements);
        Ok(())
    }

    async fn defects_for(&mut self, id: InspectionId) -> Result<Vec<Defect>, StoreError> {
        Ok(children_of(&self.work.defects, id).cloned().collect())
    }

    async fn measurements_for(
        &mut self,
        id: InspectionId,
    ) -> Result<Vec<Measurement>, StoreError> {
        Ok(children_of(&self.work.measurements, id).cloned().collect())
    }

    async fn list_inspections(
        &mut self,
        filter: &InspectionFilter,
    ) -> Result<Vec<InspectionRecord>, StoreError> {
        let mut out: Vec<InspectionRecord> = self
            .work
            .inspections
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // Stable: equal timestamps keep the later-created one first.
        out.reverse();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}
