//! StockMovementEngine: imports and exports against warehouse stock and batches.
//!
//! Each movement is one transaction covering the counter bump, the stock row,
//! the batch quantity and the ledger row. The stock row is read under a lock
//! and the decrement is conditional on the quantity still being there, so two
//! exporters racing on the same (warehouse, product) can never overdraw it.
//! Exports without a named batch lock every FEFO candidate of the product
//! before picking, so exporters in different warehouses do not both settle on
//! the same earliest batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use lotkeeper_core::{BatchId, Clock, DomainError, MovementId, ProductId, SystemClock};
use lotkeeper_events::EventEnvelope;
use lotkeeper_inventory::{
    BatchRecord, MovementRequest, MovementType, Stock, StockMovement, StockMoved, StockSummary,
    movement_number,
};

use crate::committed::{MOVEMENT_AGGREGATE, Committed, envelopes};
use crate::error::ServiceResult;
use crate::ledger;
use crate::store::{MovementFilter, Page, Pagination, Store, StoreTx};

async fn ensure_catalog<T>(tx: &mut T, request: &MovementRequest) -> ServiceResult<()>
where
    T: StoreTx + ?Sized,
{
    if !tx.product_exists(request.product_id).await? {
        return Err(DomainError::not_found("product", request.product_id).into());
    }
    if !tx.warehouse_exists(request.warehouse_id).await? {
        return Err(DomainError::not_found("warehouse", request.warehouse_id).into());
    }
    Ok(())
}

/// Lock a caller-named batch and check it belongs to the moved product.
async fn named_batch<T>(
    tx: &mut T,
    id: BatchId,
    product_id: ProductId,
) -> ServiceResult<BatchRecord>
where
    T: StoreTx + ?Sized,
{
    let batch = tx
        .load_batch_for_update(id)
        .await?
        .ok_or_else(|| DomainError::not_found("batch", id))?;
    if batch.product_id != product_id {
        return Err(DomainError::validation(format!(
            "batch {} belongs to product {}, not {product_id}",
            batch.batch_number, batch.product_id
        ))
        .into());
    }
    Ok(batch)
}

async fn next_number<T>(
    tx: &mut T,
    kind: MovementType,
    now: DateTime<Utc>,
) -> ServiceResult<String>
where
    T: StoreTx + ?Sized,
{
    let day = now.date_naive();
    let seq = tx.next_sequence(kind.prefix(), day).await?;
    Ok(movement_number(kind, day, seq))
}

/// Write the ledger row and wrap the `StockMoved` event.
async fn record<T>(
    tx: &mut T,
    movement: &StockMovement,
    stock_after: i64,
) -> ServiceResult<EventEnvelope<JsonValue>>
where
    T: StoreTx + ?Sized,
{
    tx.insert_movement(movement).await?;
    let event = StockMoved {
        movement: movement.clone(),
        stock_after,
    };
    let mut envs = envelopes(*movement.id.as_uuid(), MOVEMENT_AGGREGATE, 0, &[event])?;
    envs.pop()
        .ok_or_else(|| DomainError::invariant("movement produced no event").into())
}

/// Moves stock in and out of warehouses.
pub struct StockMovementEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: Clone> Clone for StockMovementEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> StockMovementEngine<S>
where
    S: Store,
{
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Receive stock into a warehouse, optionally topping up a batch.
    #[instrument(
        skip(self, request),
        fields(
            product_id = %request.product_id,
            warehouse_id = %request.warehouse_id,
            qty = request.quantity
        ),
        err
    )]
    pub async fn import(&self, request: MovementRequest) -> ServiceResult<Committed<StockMovement>> {
        request.validate()?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        ensure_catalog(&mut tx, &request).await?;

        // Stock row before batch row, the same order export takes them in.
        let mut stock = tx
            .load_stock_for_update(request.warehouse_id, request.product_id)
            .await?
            .unwrap_or_else(|| Stock::empty(request.warehouse_id, request.product_id, now));
        if let Some(batch_id) = request.batch_id {
            named_batch(&mut tx, batch_id, request.product_id).await?;
        }
        stock.receive(request.quantity, now)?;
        tx.save_stock(&stock).await?;

        let mut events = Vec::new();
        let batch_id = request.batch_id;
        if let Some(batch_id) = batch_id {
            let batch = ledger::increase_in(&mut tx, batch_id, request.quantity, now).await?;
            events.extend(batch.events);
        }

        let number = next_number(&mut tx, MovementType::Import, now).await?;
        let movement =
            request.into_movement(MovementId::new(), MovementType::Import, number, batch_id, now);
        events.insert(0, record(&mut tx, &movement, stock.quantity).await?);
        tx.commit().await?;

        info!(
            movement_number = %movement.movement_number,
            stock_after = stock.quantity,
            "stock imported"
        );
        Ok(Committed::new(movement, events))
    }

    /// Ship stock out of a warehouse, drawing from the named batch or from
    /// the first eligible batch in FEFO order.
    #[instrument(
        skip(self, request),
        fields(
            product_id = %request.product_id,
            warehouse_id = %request.warehouse_id,
            qty = request.quantity
        ),
        err
    )]
    pub async fn export(&self, request: MovementRequest) -> ServiceResult<Committed<StockMovement>> {
        request.validate()?;
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        ensure_catalog(&mut tx, &request).await?;

        let stock = tx
            .load_stock_for_update(request.warehouse_id, request.product_id)
            .await?
            .unwrap_or_else(|| Stock::empty(request.warehouse_id, request.product_id, now));
        stock.ensure_available(request.quantity)?;

        let batch = match request.batch_id {
            Some(id) => named_batch(&mut tx, id, request.product_id).await?,
            None => {
                let picked = ledger::lock_eligible_in(&mut tx, request.product_id)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| DomainError::no_eligible_batch(request.product_id))?;
                debug!(
                    batch_id = %picked.id,
                    batch_number = %picked.batch_number,
                    expiry_date = ?picked.expiry_date,
                    "batch selected by FEFO"
                );
                picked
            }
        };

        let stock_after = tx
            .decrement_stock(request.warehouse_id, request.product_id, request.quantity, now)
            .await?
            .ok_or(DomainError::InsufficientStock {
                requested: request.quantity,
                available: stock.quantity,
            })?;
        let drawn = ledger::decrease_in(&mut tx, batch.id, request.quantity, now).await?;

        let number = next_number(&mut tx, MovementType::Export, now).await?;
        let movement = request.into_movement(
            MovementId::new(),
            MovementType::Export,
            number,
            Some(batch.id),
            now,
        );
        let mut events = vec![record(&mut tx, &movement, stock_after).await?];
        events.extend(drawn.events);
        tx.commit().await?;

        info!(
            movement_number = %movement.movement_number,
            batch_number = %batch.batch_number,
            stock_after,
            "stock exported"
        );
        Ok(Committed::new(movement, events))
    }

    /// Newest first.
    pub async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> ServiceResult<Page<StockMovement>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_movements(filter, pagination).await?)
    }

    /// Per-product totals across warehouses. Read-only.
    pub async fn stock_summary(&self, product_id: Option<ProductId>) -> ServiceResult<Vec<StockSummary>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.stock_summary(product_id).await?)
    }
}
