//! Caller-facing facade over the quality and inventory components.
//!
//! ```text
//! caller → QualityInventoryService → component (one store transaction)
//!        → commit → EventBus::publish (best effort)
//! ```
//!
//! Components return [`Committed`] values; this layer strips the envelopes,
//! publishes them once the transaction is durable and hands the plain records
//! back. A publish failure is logged and never fails the operation.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use lotkeeper_core::{BatchId, Clock, InspectionId, ProductId, SystemClock};
use lotkeeper_events::{EventBus, EventEnvelope};
use lotkeeper_inventory::{BatchRecord, MovementRequest, QcStatus, StockMovement, StockSummary};
use lotkeeper_quality::{
    Decision, Defect, InspectionDetail, InspectionRecord, Measurement, NewDefect, NewMeasurement,
};

use crate::committed::Committed;
use crate::error::ServiceResult;
use crate::inspections::{InspectionRegistry, NewInspection};
use crate::ledger::{BatchLedger, NewBatch};
use crate::movements::StockMovementEngine;
use crate::store::{InspectionFilter, MovementFilter, Page, Pagination, Store};

/// Entry point for batch QC and stock movement operations.
pub struct QualityInventoryService<S, B> {
    inspections: InspectionRegistry<S>,
    ledger: BatchLedger<S>,
    movements: StockMovementEngine<S>,
    bus: B,
}

impl<S, B> QualityInventoryService<S, B>
where
    S: Store + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self::with_clock(store, bus, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, bus: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            inspections: InspectionRegistry::with_clock(store.clone(), Arc::clone(&clock)),
            ledger: BatchLedger::with_clock(store.clone(), Arc::clone(&clock)),
            movements: StockMovementEngine::with_clock(store, clock),
            bus,
        }
    }

    fn publish<T>(&self, committed: Committed<T>) -> T {
        let (value, events) = committed.into_parts();
        for envelope in events {
            let event_type = envelope.event_type().to_string();
            let aggregate_id = envelope.aggregate_id();
            if let Err(e) = self.bus.publish(envelope) {
                warn!(%event_type, %aggregate_id, error = ?e, "failed to publish committed event");
            }
        }
        value
    }

    // Inspections.

    pub async fn create_inspection(&self, input: NewInspection) -> ServiceResult<InspectionRecord> {
        Ok(self.publish(self.inspections.create(input).await?))
    }

    pub async fn add_defects(
        &self,
        inspection_id: InspectionId,
        defects: Vec<NewDefect>,
    ) -> ServiceResult<Vec<Defect>> {
        Ok(self.publish(self.inspections.add_defects(inspection_id, defects).await?))
    }

    pub async fn add_measurements(
        &self,
        inspection_id: InspectionId,
        measurements: Vec<NewMeasurement>,
    ) -> ServiceResult<Vec<Measurement>> {
        let committed = self
            .inspections
            .add_measurements(inspection_id, measurements)
            .await?;
        Ok(self.publish(committed))
    }

    /// Close an inspection; the batch QC status follows its final decision.
    pub async fn submit_inspection(
        &self,
        inspection_id: InspectionId,
        decision_override: Option<Decision>,
        note: Option<String>,
    ) -> ServiceResult<InspectionRecord> {
        let committed = self
            .inspections
            .submit(inspection_id, decision_override, note)
            .await?;
        Ok(self.publish(committed))
    }

    pub async fn get_inspection_detail(
        &self,
        inspection_id: InspectionId,
    ) -> ServiceResult<InspectionDetail> {
        self.inspections.get_detail(inspection_id).await
    }

    pub async fn list_inspections(
        &self,
        filter: &InspectionFilter,
    ) -> ServiceResult<Vec<InspectionRecord>> {
        self.inspections.list(filter).await
    }

    // Stock.

    pub async fn import_stock(&self, request: MovementRequest) -> ServiceResult<StockMovement> {
        Ok(self.publish(self.movements.import(request).await?))
    }

    pub async fn export_stock(&self, request: MovementRequest) -> ServiceResult<StockMovement> {
        Ok(self.publish(self.movements.export(request).await?))
    }

    pub async fn get_stock_summary(
        &self,
        product_id: Option<ProductId>,
    ) -> ServiceResult<Vec<StockSummary>> {
        self.movements.stock_summary(product_id).await
    }

    pub async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> ServiceResult<Page<StockMovement>> {
        self.movements.list_movements(filter, pagination).await
    }

    // Batches.

    pub async fn receive_batch(&self, input: NewBatch) -> ServiceResult<BatchRecord> {
        Ok(self.publish(self.ledger.receive(input).await?))
    }

    pub async fn get_batch(&self, batch_id: BatchId) -> ServiceResult<BatchRecord> {
        self.ledger.get(batch_id).await
    }

    pub async fn batches_by_product(
        &self,
        product_id: ProductId,
        qc_status: Option<QcStatus>,
    ) -> ServiceResult<Vec<BatchRecord>> {
        self.ledger.by_product(product_id, qc_status).await
    }

    /// Batches an export of `product_id` may draw from, in FEFO order.
    pub async fn eligible_batches(&self, product_id: ProductId) -> ServiceResult<Vec<BatchRecord>> {
        self.ledger.eligible_for_export(product_id).await
    }

    pub async fn deactivate_batch(&self, batch_id: BatchId) -> ServiceResult<BatchRecord> {
        Ok(self.publish(self.ledger.deactivate(batch_id).await?))
    }
}
