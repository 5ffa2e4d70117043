//! BatchLedger: batch quantity and QC status.
//!
//! The `*_in` functions operate inside a caller-owned transaction so that the
//! movement engine and the inspection registry can mutate batches atomically
//! with their own writes. [`BatchLedger`] wraps each of them in a transaction
//! of its own for direct use.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use lotkeeper_core::{
    Aggregate, AggregateRoot, BatchId, Clock, DomainError, ExpectedVersion, ProductId,
    SystemClock,
};
use lotkeeper_events::{EventEnvelope, execute};
use lotkeeper_inventory::{
    Batch, BatchCommand, BatchRecord, DeactivateBatch, DecreaseQuantity, IncreaseQuantity,
    QcStatus, ReceiveBatch, RecordQcOutcome, batch_number, eligible_in_fefo_order,
};
use lotkeeper_quality::InspectionSubmitted;

use crate::committed::{BATCH_AGGREGATE, Committed, envelopes};
use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

/// Counter prefix used for batch numbers.
const BATCH_SEQUENCE: &str = "BATCH";

/// Caller input for receiving a new batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub product_id: ProductId,
    pub initial_quantity: i64,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
}

impl NewBatch {
    pub fn new(product_id: ProductId, initial_quantity: i64) -> Self {
        Self {
            product_id,
            initial_quantity,
            manufacturing_date: None,
            expiry_date: None,
        }
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_manufacturing_date(mut self, manufacturing_date: NaiveDate) -> Self {
        self.manufacturing_date = Some(manufacturing_date);
        self
    }
}

fn ensure_positive(amount: i64) -> Result<(), DomainError> {
    if amount <= 0 {
        return Err(DomainError::validation(format!(
            "amount must be positive (got {amount})"
        )));
    }
    Ok(())
}

/// Load a batch under a row lock, or `NotFound`.
pub(crate) async fn load_for_update<T>(tx: &mut T, id: BatchId) -> ServiceResult<Batch>
where
    T: StoreTx + ?Sized,
{
    let record = tx
        .load_batch_for_update(id)
        .await?
        .ok_or_else(|| DomainError::not_found("batch", id))?;
    Ok(Batch::restore(record))
}

/// Run a command against a loaded batch and persist the result.
async fn run<T>(
    tx: &mut T,
    batch: &mut Batch,
    command: BatchCommand,
) -> ServiceResult<Vec<EventEnvelope<JsonValue>>>
where
    T: StoreTx + ?Sized,
{
    let before = batch.version();
    let events = execute(batch, &command)?;
    if events.is_empty() {
        return Ok(vec![]);
    }
    tx.update_batch(batch.record(), ExpectedVersion::Exact(before))
        .await?;
    Ok(envelopes(
        *batch.id().as_uuid(),
        BATCH_AGGREGATE,
        before,
        &events,
    )?)
}

pub(crate) async fn receive_in<T>(
    tx: &mut T,
    input: NewBatch,
    now: DateTime<Utc>,
) -> ServiceResult<Committed<BatchRecord>>
where
    T: StoreTx + ?Sized,
{
    if !tx.product_exists(input.product_id).await? {
        return Err(DomainError::not_found("product", input.product_id).into());
    }

    let id = BatchId::new();
    let mut batch = Batch::empty(id);
    let day = now.date_naive();
    let mut command = ReceiveBatch {
        batch_id: id,
        batch_number: batch_number(day, 0),
        product_id: input.product_id,
        initial_quantity: input.initial_quantity,
        manufacturing_date: input.manufacturing_date,
        expiry_date: input.expiry_date,
        occurred_at: now,
    };
    // Validate before consuming a number from the counter.
    batch.handle(&BatchCommand::Receive(command.clone()))?;

    let seq = tx.next_sequence(BATCH_SEQUENCE, day).await?;
    command.batch_number = batch_number(day, seq);

    let events = execute(&mut batch, &BatchCommand::Receive(command))?;
    tx.insert_batch(batch.record()).await?;
    let envs = envelopes(*id.as_uuid(), BATCH_AGGREGATE, 0, &events)?;
    Ok(Committed::new(batch.into_record(), envs))
}

pub(crate) async fn increase_in<T>(
    tx: &mut T,
    id: BatchId,
    amount: i64,
    now: DateTime<Utc>,
) -> ServiceResult<Committed<BatchRecord>>
where
    T: StoreTx + ?Sized,
{
    ensure_positive(amount)?;
    let mut batch = load_for_update(tx, id).await?;
    let command = BatchCommand::Increase(IncreaseQuantity {
        batch_id: id,
        amount,
        occurred_at: now,
    });
    let envs = run(tx, &mut batch, command).await?;
    Ok(Committed::new(batch.into_record(), envs))
}

pub(crate) async fn decrease_in<T>(
    tx: &mut T,
    id: BatchId,
    amount: i64,
    now: DateTime<Utc>,
) -> ServiceResult<Committed<BatchRecord>>
where
    T: StoreTx + ?Sized,
{
    ensure_positive(amount)?;
    let mut batch = load_for_update(tx, id).await?;
    let command = BatchCommand::Decrease(DecreaseQuantity {
        batch_id: id,
        amount,
        occurred_at: now,
    });
    let envs = run(tx, &mut batch, command).await?;
    Ok(Committed::new(batch.into_record(), envs))
}

/// Consume a submitted inspection: move the batch QC status to match.
pub(crate) async fn apply_qc_outcome_in<T>(
    tx: &mut T,
    submitted: &InspectionSubmitted,
) -> ServiceResult<Committed<BatchRecord>>
where
    T: StoreTx + ?Sized,
{
    let mut batch = load_for_update(tx, submitted.batch_id).await?;
    let command = BatchCommand::RecordQcOutcome(RecordQcOutcome::from(submitted));
    let envs = run(tx, &mut batch, command).await?;
    Ok(Committed::new(batch.into_record(), envs))
}

/// QC-passed, active batches with stock left, in FEFO order.
pub(crate) async fn eligible_in<T>(
    tx: &mut T,
    product_id: ProductId,
) -> ServiceResult<Vec<BatchRecord>>
where
    T: StoreTx + ?Sized,
{
    let batches = tx
        .batches_for_product(product_id, Some(QcStatus::Passed), true)
        .await?;
    Ok(eligible_in_fefo_order(batches))
}

/// Like [`eligible_in`], with every candidate locked for the rest of the
/// transaction.
pub(crate) async fn lock_eligible_in<T>(
    tx: &mut T,
    product_id: ProductId,
) -> ServiceResult<Vec<BatchRecord>>
where
    T: StoreTx + ?Sized,
{
    let batches = tx.lock_exportable_batches(product_id).await?;
    Ok(eligible_in_fefo_order(batches))
}

/// Owns batch quantity state and QC status.
pub struct BatchLedger<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: Clone> Clone for BatchLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> BatchLedger<S>
where
    S: Store,
{
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Receive a new batch with a generated `BATCH-YYYYMMDD-NNNN` number.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, qty = input.initial_quantity), err)]
    pub async fn receive(&self, input: NewBatch) -> ServiceResult<Committed<BatchRecord>> {
        let mut tx = self.store.begin().await?;
        let out = receive_in(&mut tx, input, self.clock.now()).await?;
        tx.commit().await?;
        info!(batch_id = %out.value.id, batch_number = %out.value.batch_number, "batch received");
        Ok(out)
    }

    /// Add to a batch. Not capped by the initial quantity.
    #[instrument(skip(self), err)]
    pub async fn increase(
        &self,
        id: BatchId,
        amount: i64,
    ) -> ServiceResult<Committed<BatchRecord>> {
        let mut tx = self.store.begin().await?;
        let out = increase_in(&mut tx, id, amount, self.clock.now()).await?;
        tx.commit().await?;
        Ok(out)
    }

    /// Take from a batch; `InsufficientQuantity` if it holds less than `amount`.
    #[instrument(skip(self), err)]
    pub async fn decrease(
        &self,
        id: BatchId,
        amount: i64,
    ) -> ServiceResult<Committed<BatchRecord>> {
        let mut tx = self.store.begin().await?;
        let out = decrease_in(&mut tx, id, amount, self.clock.now()).await?;
        tx.commit().await?;
        Ok(out)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate(&self, id: BatchId) -> ServiceResult<Committed<BatchRecord>> {
        let mut tx = self.store.begin().await?;
        let mut batch = load_for_update(&mut tx, id).await?;
        let command = BatchCommand::Deactivate(DeactivateBatch {
            batch_id: id,
            occurred_at: self.clock.now(),
        });
        let envs = run(&mut tx, &mut batch, command).await?;
        tx.commit().await?;
        Ok(Committed::new(batch.into_record(), envs))
    }

    pub async fn get(&self, id: BatchId) -> ServiceResult<BatchRecord> {
        let mut tx = self.store.begin().await?;
        let record = tx
            .load_batch(id)
            .await?
            .ok_or_else(|| DomainError::not_found("batch", id))?;
        Ok(record)
    }

    /// Active batches of a product, optionally filtered by QC status.
    pub async fn by_product(
        &self,
        product_id: ProductId,
        qc_status: Option<QcStatus>,
    ) -> ServiceResult<Vec<BatchRecord>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.batches_for_product(product_id, qc_status, true).await?)
    }

    pub async fn eligible_for_export(
        &self,
        product_id: ProductId,
    ) -> ServiceResult<Vec<BatchRecord>> {
        let mut tx = self.store.begin().await?;
        eligible_in(&mut tx, product_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use lotkeeper_core::FixedClock;

    async fn ledger() -> (BatchLedger<InMemoryStore>, ProductId) {
        let store = InMemoryStore::new();
        let product = ProductId::new();
        store.register_product(product).await;
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 10, 9, 30, 0).unwrap(),
        ));
        (BatchLedger::with_clock(store, clock), product)
    }

    #[tokio::test]
    async fn receive_numbers_batches_per_day() {
        let (ledger, product) = ledger().await;
        let a = ledger.receive(NewBatch::new(product, 10)).await.unwrap().value;
        let b = ledger.receive(NewBatch::new(product, 20)).await.unwrap().value;
        assert_eq!(a.batch_number, "BATCH-20250110-0001");
        assert_eq!(b.batch_number, "BATCH-20250110-0002");
        assert_eq!(a.current_quantity, 10);
        assert_eq!(a.qc_status, QcStatus::Pending);
    }

    #[tokio::test]
    async fn receive_rejects_unknown_product_and_bad_input() {
        let (ledger, product) = ledger().await;
        let err = ledger
            .receive(NewBatch::new(ProductId::new(), 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");

        let err = ledger.receive(NewBatch::new(product, 0)).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");

        // A rejected receive does not burn a batch number.
        let ok = ledger.receive(NewBatch::new(product, 1)).await.unwrap().value;
        assert_eq!(ok.batch_number, "BATCH-20250110-0001");
    }

    #[tokio::test]
    async fn decrease_checks_amount_before_existence() {
        let (ledger, _) = ledger().await;
        let err = ledger.decrease(BatchId::new(), 0).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
        let err = ledger.decrease(BatchId::new(), 1).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn decrease_beyond_current_leaves_batch_unchanged() {
        let (ledger, product) = ledger().await;
        let batch = ledger.receive(NewBatch::new(product, 5)).await.unwrap().value;

        let err = ledger.decrease(batch.id, 6).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientQuantity {
                requested: 6,
                available: 5
            })
        ));
        assert_eq!(ledger.get(batch.id).await.unwrap().current_quantity, 5);

        let after = ledger.increase(batch.id, 7).await.unwrap().value;
        assert_eq!(after.current_quantity, 12);
        assert_eq!(after.version, 2);
    }

    #[tokio::test]
    async fn deactivated_batches_drop_out_of_product_listing() {
        let (ledger, product) = ledger().await;
        let a = ledger.receive(NewBatch::new(product, 5)).await.unwrap().value;
        let b = ledger.receive(NewBatch::new(product, 5)).await.unwrap().value;

        let out = ledger.deactivate(a.id).await.unwrap();
        assert_eq!(out.events.len(), 1);
        assert!(!out.value.is_active);

        let listed = ledger.by_product(product, None).await.unwrap();
        assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);
        assert!(ledger.get(a.id).await.is_ok());
    }
}
