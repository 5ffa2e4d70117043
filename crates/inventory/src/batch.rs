use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use lotkeeper_core::{
    Aggregate, AggregateRoot, BatchId, DomainError, InspectionId, ProductId, impl_str_enum,
};
use lotkeeper_events::Event;
use lotkeeper_quality::{Decision, InspectionSubmitted};

/// QC status of a batch, driven by the latest submitted inspection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QcStatus {
    Pending,
    Passed,
    Failed,
}

impl_str_enum!(QcStatus, "qc status", {
    Pending => "pending",
    Passed => "passed",
    Failed => "failed",
});

impl From<Decision> for QcStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Accept => QcStatus::Passed,
            Decision::Reject => QcStatus::Failed,
            Decision::Hold | Decision::Rework => QcStatus::Pending,
        }
    }
}

/// Human-readable batch number: `BATCH-YYYYMMDD-NNNN`.
pub fn batch_number(day: NaiveDate, seq: u32) -> String {
    format!("BATCH-{}-{seq:04}", day.format("%Y%m%d"))
}

/// Persisted state of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub batch_number: String,
    pub product_id: ProductId,
    pub initial_quantity: i64,
    pub current_quantity: i64,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub qc_status: QcStatus,
    pub qc_note: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl BatchRecord {
    /// Whether this batch may be drawn from by an export without an explicit batch.
    pub fn is_exportable(&self) -> bool {
        self.is_active && self.qc_status == QcStatus::Passed && self.current_quantity > 0
    }
}

/// Aggregate root: Batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    record: BatchRecord,
    created: bool,
}

impl Batch {
    pub fn empty(id: BatchId) -> Self {
        Self {
            record: BatchRecord {
                id,
                batch_number: String::new(),
                product_id: ProductId::from_uuid(uuid::Uuid::nil()),
                initial_quantity: 0,
                current_quantity: 0,
                manufacturing_date: None,
                expiry_date: None,
                qc_status: QcStatus::Pending,
                qc_note: None,
                is_active: false,
                created_at: DateTime::<Utc>::UNIX_EPOCH,
                updated_at: DateTime::<Utc>::UNIX_EPOCH,
                version: 0,
            },
            created: false,
        }
    }

    pub fn restore(record: BatchRecord) -> Self {
        Self {
            record,
            created: true,
        }
    }

    pub fn record(&self) -> &BatchRecord {
        &self.record
    }

    pub fn into_record(self) -> BatchRecord {
        self.record
    }

    pub fn product_id(&self) -> ProductId {
        self.record.product_id
    }

    pub fn current_quantity(&self) -> i64 {
        self.record.current_quantity
    }

    pub fn qc_status(&self) -> QcStatus {
        self.record.qc_status
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }

    fn version(&self) -> u64 {
        self.record.version
    }
}

/// Command: ReceiveBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBatch {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub product_id: ProductId,
    pub initial_quantity: i64,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IncreaseQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreaseQuantity {
    pub batch_id: BatchId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecreaseQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecreaseQuantity {
    pub batch_id: BatchId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordQcOutcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQcOutcome {
    pub batch_id: BatchId,
    pub inspection_id: InspectionId,
    pub decision: Decision,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl From<&InspectionSubmitted> for RecordQcOutcome {
    fn from(e: &InspectionSubmitted) -> Self {
        Self {
            batch_id: e.batch_id,
            inspection_id: e.inspection_id,
            decision: e.decision,
            note: e.note.clone(),
            occurred_at: e.occurred_at,
        }
    }
}

/// Command: DeactivateBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateBatch {
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCommand {
    Receive(ReceiveBatch),
    Increase(IncreaseQuantity),
    Decrease(DecreaseQuantity),
    RecordQcOutcome(RecordQcOutcome),
    Deactivate(DeactivateBatch),
}

/// Event: BatchReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub product_id: ProductId,
    pub initial_quantity: i64,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityIncreased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityIncreased {
    pub batch_id: BatchId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityDecreased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityDecreased {
    pub batch_id: BatchId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QcOutcomeRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcOutcomeRecorded {
    pub batch_id: BatchId,
    pub inspection_id: InspectionId,
    pub decision: Decision,
    pub qc_status: QcStatus,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeactivated {
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    Received(BatchReceived),
    QuantityIncreased(QuantityIncreased),
    QuantityDecreased(QuantityDecreased),
    QcOutcomeRecorded(QcOutcomeRecorded),
    Deactivated(BatchDeactivated),
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::Received(_) => "inventory.batch.received",
            BatchEvent::QuantityIncreased(_) => "inventory.batch.quantity_increased",
            BatchEvent::QuantityDecreased(_) => "inventory.batch.quantity_decreased",
            BatchEvent::QcOutcomeRecorded(_) => "inventory.batch.qc_recorded",
            BatchEvent::Deactivated(_) => "inventory.batch.deactivated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::Received(e) => e.occurred_at,
            BatchEvent::QuantityIncreased(e) => e.occurred_at,
            BatchEvent::QuantityDecreased(e) => e.occurred_at,
            BatchEvent::QcOutcomeRecorded(e) => e.occurred_at,
            BatchEvent::Deactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Batch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::Received(e) => {
                self.record = BatchRecord {
                    id: e.batch_id,
                    batch_number: e.batch_number.clone(),
                    product_id: e.product_id,
                    initial_quantity: e.initial_quantity,
                    current_quantity: e.initial_quantity,
                    manufacturing_date: e.manufacturing_date,
                    expiry_date: e.expiry_date,
                    qc_status: QcStatus::Pending,
                    qc_note: None,
                    is_active: true,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                    version: self.record.version,
                };
                self.created = true;
            }
            BatchEvent::QuantityIncreased(e) => {
                self.record.current_quantity =
                    self.record.current_quantity.saturating_add(e.amount);
                self.record.updated_at = e.occurred_at;
            }
            BatchEvent::QuantityDecreased(e) => {
                self.record.current_quantity -= e.amount;
                self.record.updated_at = e.occurred_at;
            }
            BatchEvent::QcOutcomeRecorded(e) => {
                self.record.qc_status = e.qc_status;
                self.record.qc_note = e.note.clone();
                self.record.updated_at = e.occurred_at;
            }
            BatchEvent::Deactivated(e) => {
                self.record.is_active = false;
                self.record.updated_at = e.occurred_at;
            }
        }

        self.record.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::Receive(cmd) => self.handle_receive(cmd),
            BatchCommand::Increase(cmd) => self.handle_increase(cmd),
            BatchCommand::Decrease(cmd) => self.handle_decrease(cmd),
            BatchCommand::RecordQcOutcome(cmd) => self.handle_qc_outcome(cmd),
            BatchCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
        }
    }
}

fn ensure_positive(amount: i64, what: &str) -> Result<(), DomainError> {
    if amount <= 0 {
        return Err(DomainError::validation(format!(
            "{what} must be positive (got {amount})"
        )));
    }
    Ok(())
}

impl Batch {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("batch", self.record.id));
        }
        Ok(())
    }

    fn ensure_batch_id(&self, batch_id: BatchId) -> Result<(), DomainError> {
        if self.record.id != batch_id {
            return Err(DomainError::invariant("batch_id mismatch"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveBatch) -> Result<Vec<BatchEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("batch already exists"));
        }
        self.ensure_batch_id(cmd.batch_id)?;
        ensure_positive(cmd.initial_quantity, "initial_quantity")?;
        if cmd.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch_number cannot be empty"));
        }
        if let (Some(mfg), Some(exp)) = (cmd.manufacturing_date, cmd.expiry_date) {
            if exp <= mfg {
                return Err(DomainError::validation(format!(
                    "expiry_date {exp} must be after manufacturing_date {mfg}"
                )));
            }
        }

        Ok(vec![BatchEvent::Received(BatchReceived {
            batch_id: cmd.batch_id,
            batch_number: cmd.batch_number.clone(),
            product_id: cmd.product_id,
            initial_quantity: cmd.initial_quantity,
            manufacturing_date: cmd.manufacturing_date,
            expiry_date: cmd.expiry_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_increase(&self, cmd: &IncreaseQuantity) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_batch_id(cmd.batch_id)?;
        ensure_positive(cmd.amount, "amount")?;
        if self.record.current_quantity.checked_add(cmd.amount).is_none() {
            return Err(DomainError::validation(format!(
                "increasing batch {} by {} overflows its quantity",
                self.record.batch_number, cmd.amount
            )));
        }

        Ok(vec![BatchEvent::QuantityIncreased(QuantityIncreased {
            batch_id: cmd.batch_id,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decrease(&self, cmd: &DecreaseQuantity) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_batch_id(cmd.batch_id)?;
        ensure_positive(cmd.amount, "amount")?;

        if cmd.amount > self.record.current_quantity {
            return Err(DomainError::InsufficientQuantity {
                requested: cmd.amount,
                available: self.record.current_quantity,
            });
        }

        Ok(vec![BatchEvent::QuantityDecreased(QuantityDecreased {
            batch_id: cmd.batch_id,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_qc_outcome(&self, cmd: &RecordQcOutcome) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_batch_id(cmd.batch_id)?;

        Ok(vec![BatchEvent::QcOutcomeRecorded(QcOutcomeRecorded {
            batch_id: cmd.batch_id,
            inspection_id: cmd.inspection_id,
            decision: cmd.decision,
            qc_status: QcStatus::from(cmd.decision),
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateBatch) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_batch_id(cmd.batch_id)?;

        // Already inactive: nothing to record.
        if !self.record.is_active {
            return Ok(vec![]);
        }

        Ok(vec![BatchEvent::Deactivated(BatchDeactivated {
            batch_id: cmd.batch_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lotkeeper_events::execute;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 8, 0, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn receive_cmd(id: BatchId, qty: i64) -> BatchCommand {
        BatchCommand::Receive(ReceiveBatch {
            batch_id: id,
            batch_number: batch_number(day(2025, 1, 5), 1),
            product_id: ProductId::new(),
            initial_quantity: qty,
            manufacturing_date: Some(day(2024, 12, 1)),
            expiry_date: Some(day(2025, 6, 1)),
            occurred_at: t0(),
        })
    }

    fn received(qty: i64) -> Batch {
        let id = BatchId::new();
        let mut batch = Batch::empty(id);
        execute(&mut batch, &receive_cmd(id, qty)).unwrap();
        batch
    }

    fn decrease(batch: &Batch, amount: i64) -> BatchCommand {
        BatchCommand::Decrease(DecreaseQuantity {
            batch_id: *batch.id(),
            amount,
            occurred_at: t0(),
        })
    }

    fn increase(batch: &Batch, amount: i64) -> BatchCommand {
        BatchCommand::Increase(IncreaseQuantity {
            batch_id: *batch.id(),
            amount,
            occurred_at: t0(),
        })
    }

    #[test]
    fn batch_number_is_zero_padded() {
        assert_eq!(batch_number(day(2025, 3, 9), 7), "BATCH-20250309-0007");
    }

    #[test]
    fn receive_starts_pending_with_full_quantity() {
        let batch = received(40);
        let rec = batch.record();
        assert_eq!(rec.current_quantity, 40);
        assert_eq!(rec.initial_quantity, 40);
        assert_eq!(rec.qc_status, QcStatus::Pending);
        assert!(rec.is_active);
        assert!(!rec.is_exportable());
        assert_eq!(batch.version(), 1);
    }

    #[test]
    fn receive_validates_quantity_and_dates() {
        let id = BatchId::new();
        let empty = Batch::empty(id);
        assert!(matches!(
            empty.handle(&receive_cmd(id, 0)),
            Err(DomainError::Validation(_))
        ));

        let BatchCommand::Receive(mut cmd) = receive_cmd(id, 5) else {
            unreachable!()
        };
        cmd.expiry_date = cmd.manufacturing_date;
        assert!(matches!(
            empty.handle(&BatchCommand::Receive(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn decrease_beyond_current_is_rejected_without_change() {
        let batch = received(10);
        let err = batch.handle(&decrease(&batch, 11)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientQuantity {
                requested: 11,
                available: 10
            }
        );
        assert_eq!(batch.current_quantity(), 10);
    }

    #[test]
    fn non_positive_amounts_are_validation_errors() {
        let batch = received(10);
        assert!(matches!(batch.handle(&decrease(&batch, 0)), Err(DomainError::Validation(_))));
        assert!(matches!(batch.handle(&increase(&batch, -3)), Err(DomainError::Validation(_))));
    }

    #[test]
    fn increase_is_not_capped_by_initial_quantity() {
        let mut batch = received(10);
        let cmd = increase(&batch, 25);
        execute(&mut batch, &cmd).unwrap();
        assert_eq!(batch.current_quantity(), 35);
    }

    #[test]
    fn increase_that_would_overflow_is_rejected() {
        let batch = received(5);
        let err = batch.handle(&increase(&batch, i64::MAX)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(batch.current_quantity(), 5);
    }

    #[test]
    fn commands_on_unknown_batch_are_not_found() {
        let batch = Batch::empty(BatchId::new());
        assert!(matches!(
            batch.handle(&increase(&batch, 1)),
            Err(DomainError::NotFound { entity: "batch", .. })
        ));
    }

    #[test]
    fn qc_outcome_maps_decision_and_overwrites_note() {
        let mut batch = received(10);
        for (decision, status) in [
            (Decision::Accept, QcStatus::Passed),
            (Decision::Hold, QcStatus::Pending),
            (Decision::Rework, QcStatus::Pending),
            (Decision::Reject, QcStatus::Failed),
        ] {
            let cmd = BatchCommand::RecordQcOutcome(RecordQcOutcome {
                batch_id: *batch.id(),
                inspection_id: InspectionId::new(),
                decision,
                note: Some(format!("verdict {decision}")),
                occurred_at: t0(),
            });
            execute(&mut batch, &cmd).unwrap();
            assert_eq!(batch.qc_status(), status);
            assert_eq!(batch.record().qc_note, Some(format!("verdict {decision}")));
        }
    }

    #[test]
    fn deactivate_is_idempotent() {
        let mut batch = received(10);
        let cmd = BatchCommand::Deactivate(DeactivateBatch {
            batch_id: *batch.id(),
            occurred_at: t0(),
        });
        assert_eq!(execute(&mut batch, &cmd).unwrap().len(), 1);
        assert!(!batch.record().is_active);
        assert!(execute(&mut batch, &cmd).unwrap().is_empty());
        assert_eq!(batch.version(), 2);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: no sequence of increase/decrease commands drives a batch negative.
            #[test]
            fn quantity_never_negative(
                initial in 1i64..500,
                ops in prop::collection::vec((any::<bool>(), -10i64..200), 0..40)
            ) {
                let mut batch = received(initial);
                for (is_increase, amount) in ops {
                    let cmd = if is_increase {
                        increase(&batch, amount)
                    } else {
                        decrease(&batch, amount)
                    };
                    let before = batch.current_quantity();
                    if execute(&mut batch, &cmd).is_err() {
                        prop_assert_eq!(batch.current_quantity(), before);
                    }
                    prop_assert!(batch.current_quantity() >= 0);
                }
            }
        }
    }
}
