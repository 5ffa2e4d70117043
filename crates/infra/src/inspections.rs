//! InspectionRegistry: lifecycle of QC inspections and their child records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use lotkeeper_core::{
    ActorId, AggregateRoot, BatchId, Clock, DefectId, DomainError, ExpectedVersion, InspectionId,
    MeasurementId, SystemClock,
};
use lotkeeper_events::execute;
use lotkeeper_quality::{
    AqlOverrides, Decision, Defect, Inspection, InspectionCommand, InspectionDetail,
    InspectionEvent, InspectionLevel, InspectionRecord, InspectionType, Measurement, NewDefect,
    NewMeasurement, OpenInspection, RecordDefects, RecordMeasurements, SubmitInspection,
};

use crate::committed::{INSPECTION_AGGREGATE, Committed, envelopes};
use crate::error::ServiceResult;
use crate::ledger;
use crate::store::{InspectionFilter, Store, StoreTx};

/// Caller input for opening an inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInspection {
    #[serde(rename = "type")]
    pub kind: InspectionType,
    pub batch_id: BatchId,
    pub lot_size: Option<i64>,
    #[serde(default)]
    pub inspection_level: InspectionLevel,
    #[serde(default)]
    pub aql_overrides: AqlOverrides,
    pub note: Option<String>,
    pub owner: Option<ActorId>,
}

impl NewInspection {
    pub fn new(kind: InspectionType, batch_id: BatchId) -> Self {
        Self {
            kind,
            batch_id,
            lot_size: None,
            inspection_level: InspectionLevel::default(),
            aql_overrides: AqlOverrides::default(),
            note: None,
            owner: None,
        }
    }

    pub fn with_lot_size(mut self, lot_size: i64) -> Self {
        self.lot_size = Some(lot_size);
        self
    }
}

async fn load_header<T>(tx: &mut T, id: InspectionId) -> ServiceResult<Inspection>
where
    T: StoreTx + ?Sized,
{
    let record = tx
        .load_inspection_for_update(id)
        .await?
        .ok_or_else(|| DomainError::not_found("inspection", id))?;
    Ok(Inspection::restore(record, Vec::new(), Vec::new()))
}

/// Persist the header after `command` and return the envelopes of its events.
async fn run<T>(
    tx: &mut T,
    inspection: &mut Inspection,
    command: InspectionCommand,
) -> ServiceResult<(Vec<InspectionEvent>, Committed<()>)>
where
    T: StoreTx + ?Sized,
{
    let before = inspection.version();
    let events = execute(inspection, &command)?;
    if events.is_empty() {
        return Ok((events, Committed::new((), vec![])));
    }
    tx.update_inspection(inspection.record(), ExpectedVersion::Exact(before))
        .await?;
    let envs = envelopes(
        *inspection.id().as_uuid(),
        INSPECTION_AGGREGATE,
        before,
        &events,
    )?;
    Ok((events, Committed::new((), envs)))
}

/// Owns inspections, their defects and measurements.
pub struct InspectionRegistry<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: Clone> Clone for InspectionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> InspectionRegistry<S>
where
    S: Store,
{
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open an inspection against an existing batch, computing its sampling plan.
    #[instrument(skip(self, input), fields(batch_id = %input.batch_id, kind = %input.kind), err)]
    pub async fn create(&self, input: NewInspection) -> ServiceResult<Committed<InspectionRecord>> {
        let mut tx = self.store.begin().await?;
        if tx.load_batch(input.batch_id).await?.is_none() {
            return Err(DomainError::not_found("batch", input.batch_id).into());
        }

        let id = InspectionId::new();
        let mut inspection = Inspection::empty(id);
        let command = InspectionCommand::Open(OpenInspection {
            inspection_id: id,
            kind: input.kind,
            batch_id: input.batch_id,
            lot_size: input.lot_size,
            inspection_level: input.inspection_level,
            aql_overrides: input.aql_overrides,
            note: input.note,
            owner: input.owner,
            occurred_at: self.clock.now(),
        });
        let events = execute(&mut inspection, &command)?;
        tx.insert_inspection(inspection.record()).await?;
        let envs = envelopes(*id.as_uuid(), INSPECTION_AGGREGATE, 0, &events)?;
        tx.commit().await?;

        info!(
            inspection_id = %id,
            sample_size = ?inspection.record().sampling.sample_size,
            "inspection opened"
        );
        Ok(Committed::new(inspection.record().clone(), envs))
    }

    /// Append defects to an open inspection, all or nothing.
    #[instrument(skip(self, defects), fields(count = defects.len()), err)]
    pub async fn add_defects(
        &self,
        id: InspectionId,
        defects: Vec<NewDefect>,
    ) -> ServiceResult<Committed<Vec<Defect>>> {
        let mut tx = self.store.begin().await?;
        let mut inspection = load_header(&mut tx, id).await?;

        let defects: Vec<Defect> = defects
            .into_iter()
            .map(|d| d.into_defect(DefectId::new(), id))
            .collect();
        let command = InspectionCommand::RecordDefects(RecordDefects {
            inspection_id: id,
            defects: defects.clone(),
            occurred_at: self.clock.now(),
        });
        let (_, committed) = run(&mut tx, &mut inspection, command).await?;
        tx.insert_defects(&defects).await?;
        tx.commit().await?;
        Ok(committed.map(|()| defects))
    }

    /// Append measurements to an open inspection, all or nothing.
    #[instrument(skip(self, measurements), fields(count = measurements.len()), err)]
    pub async fn add_measurements(
        &self,
        id: InspectionId,
        measurements: Vec<NewMeasurement>,
    ) -> ServiceResult<Committed<Vec<Measurement>>> {
        let mut tx = self.store.begin().await?;
        let mut inspection = load_header(&mut tx, id).await?;

        let measurements: Vec<Measurement> = measurements
            .into_iter()
            .map(|m| m.into_measurement(MeasurementId::new(), id))
            .collect();
        let command = InspectionCommand::RecordMeasurements(RecordMeasurements {
            inspection_id: id,
            measurements: measurements.clone(),
            occurred_at: self.clock.now(),
        });
        let (_, committed) = run(&mut tx, &mut inspection, command).await?;
        tx.insert_measurements(&measurements).await?;
        tx.commit().await?;
        Ok(committed.map(|()| measurements))
    }

    /// Close the inspection with its final decision and move the batch QC
    /// status to match, in one transaction.
    #[instrument(skip(self, note), err)]
    pub async fn submit(
        &self,
        id: InspectionId,
        decision_override: Option<Decision>,
        note: Option<String>,
    ) -> ServiceResult<Committed<InspectionRecord>> {
        let mut tx = self.store.begin().await?;
        let record = tx
            .load_inspection_for_update(id)
            .await?
            .ok_or_else(|| DomainError::not_found("inspection", id))?;
        let defects = tx.defects_for(id).await?;
        let mut inspection = Inspection::restore(record, defects, Vec::new());

        let command = InspectionCommand::Submit(SubmitInspection {
            inspection_id: id,
            decision_override,
            note,
            occurred_at: self.clock.now(),
        });
        let (events, committed) = run(&mut tx, &mut inspection, command).await?;
        let mut envs = committed.events;

        for event in &events {
            if let InspectionEvent::Submitted(submitted) = event {
                if submitted.is_override() {
                    warn!(
                        inspection_id = %id,
                        auto_decision = %submitted.auto_decision,
                        decision = %submitted.decision,
                        "decision override differs from automatic verdict"
                    );
                }
                let batch = ledger::apply_qc_outcome_in(&mut tx, submitted).await?;
                envs.extend(batch.events);
            }
        }
        tx.commit().await?;

        info!(
            inspection_id = %id,
            decision = ?inspection.decision(),
            "inspection submitted"
        );
        Ok(Committed::new(inspection.record().clone(), envs))
    }

    pub async fn get_detail(&self, id: InspectionId) -> ServiceResult<InspectionDetail> {
        let mut tx = self.store.begin().await?;
        let inspection = tx
            .load_inspection(id)
            .await?
            .ok_or_else(|| DomainError::not_found("inspection", id))?;
        let defects = tx.defects_for(id).await?;
        let measurements = tx.measurements_for(id).await?;
        Ok(InspectionDetail {
            inspection,
            defects,
            measurements,
        })
    }

    /// Newest `started_at` first.
    pub async fn list(&self, filter: &InspectionFilter) -> ServiceResult<Vec<InspectionRecord>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_inspections(filter).await?)
    }
}
