use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lotkeeper_core::{
    ActorId, Aggregate, AggregateRoot, BatchId, DefectId, DomainError, Entity, InspectionId,
    MeasurementId, impl_str_enum,
};
use lotkeeper_events::Event;

use crate::decision;
use crate::sampling::{self, InspectionLevel, SamplingPlan};

/// Checkpoint at which the inspection is performed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionType {
    /// Incoming goods / raw material.
    Input,
    /// During production.
    InProcess,
    /// Finished goods.
    Output,
    /// Re-check of stored goods.
    Rcq,
}

impl_str_enum!(InspectionType, "inspection type", {
    Input => "input",
    InProcess => "inprocess",
    Output => "output",
    Rcq => "rcq",
});

/// Inspection lifecycle: `draft` → `in_progress` → `submitted` (terminal).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    Draft,
    InProgress,
    Submitted,
}

impl_str_enum!(InspectionStatus, "inspection status", {
    Draft => "draft",
    InProgress => "in_progress",
    Submitted => "submitted",
});

impl InspectionStatus {
    /// Whether defects and measurements may still be recorded.
    pub fn is_open(self) -> bool {
        matches!(self, InspectionStatus::Draft | InspectionStatus::InProgress)
    }
}

/// Verdict carried by a submitted inspection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Rework,
    Hold,
    Reject,
}

impl_str_enum!(Decision, "decision", {
    Accept => "accept",
    Rework => "rework",
    Hold => "hold",
    Reject => "reject",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl_str_enum!(Severity, "severity", {
    Critical => "critical",
    Major => "major",
    Minor => "minor",
});

/// AQL percentages per severity class.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqlLevels {
    pub critical: f64,
    pub major: f64,
    pub minor: f64,
}

impl Default for AqlLevels {
    fn default() -> Self {
        Self {
            critical: 0.0,
            major: 1.5,
            minor: 4.0,
        }
    }
}

/// Per-field AQL overrides supplied when opening an inspection.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AqlOverrides {
    pub critical: Option<f64>,
    pub major: Option<f64>,
    pub minor: Option<f64>,
}

impl AqlLevels {
    /// Apply overrides on top of `self`, validating each percentage.
    pub fn with_overrides(self, overrides: AqlOverrides) -> Result<Self, DomainError> {
        let levels = Self {
            critical: overrides.critical.unwrap_or(self.critical),
            major: overrides.major.unwrap_or(self.major),
            minor: overrides.minor.unwrap_or(self.minor),
        };
        for (name, value) in [
            ("critical", levels.critical),
            ("major", levels.major),
            ("minor", levels.minor),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(DomainError::validation(format!(
                    "aql_{name} must be a percentage between 0 and 100 (got {value})"
                )));
            }
        }
        Ok(levels)
    }
}

/// A defect found while inspecting the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub id: DefectId,
    pub inspection_id: InspectionId,
    pub severity: Severity,
    pub qty: u32,
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Entity for Defect {
    type Id = DefectId;
    type Parent = InspectionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn parent(&self) -> InspectionId {
        self.inspection_id
    }
}

/// Caller input for a defect (identity is assigned on recording).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDefect {
    pub severity: Severity,
    pub qty: u32,
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl NewDefect {
    pub fn new(severity: Severity, qty: u32) -> Self {
        Self {
            severity,
            qty,
            code: None,
            name: None,
            description: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn into_defect(self, id: DefectId, inspection_id: InspectionId) -> Defect {
        Defect {
            id,
            inspection_id,
            severity: self.severity,
            qty: self.qty,
            code: self.code,
            name: self.name,
            description: self.description,
        }
    }
}

/// A measured characteristic, recorded for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub inspection_id: InspectionId,
    pub characteristic: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub pass_fail: bool,
    pub method: Option<String>,
}

impl Entity for Measurement {
    type Id = MeasurementId;
    type Parent = InspectionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn parent(&self) -> InspectionId {
        self.inspection_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeasurement {
    pub characteristic: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    /// Defaults to pass when omitted.
    pub pass_fail: Option<bool>,
    pub method: Option<String>,
}

impl NewMeasurement {
    pub fn new(characteristic: impl Into<String>, value: f64) -> Self {
        Self {
            characteristic: characteristic.into(),
            value: Some(value),
            unit: None,
            pass_fail: None,
            method: None,
        }
    }

    pub fn into_measurement(self, id: MeasurementId, inspection_id: InspectionId) -> Measurement {
        Measurement {
            id,
            inspection_id,
            characteristic: self.characteristic,
            value: self.value,
            unit: self.unit,
            pass_fail: self.pass_fail.unwrap_or(true),
            method: self.method,
        }
    }
}

/// Persisted header of an inspection (the plain record returned to callers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub id: InspectionId,
    #[serde(rename = "type")]
    pub kind: InspectionType,
    pub batch_id: BatchId,
    pub lot_size: Option<i64>,
    pub inspection_level: InspectionLevel,
    pub aql: AqlLevels,
    pub sampling: SamplingPlan,
    pub status: InspectionStatus,
    pub decision: Option<Decision>,
    pub owner: Option<ActorId>,
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Inspection header plus all of its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionDetail {
    pub inspection: InspectionRecord,
    pub defects: Vec<Defect>,
    pub measurements: Vec<Measurement>,
}

/// Aggregate root: Inspection (owns its defects and measurements).
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    record: InspectionRecord,
    defects: Vec<Defect>,
    measurements: Vec<Measurement>,
    created: bool,
}

impl Inspection {
    /// Create an empty, not-yet-opened aggregate instance.
    pub fn empty(id: InspectionId) -> Self {
        Self {
            record: InspectionRecord {
                id,
                kind: InspectionType::Input,
                batch_id: BatchId::from_uuid(Uuid::nil()),
                lot_size: None,
                inspection_level: InspectionLevel::default(),
                aql: AqlLevels::default(),
                sampling: SamplingPlan::strict_default(),
                status: InspectionStatus::Draft,
                decision: None,
                owner: None,
                note: None,
                started_at: DateTime::<Utc>::UNIX_EPOCH,
                completed_at: None,
                version: 0,
            },
            defects: Vec::new(),
            measurements: Vec::new(),
            created: false,
        }
    }

    /// Rebuild an inspection from its persisted rows.
    pub fn restore(
        record: InspectionRecord,
        defects: Vec<Defect>,
        measurements: Vec<Measurement>,
    ) -> Self {
        Self {
            record,
            defects,
            measurements,
            created: true,
        }
    }

    pub fn record(&self) -> &InspectionRecord {
        &self.record
    }

    pub fn batch_id(&self) -> BatchId {
        self.record.batch_id
    }

    pub fn status(&self) -> InspectionStatus {
        self.record.status
    }

    pub fn decision(&self) -> Option<Decision> {
        self.record.decision
    }

    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Verdict the decision rule would reach on the defects recorded so far.
    pub fn auto_decision(&self) -> Decision {
        decision::evaluate(&self.record.sampling, &self.defects)
    }

    pub fn detail(&self) -> InspectionDetail {
        InspectionDetail {
            inspection: self.record.clone(),
            defects: self.defects.clone(),
            measurements: self.measurements.clone(),
        }
    }
}

impl AggregateRoot for Inspection {
    type Id = InspectionId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }

    fn version(&self) -> u64 {
        self.record.version
    }
}

/// Command: OpenInspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInspection {
    pub inspection_id: InspectionId,
    pub kind: InspectionType,
    pub batch_id: BatchId,
    pub lot_size: Option<i64>,
    pub inspection_level: InspectionLevel,
    pub aql_overrides: AqlOverrides,
    pub note: Option<String>,
    pub owner: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDefects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDefects {
    pub inspection_id: InspectionId,
    pub defects: Vec<Defect>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMeasurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeasurements {
    pub inspection_id: InspectionId,
    pub measurements: Vec<Measurement>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitInspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitInspection {
    pub inspection_id: InspectionId,
    /// Human verdict replacing the automatic one (not checked against defects).
    pub decision_override: Option<Decision>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InspectionCommand {
    Open(OpenInspection),
    RecordDefects(RecordDefects),
    RecordMeasurements(RecordMeasurements),
    Submit(SubmitInspection),
}

/// Event: InspectionOpened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionOpened {
    pub inspection_id: InspectionId,
    pub kind: InspectionType,
    pub batch_id: BatchId,
    pub lot_size: Option<i64>,
    pub inspection_level: InspectionLevel,
    pub aql: AqlLevels,
    pub sampling: SamplingPlan,
    pub note: Option<String>,
    pub owner: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DefectsRecorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectsRecorded {
    pub inspection_id: InspectionId,
    pub defects: Vec<Defect>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MeasurementsRecorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementsRecorded {
    pub inspection_id: InspectionId,
    pub measurements: Vec<Measurement>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InspectionSubmitted.
///
/// Consumed in the submitting transaction by the batch ledger, which moves the
/// batch QC status to match `decision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionSubmitted {
    pub inspection_id: InspectionId,
    pub batch_id: BatchId,
    pub auto_decision: Decision,
    pub decision: Decision,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl InspectionSubmitted {
    pub fn is_override(&self) -> bool {
        self.auto_decision != self.decision
    }
}

impl Event for InspectionSubmitted {
    fn event_type(&self) -> &'static str {
        "quality.inspection.submitted"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InspectionEvent {
    Opened(InspectionOpened),
    DefectsRecorded(DefectsRecorded),
    MeasurementsRecorded(MeasurementsRecorded),
    Submitted(InspectionSubmitted),
}

impl Event for InspectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InspectionEvent::Opened(_) => "quality.inspection.opened",
            InspectionEvent::DefectsRecorded(_) => "quality.inspection.defects_recorded",
            InspectionEvent::MeasurementsRecorded(_) => "quality.inspection.measurements_recorded",
            InspectionEvent::Submitted(e) => e.event_type(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InspectionEvent::Opened(e) => e.occurred_at,
            InspectionEvent::DefectsRecorded(e) => e.occurred_at,
            InspectionEvent::MeasurementsRecorded(e) => e.occurred_at,
            InspectionEvent::Submitted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Inspection {
    type Command = InspectionCommand;
    type Event = InspectionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InspectionEvent::Opened(e) => {
                self.record = InspectionRecord {
                    id: e.inspection_id,
                    kind: e.kind,
                    batch_id: e.batch_id,
                    lot_size: e.lot_size,
                    inspection_level: e.inspection_level.clone(),
                    aql: e.aql,
                    sampling: e.sampling,
                    status: InspectionStatus::InProgress,
                    decision: None,
                    owner: e.owner,
                    note: e.note.clone(),
                    started_at: e.occurred_at,
                    completed_at: None,
                    version: self.record.version,
                };
                self.created = true;
            }
            InspectionEvent::DefectsRecorded(e) => {
                self.defects.extend(e.defects.iter().cloned());
            }
            InspectionEvent::MeasurementsRecorded(e) => {
                self.measurements.extend(e.measurements.iter().cloned());
            }
            InspectionEvent::Submitted(e) => {
                self.record.status = InspectionStatus::Submitted;
                self.record.decision = Some(e.decision);
                self.record.completed_at = Some(e.occurred_at);
                if let Some(note) = &e.note {
                    self.record.note = Some(match self.record.note.take() {
                        Some(prior) => format!("{prior}\n{note}"),
                        None => note.clone(),
                    });
                }
            }
        }

        self.record.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InspectionCommand::Open(cmd) => self.handle_open(cmd),
            InspectionCommand::RecordDefects(cmd) => self.handle_record_defects(cmd),
            InspectionCommand::RecordMeasurements(cmd) => self.handle_record_measurements(cmd),
            InspectionCommand::Submit(cmd) => self.handle_submit(cmd),
        }
    }
}

impl Inspection {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("inspection", self.record.id));
        }
        Ok(())
    }

    fn ensure_inspection_id(&self, inspection_id: InspectionId) -> Result<(), DomainError> {
        if self.record.id != inspection_id {
            return Err(DomainError::invariant("inspection_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.record.status.is_open() {
            return Err(DomainError::invalid_state(format!(
                "inspection {} is {}; no further changes allowed",
                self.record.id, self.record.status
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenInspection) -> Result<Vec<InspectionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("inspection already exists"));
        }
        self.ensure_inspection_id(cmd.inspection_id)?;

        let aql = AqlLevels::default().with_overrides(cmd.aql_overrides)?;
        let sampling = sampling::plan(cmd.lot_size, &cmd.inspection_level);

        Ok(vec![InspectionEvent::Opened(InspectionOpened {
            inspection_id: cmd.inspection_id,
            kind: cmd.kind,
            batch_id: cmd.batch_id,
            lot_size: cmd.lot_size,
            inspection_level: cmd.inspection_level.clone(),
            aql,
            sampling,
            note: cmd.note.clone(),
            owner: cmd.owner,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_defects(
        &self,
        cmd: &RecordDefects,
    ) -> Result<Vec<InspectionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_inspection_id(cmd.inspection_id)?;
        self.ensure_open()?;

        if cmd.defects.is_empty() {
            return Ok(vec![]);
        }
        for (idx, d) in cmd.defects.iter().enumerate() {
            if d.qty < 1 {
                return Err(DomainError::validation(format!(
                    "defect qty must be at least 1 (index {idx})"
                )));
            }
            if d.parent() != cmd.inspection_id {
                return Err(DomainError::invariant(format!(
                    "defect belongs to another inspection (index {idx})"
                )));
            }
        }

        Ok(vec![InspectionEvent::DefectsRecorded(DefectsRecorded {
            inspection_id: cmd.inspection_id,
            defects: cmd.defects.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_measurements(
        &self,
        cmd: &RecordMeasurements,
    ) -> Result<Vec<InspectionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_inspection_id(cmd.inspection_id)?;
        self.ensure_open()?;

        if cmd.measurements.is_empty() {
            return Ok(vec![]);
        }
        for (idx, m) in cmd.measurements.iter().enumerate() {
            if m.characteristic.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "measurement characteristic cannot be empty (index {idx})"
                )));
            }
            if m.value.is_some_and(|v| !v.is_finite()) {
                return Err(DomainError::validation(format!(
                    "measurement value must be finite (index {idx})"
                )));
            }
            if m.parent() != cmd.inspection_id {
                return Err(DomainError::invariant(format!(
                    "measurement belongs to another inspection (index {idx})"
                )));
            }
        }

        Ok(vec![InspectionEvent::MeasurementsRecorded(MeasurementsRecorded {
            inspection_id: cmd.inspection_id,
            measurements: cmd.measurements.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitInspection) -> Result<Vec<InspectionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_inspection_id(cmd.inspection_id)?;
        self.ensure_open()?;

        let auto_decision = self.auto_decision();
        let note = cmd
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(vec![InspectionEvent::Submitted(InspectionSubmitted {
            inspection_id: cmd.inspection_id,
            batch_id: self.record.batch_id,
            auto_decision,
            decision: cmd.decision_override.unwrap_or(auto_decision),
            note,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lotkeeper_events::execute;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()
    }

    fn open_cmd(id: InspectionId, lot_size: Option<i64>) -> InspectionCommand {
        InspectionCommand::Open(OpenInspection {
            inspection_id: id,
            kind: InspectionType::Input,
            batch_id: BatchId::new(),
            lot_size,
            inspection_level: InspectionLevel::default(),
            aql_overrides: AqlOverrides::default(),
            note: Some("incoming lot".to_string()),
            owner: Some(ActorId::new(7)),
            occurred_at: t0(),
        })
    }

    fn opened(lot_size: Option<i64>) -> Inspection {
        let id = InspectionId::new();
        let mut insp = Inspection::empty(id);
        execute(&mut insp, &open_cmd(id, lot_size)).unwrap();
        insp
    }

    fn defects(insp: &Inspection, items: &[(Severity, u32)]) -> InspectionCommand {
        let id = *insp.id();
        InspectionCommand::RecordDefects(RecordDefects {
            inspection_id: id,
            defects: items
                .iter()
                .map(|(s, q)| NewDefect::new(*s, *q).into_defect(DefectId::new(), id))
                .collect(),
            occurred_at: t0(),
        })
    }

    fn submit(insp: &Inspection, decision_override: Option<Decision>, note: Option<&str>) -> InspectionCommand {
        InspectionCommand::Submit(SubmitInspection {
            inspection_id: *insp.id(),
            decision_override,
            note: note.map(str::to_string),
            occurred_at: t0() + Duration::hours(1),
        })
    }

    #[test]
    fn open_computes_sampling_and_enters_in_progress() {
        let insp = opened(Some(120));
        let rec = insp.record();
        assert_eq!(rec.status, InspectionStatus::InProgress);
        assert_eq!(rec.sampling.sample_size, Some(20));
        assert_eq!(rec.started_at, t0());
        assert_eq!(rec.aql, AqlLevels::default());
        assert_eq!(insp.version(), 1);
    }

    #[test]
    fn open_applies_aql_overrides_and_rejects_out_of_range() {
        let id = InspectionId::new();
        let mut insp = Inspection::empty(id);
        let InspectionCommand::Open(mut cmd) = open_cmd(id, None) else {
            unreachable!()
        };
        cmd.aql_overrides.major = Some(2.5);
        execute(&mut insp, &InspectionCommand::Open(cmd.clone())).unwrap();
        assert_eq!(insp.record().aql.major, 2.5);
        assert_eq!(insp.record().aql.minor, 4.0);

        let mut fresh = Inspection::empty(id);
        cmd.aql_overrides.minor = Some(-1.0);
        let err = execute(&mut fresh, &InspectionCommand::Open(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn recording_on_unopened_inspection_is_not_found() {
        let insp = Inspection::empty(InspectionId::new());
        let err = insp.handle(&defects(&insp, &[(Severity::Minor, 1)])).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "inspection", .. }));
    }

    #[test]
    fn defect_qty_must_be_positive() {
        let insp = opened(Some(10));
        let err = insp.handle(&defects(&insp, &[(Severity::Major, 0)])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_measurement_characteristic_is_rejected() {
        let insp = opened(Some(10));
        let id = *insp.id();
        let cmd = InspectionCommand::RecordMeasurements(RecordMeasurements {
            inspection_id: id,
            measurements: vec![
                NewMeasurement::new("length", 10.2).into_measurement(MeasurementId::new(), id),
                NewMeasurement::new("  ", 1.0).into_measurement(MeasurementId::new(), id),
            ],
            occurred_at: t0(),
        });
        assert!(matches!(insp.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn measurement_pass_fail_defaults_to_pass() {
        let m = NewMeasurement::new("weight", 5.0)
            .into_measurement(MeasurementId::new(), InspectionId::new());
        assert!(m.pass_fail);
    }

    #[test]
    fn scenario_two_major_defects_reject() {
        let mut insp = opened(Some(120));
        let cmd = defects(&insp, &[(Severity::Major, 1), (Severity::Major, 1)]);
        execute(&mut insp, &cmd).unwrap();

        let cmd = submit(&insp, None, None);
        let events = execute(&mut insp, &cmd).unwrap();
        let InspectionEvent::Submitted(e) = &events[0] else {
            panic!("expected submitted event");
        };
        assert_eq!(e.decision, Decision::Reject);
        assert!(!e.is_override());
        assert_eq!(insp.status(), InspectionStatus::Submitted);
        assert_eq!(insp.decision(), Some(Decision::Reject));
    }

    #[test]
    fn override_replaces_automatic_verdict() {
        let mut insp = opened(Some(120));
        let cmd = defects(&insp, &[(Severity::Critical, 1)]);
        execute(&mut insp, &cmd).unwrap();

        let cmd = submit(&insp, Some(Decision::Accept), None);
        let events = execute(&mut insp, &cmd).unwrap();
        let InspectionEvent::Submitted(e) = &events[0] else {
            panic!("expected submitted event");
        };
        assert_eq!(e.auto_decision, Decision::Reject);
        assert_eq!(e.decision, Decision::Accept);
        assert!(e.is_override());
    }

    #[test]
    fn submit_appends_note_and_sets_completion_once() {
        let mut insp = opened(None);
        let cmd = submit(&insp, None, Some("waiver #12"));
        execute(&mut insp, &cmd).unwrap();

        let rec = insp.record().clone();
        assert_eq!(rec.note.as_deref(), Some("incoming lot\nwaiver #12"));
        assert_eq!(rec.completed_at, Some(t0() + Duration::hours(1)));

        let cmd = submit(&insp, Some(Decision::Reject), None);
        let err = execute(&mut insp, &cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(insp.record(), &rec);
    }

    #[test]
    fn submitted_inspection_rejects_new_children() {
        let mut insp = opened(None);
        let cmd = submit(&insp, None, None);
        execute(&mut insp, &cmd).unwrap();

        let err = insp.handle(&defects(&insp, &[(Severity::Minor, 1)])).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn empty_defect_list_is_a_no_op() {
        let insp = opened(None);
        assert!(insp.handle(&defects(&insp, &[])).unwrap().is_empty());
    }

    #[test]
    fn string_enums_parse_and_reject_unknown_values() {
        assert_eq!("inprocess".parse::<InspectionType>().unwrap(), InspectionType::InProcess);
        assert_eq!("IN_PROGRESS".parse::<InspectionStatus>().unwrap(), InspectionStatus::InProgress);
        assert_eq!(Decision::Hold.to_string(), "hold");
        assert!(matches!("fatal".parse::<Severity>(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn record_serializes_enums_as_strings() {
        let insp = opened(Some(60));
        let json = serde_json::to_value(insp.record()).unwrap();
        assert_eq!(json["type"], "input");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["inspection_level"], "II");
    }
}
