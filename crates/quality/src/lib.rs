//! Quality-control domain module.
//!
//! Sampling plans, the inspection aggregate with its lifecycle, and the
//! accept/hold/reject decision rule. Pure domain logic (no IO, no storage).

pub mod decision;
pub mod inspection;
pub mod sampling;

pub use decision::{DefectTotals, evaluate};
pub use inspection::{
    AqlLevels, AqlOverrides, Decision, Defect, DefectsRecorded, Inspection, InspectionCommand,
    InspectionDetail, InspectionEvent, InspectionOpened, InspectionRecord, InspectionStatus,
    InspectionSubmitted, InspectionType, Measurement, MeasurementsRecorded, NewDefect,
    NewMeasurement, OpenInspection, RecordDefects, RecordMeasurements, Severity,
    SubmitInspection,
};
pub use sampling::{InspectionLevel, SamplingPlan, plan};
