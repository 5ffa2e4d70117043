//! Accept/hold/reject decision rule.

use crate::inspection::{Decision, Defect, Severity};
use crate::sampling::SamplingPlan;

/// Defect quantities summed per severity class.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DefectTotals {
    pub critical: u64,
    pub major: u64,
    pub minor: u64,
}

impl DefectTotals {
    pub fn tally(defects: &[Defect]) -> Self {
        defects.iter().fold(Self::default(), |mut acc, d| {
            let qty = u64::from(d.qty);
            match d.severity {
                Severity::Critical => acc.critical += qty,
                Severity::Major => acc.major += qty,
                Severity::Minor => acc.minor += qty,
            }
            acc
        })
    }
}

/// Derive the automatic verdict for a set of defects. First match wins:
/// any critical rejects, majors at the reject number reject, minors at the
/// reject number hold, anything else is accepted.
///
/// Measurements never influence the verdict.
pub fn evaluate(plan: &SamplingPlan, defects: &[Defect]) -> Decision {
    let totals = DefectTotals::tally(defects);

    if totals.critical > 0 {
        Decision::Reject
    } else if totals.major >= u64::from(plan.reject_major) {
        Decision::Reject
    } else if totals.minor >= u64::from(plan.reject_minor) {
        Decision::Hold
    } else {
        Decision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspection::NewDefect;
    use lotkeeper_core::{DefectId, InspectionId};

    fn defects(items: &[(Severity, u32)]) -> Vec<Defect> {
        let inspection_id = InspectionId::new();
        items
            .iter()
            .map(|(s, q)| NewDefect::new(*s, *q).into_defect(DefectId::new(), inspection_id))
            .collect()
    }

    fn plan() -> SamplingPlan {
        SamplingPlan::strict_default()
    }

    #[test]
    fn no_defects_accepts() {
        assert_eq!(evaluate(&plan(), &[]), Decision::Accept);
    }

    #[test]
    fn single_critical_rejects() {
        assert_eq!(evaluate(&plan(), &defects(&[(Severity::Critical, 1)])), Decision::Reject);
    }

    #[test]
    fn major_at_reject_number_rejects() {
        assert_eq!(evaluate(&plan(), &defects(&[(Severity::Major, 1)])), Decision::Reject);
    }

    #[test]
    fn minor_below_reject_number_accepts() {
        let d = defects(&[(Severity::Minor, 2), (Severity::Minor, 1)]);
        assert_eq!(evaluate(&plan(), &d), Decision::Accept);
    }

    #[test]
    fn minor_at_reject_number_holds() {
        let d = defects(&[(Severity::Minor, 3), (Severity::Minor, 1)]);
        assert_eq!(evaluate(&plan(), &d), Decision::Hold);
    }

    #[test]
    fn critical_wins_over_minor_hold() {
        let d = defects(&[(Severity::Minor, 10), (Severity::Critical, 1)]);
        assert_eq!(evaluate(&plan(), &d), Decision::Reject);
    }

    #[test]
    fn tally_sums_quantities_per_severity() {
        let d = defects(&[
            (Severity::Major, 2),
            (Severity::Minor, 1),
            (Severity::Major, 3),
        ]);
        assert_eq!(
            DefectTotals::tally(&d),
            DefectTotals {
                critical: 0,
                major: 5,
                minor: 1
            }
        );
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn severity() -> impl Strategy<Value = Severity> {
            prop_oneof![
                Just(Severity::Critical),
                Just(Severity::Major),
                Just(Severity::Minor),
            ]
        }

        proptest! {
            /// Property: the verdict does not depend on the order defects were recorded in.
            #[test]
            fn verdict_is_order_independent(
                items in prop::collection::vec((severity(), 1u32..5), 0..12)
            ) {
                let d = defects(&items);
                let mut reversed = d.clone();
                reversed.reverse();
                prop_assert_eq!(evaluate(&plan(), &d), evaluate(&plan(), &reversed));
            }

            /// Property: any critical defect forces a reject.
            #[test]
            fn any_critical_rejects(
                items in prop::collection::vec((severity(), 1u32..5), 0..12),
                qty in 1u32..5
            ) {
                let mut items = items;
                items.push((Severity::Critical, qty));
                prop_assert_eq!(evaluate(&plan(), &defects(&items)), Decision::Reject);
            }
        }
    }
}
