//! Sampling planner.
//!
//! A bucketed approximation of ISO 2859-1 general inspection: only the sample
//! size depends on the lot size, the major/minor acceptance numbers are fixed.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use lotkeeper_core::DomainError;

/// Accept/reject numbers used when no lot size is known, and for every bucket.
const ACCEPT_MAJOR: u32 = 0;
const REJECT_MAJOR: u32 = 1;
const ACCEPT_MINOR: u32 = 3;
const REJECT_MINOR: u32 = 4;

/// Inspection level (e.g. `I`, `II`, `III`, `S-1`..`S-4`).
///
/// Carried for traceability; the simplified planner does not vary by level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InspectionLevel(String);

impl InspectionLevel {
    pub const DEFAULT: &'static str = "II";

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InspectionLevel {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl FromStr for InspectionLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("inspection level cannot be empty"));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl core::fmt::Display for InspectionLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sample size and acceptance thresholds for one inspection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingPlan {
    /// `None` when the lot size was unknown or non-positive.
    pub sample_size: Option<u32>,
    pub accept_major: u32,
    pub reject_major: u32,
    pub accept_minor: u32,
    pub reject_minor: u32,
}

impl SamplingPlan {
    /// Conservative plan used when no lot size is available.
    pub fn strict_default() -> Self {
        Self {
            sample_size: None,
            accept_major: ACCEPT_MAJOR,
            reject_major: REJECT_MAJOR,
            accept_minor: ACCEPT_MINOR,
            reject_minor: REJECT_MINOR,
        }
    }
}

/// Compute the sampling plan for a lot.
pub fn plan(lot_size: Option<i64>, _level: &InspectionLevel) -> SamplingPlan {
    let lot_size = match lot_size {
        Some(n) if n > 0 => n,
        _ => return SamplingPlan::strict_default(),
    };

    let sample_size = match lot_size {
        n if n <= 50 => n.min(13) as u32,
        n if n <= 150 => 20,
        n if n <= 500 => 32,
        n if n <= 1200 => 50,
        _ => 80,
    };

    SamplingPlan {
        sample_size: Some(sample_size),
        ..SamplingPlan::strict_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level() -> InspectionLevel {
        InspectionLevel::default()
    }

    #[test]
    fn missing_or_non_positive_lot_uses_strict_default() {
        for lot in [None, Some(0), Some(-5)] {
            let p = plan(lot, &level());
            assert_eq!(p, SamplingPlan::strict_default());
            assert_eq!(p.sample_size, None);
        }
    }

    #[test]
    fn bucket_boundaries() {
        let cases = [
            (1, 1),
            (13, 13),
            (14, 13),
            (50, 13),
            (51, 20),
            (120, 20),
            (150, 20),
            (151, 32),
            (500, 32),
            (501, 50),
            (1200, 50),
            (1201, 80),
            (100_000, 80),
        ];
        for (lot, expected) in cases {
            assert_eq!(plan(Some(lot), &level()).sample_size, Some(expected), "lot {lot}");
        }
    }

    #[test]
    fn thresholds_do_not_depend_on_bucket() {
        let small = plan(Some(10), &level());
        let large = plan(Some(5000), &level());
        assert_eq!(small.reject_major, 1);
        assert_eq!(small.reject_minor, 4);
        assert_eq!(
            (small.accept_major, small.reject_major, small.accept_minor, small.reject_minor),
            (large.accept_major, large.reject_major, large.accept_minor, large.reject_minor)
        );
    }

    #[test]
    fn level_parsing_normalises_and_rejects_blank() {
        assert_eq!("ii".parse::<InspectionLevel>().unwrap().as_str(), "II");
        assert_eq!(" s-2 ".parse::<InspectionLevel>().unwrap().as_str(), "S-2");
        assert!(matches!(
            "  ".parse::<InspectionLevel>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: the sample never exceeds the lot and never shrinks as the lot grows.
            #[test]
            fn sample_is_bounded_and_monotonic(lot in 1i64..10_000, extra in 0i64..10_000) {
                let a = plan(Some(lot), &InspectionLevel::default()).sample_size.unwrap();
                let b = plan(Some(lot + extra), &InspectionLevel::default()).sample_size.unwrap();
                prop_assert!(i64::from(a) <= lot);
                prop_assert!(a <= b);
            }
        }
    }
}
