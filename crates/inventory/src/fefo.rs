//! First-expiry-first-out batch selection.

use core::cmp::Ordering;

use crate::batch::BatchRecord;

/// FEFO order: expiry ascending, batches without expiry last.
///
/// Ties are left to the caller's input order (the sort is stable), which the
/// stores keep as creation order.
pub fn fefo_cmp(a: &BatchRecord, b: &BatchRecord) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Filter to exportable batches and sort them in FEFO order.
pub fn eligible_in_fefo_order<I>(batches: I) -> Vec<BatchRecord>
where
    I: IntoIterator<Item = BatchRecord>,
{
    let mut eligible: Vec<BatchRecord> = batches
        .into_iter()
        .filter(BatchRecord::is_exportable)
        .collect();
    eligible.sort_by(fefo_cmp);
    eligible
}
