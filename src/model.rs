//! Normalized statistics model produced by the aggregator.
//!
//! Every record here is scoped to one extraction run. Crime heads are
//! referenced by [`HeadId`], an index into the run's
//! [`crate::pipeline::aggregate::CrimeHeadTable`], never by name.

use serde::{Deserialize, Serialize};

/// Index of a [`CrimeHead`] inside the run's head table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeadId(pub usize);

/// A named offense category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeHead {
    pub id: HeadId,
    /// Display name as first seen in the run (trimmed, whitespace collapsed).
    pub name: String,
    /// Identity key: see [`crate::pipeline::aggregate::normalize_head_name`].
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<HeadId>,
}

/// Registered/detected counts for one head on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrimeStatistic {
    pub head: HeadId,
    pub registered: u64,
    pub detected: u64,
    pub detection_percent: f64,
    pub page_number: usize,
}

impl CrimeStatistic {
    pub fn new(head: HeadId, registered: u64, detected: u64, page_number: usize) -> Self {
        Self {
            head,
            registered,
            detected,
            detection_percent: percent(detected, registered),
            page_number,
        }
    }
}

/// Pending-case counts for one head, merged across the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCaseBucket {
    pub head: HeadId,
    pub pending_0_3: u64,
    pub pending_3_6: u64,
    pub pending_6_12: u64,
    pub pending_1_year: u64,
}

impl PendingCaseBucket {
    pub fn empty(head: HeadId) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }

    /// Fold another sighting of the same head into this bucket.
    pub fn merge(&mut self, counts: [u64; 4]) {
        self.pending_0_3 = self.pending_0_3.saturating_add(counts[0]);
        self.pending_3_6 = self.pending_3_6.saturating_add(counts[1]);
        self.pending_6_12 = self.pending_6_12.saturating_add(counts[2]);
        self.pending_1_year = self.pending_1_year.saturating_add(counts[3]);
    }

    pub fn total(&self) -> u64 {
        self.pending_0_3
            .saturating_add(self.pending_3_6)
            .saturating_add(self.pending_6_12)
            .saturating_add(self.pending_1_year)
    }
}

/// Judicial outcome counts reported on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvictionRecord {
    /// Decided count after the fallback rule has been applied.
    pub decided: u64,
    pub convicted: u64,
    pub acquitted: u64,
    pub conviction_percent: f64,
    pub page_number: usize,
}

impl ConvictionRecord {
    /// Build a record, substituting `convicted + acquitted` for a zero
    /// `decided` count.
    pub fn new(decided: u64, convicted: u64, acquitted: u64, page_number: usize) -> Self {
        let outcomes = convicted.saturating_add(acquitted);
        let decided = if decided == 0 && outcomes > 0 {
            outcomes
        } else {
            decided
        };
        Self {
            decided,
            convicted,
            acquitted,
            conviction_percent: percent(convicted, decided),
            page_number,
        }
    }
}

/// `round(part / whole * 100, 2)`, or `0.0` when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_percent_from_counts() {
        let s = CrimeStatistic::new(HeadId(0), 25, 24, 1);
        assert_eq!(s.detection_percent, 96.0);
    }

    #[test]
    fn detection_percent_zero_when_nothing_registered() {
        let s = CrimeStatistic::new(HeadId(0), 0, 7, 1);
        assert_eq!(s.detection_percent, 0.0);
    }

    #[test]
    fn detection_percent_rounds_to_two_places() {
        let s = CrimeStatistic::new(HeadId(0), 3, 1, 1);
        assert_eq!(s.detection_percent, 33.33);
        let s = CrimeStatistic::new(HeadId(0), 3, 2, 1);
        assert_eq!(s.detection_percent, 66.67);
    }

    #[test]
    fn conviction_uses_outcomes_when_decided_missing() {
        let c = ConvictionRecord::new(0, 17, 3, 4);
        assert_eq!(c.decided, 20);
        assert_eq!(c.conviction_percent, 85.0);
    }

    #[test]
    fn conviction_keeps_reported_decided() {
        let c = ConvictionRecord::new(40, 10, 5, 4);
        assert_eq!(c.decided, 40);
        assert_eq!(c.conviction_percent, 25.0);
    }

    #[test]
    fn conviction_all_zero() {
        let c = ConvictionRecord::new(0, 0, 0, 1);
        assert_eq!(c.decided, 0);
        assert_eq!(c.conviction_percent, 0.0);
    }

    #[test]
    fn bucket_merge_sums() {
        let mut b = PendingCaseBucket::empty(HeadId(2));
        b.merge([1, 2, 3, 4]);
        b.merge([10, 0, 0, 1]);
        assert_eq!(b.pending_0_3, 11);
        assert_eq!(b.pending_1_year, 5);
        assert_eq!(b.total(), 21);
    }
}
