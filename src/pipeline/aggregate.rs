//! Aggregation: validated page entries → normalized statistic records.
//!
//! One [`StatAggregator`] exists per run and owns that run's
//! [`CrimeHeadTable`]. Pages must be fed in ascending page order so that
//! first-seen-wins identity does not depend on which capability call
//! happened to finish first.
//!
//! ## Head identity
//!
//! Names are matched on a normalized key: surrounding whitespace trimmed,
//! inner whitespace collapsed, trailing `.`/`:` removed, case folded. A
//! qualified sub-head such as `Murder (attempt)`, `Hurt - grievous` or
//! `Theft: vehicle` is a head of its own; its `parent` points at the base
//! head when that base was already seen in the run.

use crate::error::AggregationError;
use crate::model::{ConvictionRecord, CrimeHead, CrimeStatistic, HeadId, PendingCaseBucket};
use crate::pipeline::schema::{PageExtraction, RawRow};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

// ── Name normalisation ───────────────────────────────────────────────────────

static RE_QUALIFIED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<base>.+?)\s*(?:\([^)]*\)|[-–:]\s+.+)$").expect("qualifier regex is valid")
});

/// Trim and collapse internal whitespace, keeping the original casing.
pub fn display_head_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity key for a crime head name.
pub fn normalize_head_name(name: &str) -> String {
    display_head_name(name)
        .trim_end_matches(['.', ':'])
        .trim_end()
        .to_lowercase()
}

/// Base head of a qualified name (`"Murder (attempt)"` → `"Murder"`).
pub fn base_head_name(name: &str) -> Option<&str> {
    RE_QUALIFIED
        .captures(name)
        .and_then(|caps| caps.name("base"))
        .map(|m| m.as_str().trim())
        .filter(|base| !base.is_empty())
}

// ── Head table ───────────────────────────────────────────────────────────────

/// Run-scoped crime-head identity table (arena + key index).
#[derive(Debug, Default)]
pub struct CrimeHeadTable {
    heads: Vec<CrimeHead>,
    by_key: HashMap<String, HeadId>,
}

impl CrimeHeadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a head by name, creating it on first sight.
    ///
    /// Returns `None` when the name normalizes to nothing. An existing head
    /// keeps its category and parent even if this sighting disagrees.
    pub fn resolve(&mut self, name: &str, category: Option<&str>) -> Option<HeadId> {
        let key = normalize_head_name(name);
        if key.is_empty() {
            return None;
        }
        if let Some(&id) = self.by_key.get(&key) {
            return Some(id);
        }

        let display = display_head_name(name);
        let parent = base_head_name(&display)
            .map(normalize_head_name)
            .filter(|base| *base != key)
            .and_then(|base| self.by_key.get(&base).copied());

        let id = HeadId(self.heads.len());
        let display_name = &display;
        debug!("New crime head #{}: {:?} (parent {:?})", id.0, display_name, parent);
        self.heads.push(CrimeHead {
            id,
            name: display,
            key: key.clone(),
            category: category
                .map(display_head_name)
                .filter(|c| !c.is_empty()),
            parent,
        });
        self.by_key.insert(key, id);
        Some(id)
    }

    pub fn get(&self, id: HeadId) -> Option<&CrimeHead> {
        self.heads.get(id.0)
    }

    pub fn find(&self, name: &str) -> Option<&CrimeHead> {
        self.by_key
            .get(&normalize_head_name(name))
            .and_then(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrimeHead> {
        self.heads.iter()
    }

    fn into_heads(self) -> Vec<CrimeHead> {
        self.heads
    }
}

// ── Aggregator ───────────────────────────────────────────────────────────────

/// One normalized row of a page, with the entry's own bucket counts.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub statistic: CrimeStatistic,
    /// Canonical (first-seen) name of the resolved head.
    pub head_name: String,
    pub category: Option<String>,
    /// This entry's pending counts, before merging.
    pub pending: [u64; 4],
}

/// Everything one page contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPage {
    pub page_number: usize,
    pub rows: Vec<AggregatedRow>,
    pub conviction: Option<ConvictionRecord>,
    pub skipped: Vec<AggregationError>,
}

/// Final state of a run's aggregator.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub heads: Vec<CrimeHead>,
    /// One merged bucket per head, in head order.
    pub pending: Vec<PendingCaseBucket>,
    pub statistics: Vec<CrimeStatistic>,
    pub convictions: Vec<ConvictionRecord>,
    pub skipped_entries: usize,
}

/// Run-scoped aggregator. Not shared across runs.
#[derive(Debug, Default)]
pub struct StatAggregator {
    heads: CrimeHeadTable,
    pending: BTreeMap<HeadId, PendingCaseBucket>,
    statistics: Vec<CrimeStatistic>,
    convictions: Vec<ConvictionRecord>,
    skipped_entries: usize,
}

impl StatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one page. Never fails; unusable rows are skipped and counted.
    pub fn aggregate_page(&mut self, page_number: usize, page: PageExtraction) -> AggregatedPage {
        let mut rows = Vec::with_capacity(page.rows.len());
        let mut skipped = Vec::new();

        for (index, row) in page.rows.into_iter().enumerate() {
            let entry = match row {
                RawRow::Entry(entry) => entry,
                RawRow::NotAnObject => {
                    skipped.push(AggregationError::NotAnObject {
                        page: page_number,
                        index,
                    });
                    continue;
                }
            };

            let head = entry
                .crime_head
                .as_deref()
                .and_then(|name| self.heads.resolve(name, entry.category.as_deref()));
            let Some(head) = head else {
                skipped.push(AggregationError::MissingCrimeHead {
                    page: page_number,
                    index,
                });
                continue;
            };

            let statistic =
                CrimeStatistic::new(head, entry.registered, entry.detected, page_number);
            let pending = entry.pending();
            self.pending
                .entry(head)
                .or_insert_with(|| PendingCaseBucket::empty(head))
                .merge(pending);
            self.statistics.push(statistic.clone());

            // `resolve` just returned this id, so the lookup cannot miss.
            let (head_name, category) = self
                .heads
                .get(head)
                .map(|h| (h.name.clone(), h.category.clone()))
                .unwrap_or_default();

            rows.push(AggregatedRow {
                statistic,
                head_name,
                category,
                pending,
            });
        }

        let conviction = page
            .conviction
            .map(|c| ConvictionRecord::new(c.decided, c.convicted, c.acquitted, page_number));
        if let Some(ref record) = conviction {
            self.convictions.push(record.clone());
        }

        for issue in &skipped {
            warn!("Skipping malformed entry: {}", issue);
        }
        self.skipped_entries += skipped.len();

        AggregatedPage {
            page_number,
            rows,
            conviction,
            skipped,
        }
    }

    pub fn heads(&self) -> &CrimeHeadTable {
        &self.heads
    }

    /// Merged bucket for a head, if the head has been seen.
    pub fn pending_for(&self, head: HeadId) -> Option<&PendingCaseBucket> {
        self.pending.get(&head)
    }

    pub fn skipped_entries(&self) -> usize {
        self.skipped_entries
    }

    /// Consume the aggregator and return the run's merged view.
    pub fn finish(self) -> RunSummary {
        RunSummary {
            heads: self.heads.into_heads(),
            pending: self.pending.into_values().collect(),
            statistics: self.statistics,
            convictions: self.convictions,
            skipped_entries: self.skipped_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::{parse_response, RawConviction, RawEntry};

    fn entry(name: &str, registered: u64, detected: u64, pending: [u64; 4]) -> RawRow {
        RawRow::Entry(RawEntry {
            crime_head: Some(name.to_string()),
            category: None,
            registered,
            detected,
            pending_0_3: pending[0],
            pending_3_6: pending[1],
            pending_6_12: pending[2],
            pending_1_year: pending[3],
        })
    }

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(normalize_head_name("  Murder "), "murder");
        assert_eq!(normalize_head_name("MURDER."), "murder");
        assert_eq!(normalize_head_name("House   breaking\tby night:"), "house breaking by night");
        assert_eq!(normalize_head_name(" . "), "");
    }

    #[test]
    fn base_names_of_qualified_heads() {
        assert_eq!(base_head_name("Murder (attempt)"), Some("Murder"));
        assert_eq!(base_head_name("Hurt - grievous"), Some("Hurt"));
        assert_eq!(base_head_name("Theft: vehicle"), Some("Theft"));
        assert_eq!(base_head_name("Anti-dowry"), None);
        assert_eq!(base_head_name("Murder"), None);
    }

    #[test]
    fn murder_example_from_report() {
        let page =
            parse_response(r#"{"crime_statistics":[{"crime_head":"Murder","registered":25,"detected":24}]}"#)
                .unwrap();
        let mut agg = StatAggregator::new();
        let out = agg.aggregate_page(1, page);

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].statistic.detection_percent, 96.0);
        assert_eq!(out.rows[0].pending, [0, 0, 0, 0]);

        let head = out.rows[0].statistic.head;
        let bucket = agg.pending_for(head).unwrap();
        assert_eq!(bucket.total(), 0);
    }

    #[test]
    fn same_head_on_two_pages_merges_buckets() {
        let mut agg = StatAggregator::new();
        let first = agg.aggregate_page(
            1,
            PageExtraction {
                rows: vec![entry("Murder", 10, 8, [1, 2, 0, 0])],
                conviction: None,
            },
        );
        let second = agg.aggregate_page(
            2,
            PageExtraction {
                rows: vec![entry("  murder ", 5, 5, [0, 1, 1, 4])],
                conviction: None,
            },
        );

        let id = first.rows[0].statistic.head;
        assert_eq!(second.rows[0].statistic.head, id);
        assert_eq!(second.rows[0].head_name, "Murder");
        assert_eq!(agg.heads().len(), 1);

        let bucket = agg.pending_for(id).unwrap();
        assert_eq!(
            (bucket.pending_0_3, bucket.pending_3_6, bucket.pending_6_12, bucket.pending_1_year),
            (1, 3, 1, 4)
        );

        let summary = agg.finish();
        assert_eq!(summary.pending.len(), 1);
        assert_eq!(summary.statistics.len(), 2);
        assert_eq!(summary.statistics[1].page_number, 2);
    }

    #[test]
    fn first_seen_category_wins() {
        let mut table = CrimeHeadTable::new();
        let a = table.resolve("Robbery", Some("Property")).unwrap();
        let b = table.resolve("ROBBERY", Some("Violent")).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.get(a).unwrap().category.as_deref(), Some("Property"));
    }

    #[test]
    fn qualified_head_gets_parent_when_base_known() {
        let mut table = CrimeHeadTable::new();
        let murder = table.resolve("Murder", None).unwrap();
        let attempt = table.resolve("Murder (attempt)", None).unwrap();
        assert_ne!(murder, attempt);
        assert_eq!(table.get(attempt).unwrap().parent, Some(murder));

        // Base seen only later: parent stays unset.
        let grievous = table.resolve("Hurt - grievous", None).unwrap();
        table.resolve("Hurt", None).unwrap();
        assert_eq!(table.get(grievous).unwrap().parent, None);
    }

    #[test]
    fn malformed_rows_are_soft_losses() {
        let mut agg = StatAggregator::new();
        let nameless = RawEntry {
            registered: 4,
            ..Default::default()
        };
        let out = agg.aggregate_page(
            3,
            PageExtraction {
                rows: vec![
                    RawRow::NotAnObject,
                    RawRow::Entry(nameless),
                    entry("Riot", 2, 1, [0; 4]),
                ],
                conviction: None,
            },
        );
        assert_eq!(out.rows.len(), 1);
        assert_eq!(
            out.skipped,
            vec![
                AggregationError::NotAnObject { page: 3, index: 0 },
                AggregationError::MissingCrimeHead { page: 3, index: 1 },
            ]
        );
        assert_eq!(agg.skipped_entries(), 2);
    }

    #[test]
    fn conviction_block_applies_fallback() {
        let mut agg = StatAggregator::new();
        let out = agg.aggregate_page(
            7,
            PageExtraction {
                rows: vec![],
                conviction: Some(RawConviction {
                    decided: 0,
                    convicted: 17,
                    acquitted: 3,
                }),
            },
        );
        let c = out.conviction.unwrap();
        assert_eq!(c.decided, 20);
        assert_eq!(c.conviction_percent, 85.0);
        assert_eq!(c.page_number, 7);
        assert_eq!(agg.finish().convictions.len(), 1);
    }
}
