//! Wire types: streamed events and the non-streaming response.
//!
//! ## NDJSON protocol
//!
//! ```text
//! {"type":"start","filename":"sept.pdf","total_pages":5}
//! {"type":"page","page_number":1,"crime_statistics":[...],"conviction_stats":{...}}
//! {"type":"error","page_number":3,"error":"..."}
//! {"type":"complete","total_processed":5}
//! ```
//!
//! Statistics also carry `detection_percent` (and `category` when known),
//! conviction blocks carry `conviction_percent`, and a page carries
//! `skipped_entries` only when it dropped malformed rows. Consumers that
//! ignore unknown keys see the base protocol unchanged.

use crate::pipeline::aggregate::{AggregatedPage, AggregatedRow, RunSummary};
use crate::model::ConvictionRecord;
use serde::{Deserialize, Serialize};

/// One framed unit of the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractionEvent {
    Start {
        filename: String,
        total_pages: usize,
    },
    Page(PagePayload),
    /// Page-scoped when `page_number` is set; otherwise the run aborted.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_number: Option<usize>,
        error: String,
    },
    Complete {
        total_processed: usize,
    },
}

impl ExtractionEvent {
    pub fn page_error(page_number: usize, error: impl Into<String>) -> Self {
        ExtractionEvent::Error {
            page_number: Some(page_number),
            error: error.into(),
        }
    }

    /// Page this event belongs to, if any.
    pub fn page_number(&self) -> Option<usize> {
        match self {
            ExtractionEvent::Page(p) => Some(p.page_number),
            ExtractionEvent::Error { page_number, .. } => *page_number,
            _ => None,
        }
    }

    /// Serialize as one NDJSON line, including the trailing newline.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Body of a `page` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePayload {
    pub page_number: usize,
    pub crime_statistics: Vec<StatisticRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conviction_stats: Option<ConvictionStats>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRow {
    pub crime_head: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub registered: u64,
    pub detected: u64,
    pub pending_0_3: u64,
    pub pending_3_6: u64,
    pub pending_6_12: u64,
    pub pending_1_year: u64,
    pub detection_percent: f64,
}

/// Conviction block; `decided` is after the fallback rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvictionStats {
    pub decided: u64,
    pub convicted: u64,
    pub acquitted: u64,
    pub conviction_percent: f64,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl From<&AggregatedRow> for StatisticRow {
    fn from(row: &AggregatedRow) -> Self {
        let [p03, p36, p612, p1y] = row.pending;
        Self {
            crime_head: row.head_name.clone(),
            category: row.category.clone(),
            registered: row.statistic.registered,
            detected: row.statistic.detected,
            pending_0_3: p03,
            pending_3_6: p36,
            pending_6_12: p612,
            pending_1_year: p1y,
            detection_percent: row.statistic.detection_percent,
        }
    }
}

impl From<&ConvictionRecord> for ConvictionStats {
    fn from(c: &ConvictionRecord) -> Self {
        Self {
            decided: c.decided,
            convicted: c.convicted,
            acquitted: c.acquitted,
            conviction_percent: c.conviction_percent,
        }
    }
}

impl From<&AggregatedPage> for PagePayload {
    fn from(page: &AggregatedPage) -> Self {
        Self {
            page_number: page.page_number,
            crime_statistics: page.rows.iter().map(StatisticRow::from).collect(),
            conviction_stats: page.conviction.as_ref().map(ConvictionStats::from),
            skipped_entries: page.skipped.len(),
        }
    }
}

// ── Non-streaming mode ───────────────────────────────────────────────────────

/// One element of `data`: the page object, or `{page_number, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageOutcome {
    Page(PagePayload),
    Error { page_number: usize, error: String },
}

impl PageOutcome {
    pub fn page_number(&self) -> usize {
        match self {
            PageOutcome::Page(p) => p.page_number,
            PageOutcome::Error { page_number, .. } => *page_number,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PageOutcome::Error { .. })
    }
}

/// Pending-case totals for one head across the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRow {
    pub crime_head: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub pending_0_3: u64,
    pub pending_3_6: u64,
    pub pending_6_12: u64,
    pub pending_1_year: u64,
    pub total: u64,
}

/// Everything a finished run produced, in page order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub filename: String,
    pub total_pages: usize,
    pub total_processed: usize,
    pub failed_pages: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped_entries: usize,
    pub data: Vec<PageOutcome>,
    pub pending_by_head: Vec<PendingRow>,
}

impl ExtractionReport {
    pub fn new(
        filename: impl Into<String>,
        total_pages: usize,
        data: Vec<PageOutcome>,
        summary: &RunSummary,
    ) -> Self {
        let pending_by_head = summary
            .pending
            .iter()
            .filter_map(|bucket| {
                let head = summary.heads.get(bucket.head.0)?;
                Some(PendingRow {
                    crime_head: head.name.clone(),
                    category: head.category.clone(),
                    pending_0_3: bucket.pending_0_3,
                    pending_3_6: bucket.pending_3_6,
                    pending_6_12: bucket.pending_6_12,
                    pending_1_year: bucket.pending_1_year,
                    total: bucket.total(),
                })
            })
            .collect();

        Self {
            filename: filename.into(),
            total_pages,
            total_processed: data.len(),
            failed_pages: data.iter().filter(|d| d.is_error()).count(),
            skipped_entries: summary.skipped_entries,
            data,
            pending_by_head,
        }
    }
}

/// Top-level non-streaming body: `{"success":true,...}` or
/// `{"success":false,"error":...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: Option<ExtractionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResponse {
    pub fn success(report: ExtractionReport) -> Self {
        Self {
            success: true,
            report: Some(report),
            error: None,
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            report: None,
            error: Some(error.to_string()),
        }
    }

    /// Compact single-line form with a trailing newline, for NDJSON sinks
    /// that fail before a `start` event could be written.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl<E: std::fmt::Display> From<Result<ExtractionReport, E>> for ExtractionResponse {
    fn from(result: Result<ExtractionReport, E>) -> Self {
        match result {
            Ok(report) => Self::success(report),
            Err(e) => Self::failure(e),
        }
    }
}
