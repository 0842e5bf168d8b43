//! # crimedigest-extract
//!
//! Turn scanned police crime-review PDFs into structured statistics using a
//! vision-capable extraction service, streaming results page by page.
//!
//! ## Why stream?
//!
//! A 100-page report takes minutes to read through a vision model. Emitting
//! each page as soon as it (and every page before it) is done lets callers
//! persist progress incrementally and keeps HTTP front-ends under their
//! request timeouts.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      bytes / path / URL, validated before anything else
//!  ├─ 2. Render     pdfium on the blocking pool, bounded look-ahead
//!  ├─ 3. Invoke     ≤ concurrency backend calls, timeout + retry per page
//!  ├─ 4. Reorder    strictly ascending page order
//!  ├─ 5. Aggregate  crime heads, pending buckets, detection / conviction %
//!  └─ 6. Emit       start → page | error … → complete (NDJSON)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crimedigest_extract::{extract_stream, write_ndjson, Document, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let bytes = std::fs::read("september.pdf")?;
//!     let run = extract_stream(Document::new("september.pdf", bytes), &config).await?;
//!     let summary = write_ndjson(run, &mut tokio::io::stdout()).await?;
//!     eprintln!("{} crime heads", summary.heads.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `crimedigest` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{resolve_backend, ExtractionBackend, GeminiBackend, LlmBackend};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{AggregationError, CapabilityError, ErrorKind, ExtractError, PageError};
pub use extract::{
    extract, extract_from_input, extract_sync, extract_to_file, inspect, inspect_document,
    DocumentInfo,
};
pub use model::{ConvictionRecord, CrimeHead, CrimeStatistic, HeadId, PendingCaseBucket};
pub use output::{
    ConvictionStats, ExtractionEvent, ExtractionReport, ExtractionResponse, PageOutcome,
    PagePayload, PendingRow, StatisticRow,
};
pub use pipeline::aggregate::{CrimeHeadTable, RunSummary, StatAggregator};
pub use pipeline::input::Document;
pub use pipeline::render::{PageImage, PageSink, PdfiumRasterizer, Rasterizer, RenderOptions};
pub use progress::{NoopProgressObserver, ProgressObserver, ProgressState, ProgressTracker, RunStatus};
pub use stream::{extract_stream, write_ndjson, ExtractionRun};
