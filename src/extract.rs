//! Non-streaming entry points.
//!
//! These collect the event stream of [`crate::stream::extract_stream`] into
//! an [`ExtractionReport`]. A run that aborts half-way is a whole-request
//! failure here: callers get `Err`, never a partial report.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::{ExtractionEvent, ExtractionReport, ExtractionResponse, PageOutcome};
use crate::pipeline::input::{self, Document};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::stream::extract_stream;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Extract all pages of `document` and return them in page order.
///
/// # Errors
/// Validation, conversion and backend-resolution failures, and any run that
/// ends without a `complete` event. Individual page failures are not errors:
/// they appear as [`PageOutcome::Error`] entries in `data`.
pub async fn extract(
    document: Document,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, ExtractError> {
    let mut run = extract_stream(document, config).await?;
    let filename = run.filename().to_string();
    let total_pages = run.total_pages();

    let mut data = Vec::with_capacity(total_pages);
    let mut completed = false;
    let mut abort_reason = None;

    while let Some(event) = run.next_event().await {
        match event {
            ExtractionEvent::Start { .. } => {}
            ExtractionEvent::Page(page) => data.push(PageOutcome::Page(page)),
            ExtractionEvent::Error {
                page_number: Some(page_number),
                error,
            } => data.push(PageOutcome::Error { page_number, error }),
            ExtractionEvent::Error {
                page_number: None,
                error,
            } => abort_reason = Some(error),
            ExtractionEvent::Complete { .. } => completed = true,
        }
    }

    let summary = run.finish().await?;
    if !completed {
        return Err(ExtractError::Aborted(
            abort_reason.unwrap_or_else(|| "run ended without completing".to_string()),
        ));
    }

    let report = ExtractionReport::new(filename, total_pages, data, &summary);
    info!(
        "Report ready: {}/{} pages ok",
        report.total_processed - report.failed_pages,
        report.total_pages
    );
    Ok(report)
}

/// Resolve a local path or HTTP(S) URL, then [`extract`].
pub async fn extract_from_input(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, ExtractError> {
    let document = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    extract(document, config).await
}

/// Synchronous wrapper around [`extract_from_input`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_from_input(input_str, config))
}

/// Run [`extract_from_input`] and write the response object to `output_path`.
///
/// The body is `{"success":false,"error":..}` when extraction fails. The file
/// is written atomically (temp file in the same directory, then rename).
/// Returns the extraction result after the file has been written.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, ExtractError> {
    let result = extract_from_input(input_str, config).await;
    let response = match &result {
        Ok(report) => ExtractionResponse::success(report.clone()),
        Err(e) => ExtractionResponse::failure(e),
    };
    write_json_atomic(output_path.as_ref(), &response).await?;
    result
}

/// Serialize `value` as pretty JSON into `path` via a sibling temp file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ExtractError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| ExtractError::Internal(format!("response serialisation: {e}")))?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let write_err = |source: std::io::Error| ExtractError::OutputWriteFailed {
            path: path.clone(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(&body).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        Ok::<(), ExtractError>(())
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("write task failed: {e}")))?
}

/// What [`inspect`] reports about a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub size_bytes: usize,
    pub page_count: usize,
}

/// Validate a document and count its pages without contacting any backend.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, ExtractError> {
    let document = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    inspect_document(document, config).await
}

/// [`inspect`] for an in-memory document.
pub async fn inspect_document(
    document: Document,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, ExtractError> {
    document.validate(config.max_document_bytes)?;
    let rasterizer = config
        .rasterizer
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumRasterizer) as Arc<dyn Rasterizer>);
    let options = config.render_options();

    tokio::task::spawn_blocking(move || {
        let page_count = rasterizer.page_count(&document, &options)?;
        Ok::<_, ExtractError>(DocumentInfo {
            filename: document.filename().to_string(),
            size_bytes: document.len(),
            page_count,
        })
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Inspect task panicked: {e}")))?
}
