//! Error types for the crimedigest-extract library.
//!
//! Four types, one per failure scope:
//!
//! * [`ExtractError`] — **Fatal**: the request cannot start or the run has to
//!   be aborted (bad input, broken PDF, no capability configured). Returned as
//!   `Err(ExtractError)` from the top-level `extract*` functions and reported
//!   as `failed` on the progress channel when it happens mid-run.
//!
//! * [`CapabilityError`] — one failed attempt against the external extraction
//!   service. Retryable attempts are retried by the invoker.
//!
//! * [`PageError`] — **Non-fatal**: a single page still failed after all
//!   retries. Surfaces as an `error` event; every other page is unaffected.
//!
//! * [`AggregationError`] — one malformed statistic entry. The entry is
//!   skipped and counted; the page itself still succeeds.

use std::path::PathBuf;
use thiserror::Error;

/// Which taxonomy bucket a fatal error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported input; nothing was processed.
    Validation,
    /// Rasterization could not proceed.
    Conversion,
    /// The extraction capability is unusable for the whole request.
    Capability,
    /// The consumer went away before the run finished.
    Cancelled,
    /// Configuration or internal failure.
    Internal,
}

/// All fatal errors returned by the crimedigest-extract library.
///
/// Page-level failures use [`PageError`] and are emitted as `error` events
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The uploaded buffer is empty.
    #[error("Document '{filename}' is empty")]
    EmptyDocument { filename: String },

    /// Only `.pdf` uploads are accepted.
    #[error("Only PDF files are allowed, got '{filename}'")]
    UnsupportedFileType { filename: String },

    /// The buffer is larger than `max_document_bytes`.
    #[error("Document '{filename}' is {size} bytes; the limit is {limit} bytes")]
    DocumentTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    /// The bytes do not start with the `%PDF` signature.
    #[error("File is not a valid PDF: '{filename}'\nFirst bytes: {magic:?}")]
    NotAPdf { filename: String, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{filename}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { filename: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{filename}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { filename: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{filename}'")]
    WrongPassword { filename: String },

    /// The PDF opened but has no pages to extract.
    #[error("PDF '{filename}' has no pages")]
    NoPages { filename: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rasterizer stopped before producing every page it announced.
    #[error("Rasterizer produced {produced} of {expected} pages")]
    PageCountMismatch { expected: usize, produced: usize },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or the directory containing it),\n\
or install pdfium where the system loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Capability errors ─────────────────────────────────────────────────
    /// No extraction backend could be constructed (missing API key etc.).
    #[error("Extraction backend '{provider}' is not configured.\n{hint}")]
    CapabilityUnavailable { provider: String, hint: String },

    // ── Run errors ────────────────────────────────────────────────────────
    /// The event receiver was dropped before the run finished.
    #[error("Consumer disconnected after {processed}/{total} pages")]
    ConsumerDisconnected { processed: usize, total: usize },

    /// The event sink (stdout, file, socket) stopped accepting writes.
    #[error("Failed to write event stream: {source}")]
    SinkWriteFailed {
        #[source]
        source: std::io::Error,
    },

    /// A streamed run ended without a `complete` event.
    #[error("Extraction aborted: {0}")]
    Aborted(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Classify this error into the request-level taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::FileNotFound { .. }
            | ExtractError::PermissionDenied { .. }
            | ExtractError::InvalidInput { .. }
            | ExtractError::DownloadFailed { .. }
            | ExtractError::DownloadTimeout { .. }
            | ExtractError::EmptyDocument { .. }
            | ExtractError::UnsupportedFileType { .. }
            | ExtractError::DocumentTooLarge { .. }
            | ExtractError::NotAPdf { .. } => ErrorKind::Validation,

            ExtractError::CorruptPdf { .. }
            | ExtractError::PasswordRequired { .. }
            | ExtractError::WrongPassword { .. }
            | ExtractError::NoPages { .. }
            | ExtractError::RasterisationFailed { .. }
            | ExtractError::PageCountMismatch { .. }
            | ExtractError::PdfiumBindingFailed(_) => ErrorKind::Conversion,

            ExtractError::CapabilityUnavailable { .. } => ErrorKind::Capability,

            ExtractError::ConsumerDisconnected { .. } | ExtractError::SinkWriteFailed { .. } => {
                ErrorKind::Cancelled
            }

            ExtractError::Aborted(_)
            | ExtractError::OutputWriteFailed { .. }
            | ExtractError::InvalidConfig(_)
            | ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// One failed attempt against the extraction capability.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    /// The attempt exceeded the per-call timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429 or an explicit quota message.
    #[error("rate limit or quota exhausted: {detail}")]
    RateLimited { detail: String },

    /// 401/403 — retrying with the same credentials will not help.
    #[error("authentication rejected: {detail}")]
    Auth { detail: String },

    /// The service refused this particular request (4xx other than 429).
    #[error("request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Transport failure or 5xx from the service.
    #[error("upstream failure: {detail}")]
    Upstream { detail: String },

    /// The service answered, but not with usable JSON.
    #[error("unusable response: {detail}")]
    Malformed { detail: String },
}

impl CapabilityError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CapabilityError::Auth { .. } | CapabilityError::Rejected { .. }
        )
    }
}

/// A non-fatal error for a single page.
///
/// Emitted as an `error` event; the run continues with the next page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Capability call failed after retries.
    #[error("Page {page}: extraction failed after {attempts} attempt(s): {detail}")]
    CapabilityFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The last attempt timed out.
    #[error("Page {page}: extraction timed out after {secs}s ({attempts} attempt(s))")]
    Timeout {
        page: usize,
        attempts: u32,
        secs: u64,
    },

    /// The invocation task itself died.
    #[error("Page {page}: extraction task failed: {detail}")]
    TaskFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::CapabilityFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::TaskFailed { page, .. } => *page,
        }
    }
}

/// Why one statistic entry was skipped during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// The entry had no usable `crime_head`.
    #[error("entry {index} on page {page} has no crime head")]
    MissingCrimeHead { page: usize, index: usize },

    /// The entry was not an object at all.
    #[error("entry {index} on page {page} is not an object")]
    NotAnObject { page: usize, index: usize },
}
