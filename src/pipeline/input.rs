//! Input resolution and validation.
//!
//! A [`Document`] is the unit of work: a filename and its bytes. It can be
//! built from an upload buffer, a local path, or an HTTP(S) URL. Validation
//! happens here, before any rendering, so malformed input fails the request
//! without emitting a single event.

use crate::error::ExtractError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Upload limit inherited from the report-intake service (16 MiB).
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Source document for one extraction run.
#[derive(Clone)]
pub struct Document {
    filename: String,
    bytes: Vec<u8>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl Document {
    /// Wrap an in-memory buffer. Only a path-free basename is kept.
    pub fn new(filename: impl AsRef<str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: sanitize_filename(filename.as_ref()),
            bytes,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reject anything that is not a plausible PDF within the size limit.
    pub fn validate(&self, max_bytes: usize) -> Result<(), ExtractError> {
        let filename = self.filename.clone();

        if !has_pdf_extension(&self.filename) {
            return Err(ExtractError::UnsupportedFileType { filename });
        }
        if self.bytes.is_empty() {
            return Err(ExtractError::EmptyDocument { filename });
        }
        if self.bytes.len() > max_bytes {
            return Err(ExtractError::DocumentTooLarge {
                filename,
                size: self.bytes.len(),
                limit: max_bytes,
            });
        }
        if !self.bytes.starts_with(b"%PDF") {
            let mut magic = [0u8; 4];
            let n = self.bytes.len().min(4);
            magic[..n].copy_from_slice(&self.bytes[..n]);
            return Err(ExtractError::NotAPdf { filename, magic });
        }
        Ok(())
    }
}

/// Keep only the last path component and drop characters that are unsafe
/// in a filename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned
    }
}

fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL into a [`Document`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(ExtractError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<Document, ExtractError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(Document::new(filename, bytes))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(Document::new(filename_from_url(url), bytes.to_vec()))
}

/// Last path segment of the URL when it looks like a file, else a default.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Path of a local input, for messages.
pub fn display_path(input: &str) -> PathBuf {
    PathBuf::from(input)
}
