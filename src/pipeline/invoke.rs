//! Per-page capability invocation with bounded retry.
//!
//! ## Retry Strategy
//!
//! Quota errors and 5xx responses are frequent under concurrent load and
//! usually clear within seconds. An unusable answer (prose instead of JSON,
//! truncated output) is also worth a second try, since sampling differs
//! between calls. Authentication failures and explicit rejections are not:
//! the same request will fail the same way.
//!
//! Backoff before retry `k` is `retry_backoff_ms * 2^(k-1)`; with 500 ms and
//! three retries that is 500 ms → 1 s → 2 s.
//!
//! Every outcome is page-scoped: this module never aborts the run.

use crate::backend::ExtractionBackend;
use crate::config::ExtractionConfig;
use crate::error::{CapabilityError, PageError};
use crate::pipeline::render::PageImage;
use crate::pipeline::schema::{self, PageExtraction};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Retry and timeout knobs for one run.
#[derive(Debug, Clone)]
pub struct InvokeSettings {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Applies to each attempt separately.
    pub attempt_timeout: Duration,
}

impl From<&ExtractionConfig> for InvokeSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            attempt_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

impl InvokeSettings {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Extract one page. Returns validated content or a page-scoped error.
pub async fn invoke_page(
    backend: &dyn ExtractionBackend,
    image: &PageImage,
    instructions: &str,
    settings: &InvokeSettings,
) -> Result<PageExtraction, PageError> {
    let page = image.page_number;
    let start = Instant::now();
    let mut last_err = None;
    let mut attempts = 0;

    for retry in 0..=settings.max_retries {
        if retry > 0 {
            let delay = settings.backoff(retry);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page,
                retry,
                settings.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
        }
        attempts += 1;

        match attempt(backend, image, instructions, settings.attempt_timeout).await {
            Ok(extraction) => {
                debug!(
                    "Page {}: {} rows after {} attempt(s), {:?}",
                    page,
                    extraction.rows.len(),
                    attempts,
                    start.elapsed()
                );
                return Ok(extraction);
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", page, attempts, e);
                let retryable = e.is_retryable();
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(match last_err {
        Some(CapabilityError::Timeout { secs }) => PageError::Timeout {
            page,
            attempts,
            secs,
        },
        Some(e) => PageError::CapabilityFailed {
            page,
            attempts,
            detail: e.to_string(),
        },
        None => PageError::CapabilityFailed {
            page,
            attempts,
            detail: "no attempt was made".to_string(),
        },
    })
}

async fn attempt(
    backend: &dyn ExtractionBackend,
    image: &PageImage,
    instructions: &str,
    limit: Duration,
) -> Result<PageExtraction, CapabilityError> {
    let text = timeout(limit, backend.invoke(image, instructions))
        .await
        .map_err(|_| CapabilityError::Timeout {
            secs: limit.as_secs(),
        })??;
    schema::parse_response(&text)
}
