//! Configuration for an extraction run.
//!
//! Every knob lives in [`ExtractionConfig`], built via
//! [`ExtractionConfig::builder()`]. Collaborators that are normally resolved
//! at run time (the extraction backend, the rasterizer) can be injected here
//! instead, which is how the integration tests drive the pipeline without
//! pdfium or network access.

use crate::backend::ExtractionBackend;
use crate::error::ExtractError;
use crate::pipeline::input::DEFAULT_MAX_DOCUMENT_BYTES;
use crate::pipeline::render::{Rasterizer, RenderOptions};
use crate::progress::ProgressObserver;
use std::fmt;
use std::sync::Arc;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use crimedigest_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(150)
///     .concurrency(2)
///     .provider_name("gemini-rest")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI. Range: 72–400. Default: 200.
    ///
    /// Report tables are printed in small type; below ~150 DPI digits in
    /// narrow columns start to blur together.
    pub dpi: u32,

    /// Cap on either rendered dimension, in pixels. Default: 2400.
    pub max_rendered_pixels: u32,

    /// Maximum number of pages in flight against the capability. Default: 4.
    ///
    /// Also the width of the reorder window, so it bounds how many finished
    /// pages can wait on a slow predecessor.
    pub concurrency: usize,

    /// Model identifier passed to the backend. If None, the backend default.
    pub model: Option<String>,

    /// Backend name: `"gemini-rest"` or any edgequake-llm provider
    /// (`"openai"`, `"anthropic"`, `"gemini"`, `"ollama"`, …).
    pub provider_name: Option<String>,

    /// Pre-built backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn ExtractionBackend>>,

    /// Custom rasterizer. Default: pdfium.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Output token cap per page. Default: 8192.
    ///
    /// A dense statistics page with sixty crime heads serialises to roughly
    /// 5k tokens of JSON; truncation yields unparseable output.
    pub max_tokens: usize,

    /// Retries after the first failed attempt. Default: 3.
    pub max_retries: u32,

    /// Base backoff in milliseconds; doubles each retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-attempt timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Instruction override. If None, [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub instructions: Option<String>,

    /// PDF user password.
    pub password: Option<String>,

    /// Largest accepted document in bytes. Default: 16 MiB.
    pub max_document_bytes: usize,

    /// Download timeout for URL inputs, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Capacity of the outgoing event channel. Default: 1.
    pub event_buffer: usize,

    /// Rendered pages allowed ahead of the invoker. Default: 2.
    pub render_buffer: usize,

    /// Receives every progress snapshot.
    pub progress_observer: Option<Arc<dyn ProgressObserver>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2400,
            concurrency: 4,
            model: None,
            provider_name: None,
            backend: None,
            rasterizer: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            instructions: None,
            password: None,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            download_timeout_secs: 120,
            event_buffer: 1,
            render_buffer: 2,
            progress_observer: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("instructions", &self.instructions.as_ref().map(|s| s.len()))
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("max_document_bytes", &self.max_document_bytes)
            .field("event_buffer", &self.event_buffer)
            .field("render_buffer", &self.render_buffer)
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub(crate) fn render_options(&self) -> RenderOptions {
        RenderOptions {
            dpi: self.dpi,
            max_rendered_pixels: self.max_rendered_pixels,
            password: self.password.clone(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtractionConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    /// Not clamped; out-of-range values are rejected by [`Self::build`].
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ExtractionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn max_document_bytes(mut self, n: usize) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn event_buffer(mut self, n: usize) -> Self {
        self.config.event_buffer = n;
        self
    }

    pub fn render_buffer(mut self, n: usize) -> Self {
        self.config.render_buffer = n;
        self
    }

    pub fn progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.config.progress_observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.event_buffer == 0 || c.render_buffer == 0 {
            return Err(ExtractError::InvalidConfig(
                "Channel buffers must hold at least one item".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.max_document_bytes == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_document_bytes must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.dpi, 200);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_backoff_ms, 500);
        assert_eq!(c.max_document_bytes, 16 * 1024 * 1024);
        assert_eq!(c.event_buffer, 1);
        assert!(c.backend.is_none());
    }

    #[test]
    fn build_rejects_bad_values() {
        assert!(ExtractionConfig::builder().dpi(50).build().is_err());
        assert!(ExtractionConfig::builder().dpi(401).build().is_err());
        assert!(ExtractionConfig::builder().concurrency(0).build().is_err());
        assert!(ExtractionConfig::builder().event_buffer(0).build().is_err());
        assert!(ExtractionConfig::builder().api_timeout_secs(0).build().is_err());
        assert!(ExtractionConfig::builder().dpi(72).build().is_ok());
    }

    #[test]
    fn debug_hides_password() {
        let c = ExtractionConfig::builder()
            .password("hunter2")
            .build()
            .unwrap();
        let s = format!("{:?}", c);
        assert!(!s.contains("hunter2"));
        assert!(s.contains("***"));
    }
}
