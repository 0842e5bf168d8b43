//! [`ExtractionBackend`] over any `edgequake-llm` vision provider.

use super::ExtractionBackend;
use crate::config::ExtractionConfig;
use crate::error::CapabilityError;
use crate::pipeline::encode::{to_base64, PAGE_MIME_TYPE};
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use tracing::debug;

/// Sends the instructions as the system turn and the page as an image
/// attachment on the user turn.
pub struct LlmBackend {
    name: String,
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmBackend {
    /// `name` is the provider name used to create `provider`, for logs.
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, image: &PageImage, instructions: &str) -> Result<String, CapabilityError> {
        let image_data = ImageData::new(to_base64(&image.png), PAGE_MIME_TYPE).with_detail("high");
        let messages = vec![
            ChatMessage::system(instructions),
            ChatMessage::user_with_images(
                "Extract the statistics on this page as JSON.",
                vec![image_data],
            ),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            image.page_number, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Map a provider error message onto the retry taxonomy.
///
/// edgequake-llm folds HTTP status into its error text, so classification is
/// by message content.
pub(crate) fn classify_provider_error(message: &str) -> CapabilityError {
    let lower = message.to_lowercase();
    let detail = message.to_string();

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        CapabilityError::RateLimited { detail }
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("permission")
    {
        CapabilityError::Auth { detail }
    } else if lower.contains("content_filter") || lower.contains("content filter") {
        CapabilityError::Rejected { status: 400, detail }
    } else {
        CapabilityError::Upstream { detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_classified() {
        assert!(matches!(
            classify_provider_error("HTTP 429 Too Many Requests"),
            CapabilityError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_provider_error("Resource has been exhausted (e.g. check quota)."),
            CapabilityError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_provider_error("401 Unauthorized: invalid api key"),
            CapabilityError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("finish_reason=content_filter"),
            CapabilityError::Rejected { .. }
        ));
        assert!(matches!(
            classify_provider_error("connection reset by peer"),
            CapabilityError::Upstream { .. }
        ));
    }
}
