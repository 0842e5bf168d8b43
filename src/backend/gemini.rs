//! Direct REST backend for Gemini `generateContent`.
//!
//! Asks for `responseMimeType: application/json`, which makes the model
//! return bare JSON without Markdown fences most of the time. The schema
//! layer still copes when it does not.

use super::ExtractionBackend;
use crate::config::ExtractionConfig;
use crate::error::{CapabilityError, ExtractError};
use crate::pipeline::encode::{to_base64, PAGE_MIME_TYPE};
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini REST client for one run.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ExtractError::CapabilityUnavailable {
                provider: super::GEMINI_REST.to_string(),
                hint: format!("could not build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Read `GEMINI_API_KEY` (and optionally `GEMINI_BASE_URL`).
    pub fn from_env(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ExtractError::CapabilityUnavailable {
                provider: super::GEMINI_REST.to_string(),
                hint: "Set GEMINI_API_KEY to use the Gemini REST backend.".to_string(),
            })?;

        let backend = Self::new(api_key, config)?;
        Ok(match std::env::var("GEMINI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => backend.with_base_url(url),
            _ => backend,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body<'a>(&self, image_b64: &'a str, instructions: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: instructions },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: PAGE_MIME_TYPE,
                            data: image_b64,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    fn name(&self) -> &str {
        super::GEMINI_REST
    }

    async fn invoke(&self, image: &PageImage, instructions: &str) -> Result<String, CapabilityError> {
        let b64 = to_base64(&image.png);
        let body = self.request_body(&b64, instructions);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Upstream {
                detail: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| CapabilityError::Upstream {
            detail: format!("reading response body: {e}"),
        })?;

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &text));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| CapabilityError::Malformed {
                detail: format!("generateContent envelope: {e}"),
            })?;
        let content = parsed.first_text().ok_or_else(|| CapabilityError::Malformed {
            detail: match parsed.prompt_feedback.and_then(|f| f.block_reason) {
                Some(reason) => format!("prompt blocked: {reason}"),
                None => "no candidate text in response".to_string(),
            },
        })?;

        debug!("Page {}: {} chars from {}", image.page_number, content.len(), self.model);
        Ok(content)
    }
}

/// Map a non-2xx status onto the retry taxonomy.
pub(crate) fn classify_status(status: u16, body: &str) -> CapabilityError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 300));
    match status {
        429 => CapabilityError::RateLimited { detail },
        401 | 403 => CapabilityError::Auth { detail },
        408 | 500..=599 => CapabilityError::Upstream { detail },
        _ => CapabilityError::Rejected { status, detail },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn first_text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> GeminiBackend {
        GeminiBackend::new("test-key", &ExtractionConfig::default()).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let b = backend();
        let body = serde_json::to_value(b.request_body("QUJD", "extract")).unwrap();
        assert_eq!(
            body["contents"][0]["parts"],
            json!([
                {"text": "extract"},
                {"inline_data": {"mime_type": "image/png", "data": "QUJD"}}
            ])
        );
        let generation = &body["generationConfig"];
        assert_eq!(generation["responseMimeType"], "application/json");
        assert_eq!(generation["maxOutputTokens"], 8192);
        assert!((generation["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn endpoint_uses_model_and_base() {
        let b = backend().with_base_url("http://localhost:8080/");
        assert_eq!(
            b.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn response_text_is_extracted() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"crime_statistics\":"}, {"text": "[]}"}]},
                "finishReason": "STOP"
            }]
        });
        let parsed: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.first_text().as_deref(), Some("{\"crime_statistics\":[]}"));
    }

    #[test]
    fn blocked_prompt_has_no_text() {
        let raw = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let parsed: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.first_text().is_none());
        assert_eq!(
            parsed.prompt_feedback.unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(429, ""), CapabilityError::RateLimited { .. }));
        assert!(matches!(classify_status(403, ""), CapabilityError::Auth { .. }));
        assert!(matches!(classify_status(503, ""), CapabilityError::Upstream { .. }));
        assert!(matches!(
            classify_status(400, "bad"),
            CapabilityError::Rejected { status: 400, .. }
        ));
    }
}
