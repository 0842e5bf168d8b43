//! The extraction capability seam.
//!
//! The pipeline only needs one thing from the outside world: given a page
//! image and instructions, return text that should contain JSON. Everything
//! behind that (which vendor, which transport) is an [`ExtractionBackend`].
//!
//! Two implementations ship with the crate:
//!
//! | Backend | Selected by | Transport |
//! |---------|-------------|-----------|
//! | [`GeminiBackend`] | `provider_name = "gemini-rest"` or `GEMINI_API_KEY` | direct `generateContent` REST call |
//! | [`LlmBackend`] | any other provider name, or `ProviderFactory::from_env` | `edgequake-llm` chat API |

pub mod gemini;
pub mod llm;

pub use gemini::GeminiBackend;
pub use llm::LlmBackend;

use crate::config::ExtractionConfig;
use crate::error::{CapabilityError, ExtractError};
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use edgequake_llm::ProviderFactory;
use std::sync::Arc;
use tracing::{debug, info};

/// Name that selects [`GeminiBackend`] in `provider_name`.
pub const GEMINI_REST: &str = "gemini-rest";

/// Default model when a named edgequake-llm provider is given without one.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-mini";

/// Black-box page understanding: image + instructions → raw response text.
///
/// One call is one attempt. Retrying, timeouts and schema validation are the
/// invoker's job; implementations only classify failures.
#[async_trait]
pub trait ExtractionBackend: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn invoke(&self, image: &PageImage, instructions: &str)
        -> Result<String, CapabilityError>;
}

/// Pick the backend for a run, from most to least specific.
///
/// 1. `config.backend`, used as is.
/// 2. `config.provider_name`: [`GEMINI_REST`] builds a [`GeminiBackend`],
///    anything else goes through `ProviderFactory::create_llm_provider`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. `GEMINI_API_KEY` → [`GeminiBackend`].
/// 5. `ProviderFactory::from_env()` auto-detection.
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn ExtractionBackend>, ExtractError> {
    if let Some(ref backend) = config.backend {
        debug!("Using pre-built backend '{}'", backend.name());
        return Ok(Arc::clone(backend));
    }

    if let Some(ref name) = config.provider_name {
        return named_backend(name, config.model.as_deref(), config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return named_backend(&prov, Some(&model), config);
        }
    }

    if std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.trim().is_empty()) {
        info!("GEMINI_API_KEY found; using the Gemini REST backend");
        return Ok(Arc::new(GeminiBackend::from_env(config)?));
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::CapabilityUnavailable {
            provider: "auto".to_string(),
            hint: format!(
                "No extraction backend could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(Arc::new(LlmBackend::new("auto", provider, config)))
}

fn named_backend(
    name: &str,
    model: Option<&str>,
    config: &ExtractionConfig,
) -> Result<Arc<dyn ExtractionBackend>, ExtractError> {
    if name.eq_ignore_ascii_case(GEMINI_REST) {
        return Ok(Arc::new(GeminiBackend::from_env(config)?));
    }

    let model = model.unwrap_or(DEFAULT_LLM_MODEL);
    info!("Using provider '{}' with model '{}'", name, model);
    let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ExtractError::CapabilityUnavailable {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(LlmBackend::new(name, provider, config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl ExtractionBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn invoke(&self, _: &PageImage, _: &str) -> Result<String, CapabilityError> {
            Ok("{}".into())
        }
    }

    #[test]
    fn prebuilt_backend_wins() {
        let config = ExtractionConfig::builder()
            .backend(Arc::new(Fixed))
            .provider_name("openai")
            .build()
            .unwrap();
        let backend = resolve_backend(&config).unwrap();
        assert_eq!(backend.name(), "fixed");
    }
}
