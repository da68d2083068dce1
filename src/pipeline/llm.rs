//! VLM interaction: build vision messages for a chunk and call the provider.
//!
//! The pipeline only sees [`InferenceBackend`]; [`LlmInference`] is the
//! edgequake-llm implementation. It is the boundary that turns provider
//! errors into a typed [`FailureKind`](crate::error::FailureKind) (via
//! [`classify_message`](crate::pipeline::retry::classify_message)), so no
//! code downstream ever inspects error text.
//!
//! This module does not retry. One call is one attempt; the document driver
//! owns the retry budget.

use crate::config::PipelineConfig;
use crate::error::{InferenceError, InsightError};
use crate::output::ChunkResult;
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::plan::PageRange;
use crate::pipeline::postprocess::parse_chunk_response;
use crate::pipeline::retry::classify_message;
use crate::prompts::{page_range_context, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One inference call: a chunk's rendered pages plus routing hints.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub range: PageRange,
    /// Zero-based offset of the first page in the deck.
    pub page_offset: u32,
    /// Images in page order.
    pub images: Vec<EncodedImage>,
    /// Provider and model the caller selected, for backends that route.
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub result: ChunkResult,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Inference capability consumed by the chunk executor.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn analyze(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

/// [`InferenceBackend`] over an edgequake-llm provider.
pub struct LlmInference {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmInference {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            timeout: config.api_timeout(),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, InsightError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    /// ## Message Layout
    ///
    /// 1. **System message**: the selection prompt (or user override)
    /// 2. **User message**: the page-range context text with every page image
    ///    attached in page order
    fn build_messages(&self, request: &InferenceRequest) -> Vec<ChatMessage> {
        let images = request
            .images
            .iter()
            .map(EncodedImage::to_image_data)
            .collect();
        vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(page_range_context(request.range), images),
        ]
    }
}

#[async_trait]
impl InferenceBackend for LlmInference {
    async fn analyze(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let start = Instant::now();
        let messages = self.build_messages(request);
        let call = self.provider.chat(&messages, Some(&self.options));
        let response = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                return Err(InferenceError::transient(format!(
                    "Inference call timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                let kind = classify_message(&message);
                warn!("Pages {}: {} failure: {}", request.range, kind.label(), message);
                return Err(InferenceError::new(kind, message));
            }
            Ok(Ok(response)) => response,
        };

        debug!(
            "Pages {}: {} input tokens, {} output tokens, {:?} ({} / {})",
            request.range,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed(),
            request.provider.as_deref().unwrap_or("auto"),
            request.model.as_deref().unwrap_or("default"),
        );

        // A reply that isn't the requested shape won't improve on retry.
        let result =
            parse_chunk_response(&response.content, request.range).map_err(InferenceError::fatal)?;

        Ok(InferenceResponse {
            result,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InsightError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InsightError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present** (`OPENAI_API_KEY`), so users holding several
///    keys land on OpenAI unless they ask otherwise.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, InsightError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InsightError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
