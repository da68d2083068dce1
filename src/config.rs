//! Configuration types for the insight-extraction pipeline.
//!
//! Every pipeline knob lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. One struct is easy to share across the batch,
//! log at startup, and diff between runs.
//!
//! # Design choice: builder over constructor
//! Most callers only touch the provider and model; the builder lets them set
//! those and inherit documented defaults for the retry and render knobs.

use crate::error::InsightError;
use crate::pipeline::plan::ChunkSizing;
use crate::pipeline::profile::{RenderProfile, DEFAULT_RENDER_LADDER};
use crate::pipeline::render::HighQualityOptions;
use crate::pipeline::retry::{RetryPolicy, MAX_BACKOFF};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Ceiling on the summed base64 image data of one chunk request.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Configuration for one batch run.
///
/// # Example
/// ```rust
/// use edgequake_insights::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .provider_name("openai")
///     .model("gpt-4.1-mini")
///     .max_chunk_attempts(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_attempts, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Render profiles indexed by attempt number, highest fidelity first.
    /// Default: `1.15/0.75 → 1.0/0.65 → 0.85/0.55`.
    pub render_ladder: Vec<RenderProfile>,

    /// Longest rendered edge in pixels for chunk renders. Default: 2000.
    ///
    /// Applied after the profile scale, so a poster-sized page cannot blow up
    /// memory or the payload.
    pub max_rendered_pixels: u32,

    /// Bytes-per-page thresholds that pick the chunk size.
    pub chunk_sizing: ChunkSizing,

    /// Total attempts per range, including the first. Default: 3.
    pub max_chunk_attempts: u32,

    /// Linear backoff step in milliseconds. Default: 2500.
    pub retry_base_delay_ms: u64,

    /// Added to an upstream-suggested wait. Default: 1000.
    pub retry_safety_margin_ms: u64,

    /// Backoff ceiling in milliseconds. Default and maximum: 90 000.
    pub retry_cap_ms: u64,

    /// Chunk payload ceiling in base64 bytes. Default: 20 MiB.
    pub max_payload_bytes: usize,

    /// Render settings for the post-merge quality upgrade.
    pub high_quality: HighQualityOptions,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per chunk. Default: 4096.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Per-inference-call timeout in seconds. Default: 120.
    ///
    /// An elapsed timeout is a transient failure and goes through the normal
    /// retry path.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional batch progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_ladder: DEFAULT_RENDER_LADDER.to_vec(),
            max_rendered_pixels: 2000,
            chunk_sizing: ChunkSizing::default(),
            max_chunk_attempts: 3,
            retry_base_delay_ms: 2_500,
            retry_safety_margin_ms: 1_000,
            retry_cap_ms: MAX_BACKOFF.as_millis() as u64,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            high_quality: HighQualityOptions::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            system_prompt: None,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("render_ladder", &self.render_ladder)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("chunk_sizing", &self.chunk_sizing)
            .field("max_chunk_attempts", &self.max_chunk_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_cap_ms", &self.retry_cap_ms)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("high_quality", &self.high_quality)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry budget and backoff derived from the retry knobs.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_chunk_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            safety_margin: Duration::from_millis(self.retry_safety_margin_ms),
            cap: Duration::from_millis(self.retry_cap_ms).min(MAX_BACKOFF),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn render_ladder(mut self, ladder: Vec<RenderProfile>) -> Self {
        self.config.render_ladder = ladder;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn chunk_sizing(mut self, sizing: ChunkSizing) -> Self {
        self.config.chunk_sizing = sizing;
        self
    }

    pub fn max_chunk_attempts(mut self, n: u32) -> Self {
        self.config.max_chunk_attempts = n.max(1);
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    pub fn retry_safety_margin_ms(mut self, ms: u64) -> Self {
        self.config.retry_safety_margin_ms = ms;
        self
    }

    pub fn retry_cap_ms(mut self, ms: u64) -> Self {
        self.config.retry_cap_ms = ms.min(MAX_BACKOFF.as_millis() as u64);
        self
    }

    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_payload_bytes = bytes;
        self
    }

    pub fn high_quality(mut self, opts: HighQualityOptions) -> Self {
        self.config.high_quality = opts;
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

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
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

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, InsightError> {
        let c = &self.config;
        if c.render_ladder.is_empty() {
            return Err(InsightError::InvalidConfig(
                "Render ladder must have at least one profile".into(),
            ));
        }
        if let Some(p) = c
            .render_ladder
            .iter()
            .find(|p| p.scale <= 0.0 || !(0.0..=1.0).contains(&p.compression_quality))
        {
            return Err(InsightError::InvalidConfig(format!(
                "Render profile out of range: scale {} quality {}",
                p.scale, p.compression_quality
            )));
        }
        if c.chunk_sizing.default_chunk_pages == 0
            || c.chunk_sizing.medium_chunk_pages == 0
            || c.chunk_sizing.large_chunk_pages == 0
        {
            return Err(InsightError::InvalidConfig(
                "Chunk sizes must be ≥ 1 page".into(),
            ));
        }
        if c.max_payload_bytes == 0 {
            return Err(InsightError::InvalidConfig(
                "Payload ceiling must be > 0".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(InsightError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
