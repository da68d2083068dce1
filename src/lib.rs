//! # edgequake-insights
//!
//! Pick the insight slides out of investor presentations using Vision
//! Language Models.
//!
//! ## Why this crate?
//!
//! An earnings deck runs 30 to 80 pages and most of them are covers,
//! agendas and disclaimers. A VLM can tell which pages actually reveal
//! something, but a whole deck does not fit in one request and inference
//! services fail in several different ways under load. This crate is the
//! batch pipeline around that: it chunks each deck into request-sized page
//! ranges, survives rate limits, transient errors, oversized payloads and
//! region blocks, and merges partial results into one deterministic artifact
//! per deck.
//!
//! ## Pipeline Overview
//!
//! ```text
//! deck.pdf
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Plan     6 / 8 / 12-page ranges by bytes per page
//!  ├─ 3. Execute  render (pdfium) → JPEG → VLM, per range
//!  │     └─ Retry  backoff + smaller renders, split, skip, or abort
//!  ├─ 4. Merge    dedupe slides by page, resolve metadata per field
//!  └─ 5. Upgrade  re-render only the selected pages at high fidelity
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_insights::{BatchOrchestrator, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let mut batch = BatchOrchestrator::from_config(&config)?;
//!     batch.add("acme-q3.pdf");
//!     batch.add("https://ir.example.com/globex-investor-day.pdf");
//!     batch.prepare().await;
//!     let summary = batch.run().await;
//!     eprintln!("{} completed, {} failed", summary.completed, summary.failed);
//!     for item in batch.items() {
//!         if let Some(report) = &item.result {
//!             println!("{}: pages {:?}", item.name, report.artifact.page_numbers());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deck2insights` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-insights = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, inspect, write_artifact, Analyzer};
pub use batch::{BatchItem, BatchOrchestrator, BatchStatus, ItemId};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{ChunkFailure, FailureKind, InferenceError, InsightError};
pub use output::{
    ChunkResult, DeckMetadata, DocumentArtifact, DocumentReport, DocumentStats, SelectedSlide,
};
pub use pipeline::encode::EncodedImage;
pub use pipeline::llm::{InferenceBackend, InferenceRequest, InferenceResponse, LlmInference};
pub use pipeline::plan::{plan_chunks, ChunkSizing, PageRange};
pub use pipeline::profile::{select_profile, RenderProfile};
pub use pipeline::render::{
    DocumentInfo, HighQualityOptions, HighQualityRender, PageRenderer, PdfiumRenderer,
};
pub use pipeline::retry::{classify_message, RetryDecision, RetryPolicy};
pub use progress::{
    BatchProgress, BatchProgressCallback, NoopProgressCallback, ProgressCallback, ProgressEvent,
    ProgressStage, StageSink, StageUpdate,
};
pub use stream::{BatchEvent, BatchEventStream};
