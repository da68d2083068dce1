//! Document driver: plan, run every range to resolution, merge, upgrade.
//!
//! ## Work queue
//!
//! The planned ranges seed a `VecDeque`. Each turn pops the front range and
//! makes one attempt; on failure the [`RetryPolicy`] decides:
//!
//! | Decision | Queue effect |
//! |----------|--------------|
//! | Retry    | sleep, push the same range back to the front, one rung down the ladder |
//! | Split    | push both halves to the front, first half first, fresh attempt count |
//! | Skip     | record a [`ChunkFailure`], move on |
//! | Abort    | stop the document with [`InsightError::GeoBlocked`] |
//!
//! Split children go to the front, so they run before any later original
//! range and ranges are always attempted in ascending page order.

use crate::config::PipelineConfig;
use crate::error::{ChunkFailure, FailureKind, InsightError};
use crate::output::{ChunkResult, DocumentReport, DocumentStats};
use crate::pipeline::executor::ChunkExecutor;
use crate::pipeline::input;
use crate::pipeline::llm::{InferenceBackend, LlmInference};
use crate::pipeline::merge::merge_chunk_results;
use crate::pipeline::plan::{plan_chunks, PageRange};
use crate::pipeline::render::{DocumentInfo, PageRenderer, PdfiumRenderer};
use crate::pipeline::retry::{RetryDecision, RetryPolicy};
use crate::pipeline::upgrade::upgrade_slides;
use crate::progress::{ChunkReporter, DocumentProgress, ProgressSender, UpgradeReporter};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A range waiting in the queue with the attempts it has used.
#[derive(Debug, Clone, Copy)]
struct PendingRange {
    range: PageRange,
    attempts: u32,
}

impl PendingRange {
    fn fresh(range: PageRange) -> Self {
        Self { range, attempts: 0 }
    }
}

/// Runs single documents through the pipeline.
#[derive(Clone)]
pub struct Analyzer {
    renderer: Arc<dyn PageRenderer>,
    executor: ChunkExecutor,
    policy: RetryPolicy,
    config: PipelineConfig,
}

impl Analyzer {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        inference: Arc<dyn InferenceBackend>,
        config: &PipelineConfig,
    ) -> Self {
        let executor = ChunkExecutor::new(
            Arc::clone(&renderer),
            inference,
            config.render_ladder.clone(),
            config.max_payload_bytes,
        )
        .with_selection(config.provider_name.clone(), config.model.clone());
        Self {
            renderer,
            executor,
            policy: config.retry_policy(),
            config: config.clone(),
        }
    }

    /// pdfium renderer plus the provider resolved from `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, InsightError> {
        let renderer = Arc::new(PdfiumRenderer::new(
            config.password.clone(),
            config.max_rendered_pixels,
        ));
        let inference = Arc::new(LlmInference::from_config(config)?);
        Ok(Self::new(renderer, inference, config))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Page count and byte size of a local PDF.
    pub async fn inspect(&self, path: &Path) -> Result<DocumentInfo, InsightError> {
        self.renderer.inspect(path).await
    }

    /// The initial range plan for a document.
    pub fn plan(&self, info: &DocumentInfo) -> Vec<PageRange> {
        plan_chunks(info.page_count, info.byte_size, &self.config.chunk_sizing)
    }

    /// Run one document to a report.
    ///
    /// # Errors
    /// - [`InsightError::GeoBlocked`] as soon as any range is region-blocked
    /// - [`InsightError::AllChunksFailed`] when no range succeeded
    /// - [`InsightError::EmptyResult`] when ranges succeeded but no slide was picked
    pub async fn analyze_document(
        &self,
        label: &str,
        path: &Path,
        info: &DocumentInfo,
        progress: &ProgressSender,
    ) -> Result<DocumentReport, InsightError> {
        let total_start = Instant::now();
        let plan = self.plan(info);
        if plan.is_empty() {
            return Err(InsightError::EmptyDocument {
                path: path.to_path_buf(),
            });
        }
        info!(
            "{}: {} pages, {} bytes/page, {} chunk(s)",
            label,
            info.page_count,
            info.bytes_per_page(),
            plan.len()
        );

        let mut stats = DocumentStats {
            page_count: info.page_count,
            chunks_planned: plan.len(),
            ..DocumentStats::default()
        };
        let mut queue: VecDeque<PendingRange> = plan.into_iter().map(PendingRange::fresh).collect();
        let mut results: Vec<ChunkResult> = Vec::new();
        let mut failures: Vec<ChunkFailure> = Vec::new();
        let mut resolved = 0usize;

        // ── Chunk stage ──────────────────────────────────────────────────
        let chunk_start = Instant::now();
        while let Some(mut pending) = queue.pop_front() {
            let index = resolved;
            let count = resolved + queue.len() + 1;
            let reporter = ChunkReporter::new(progress, index, count);

            let err = match self
                .executor
                .execute(path, pending.range, pending.attempts, &reporter)
                .await
            {
                Ok(response) => {
                    debug!(
                        "{}: pages {} → {} slide(s)",
                        label,
                        pending.range,
                        response.result.slides.len()
                    );
                    stats.input_tokens += response.input_tokens;
                    stats.output_tokens += response.output_tokens;
                    results.push(response.result);
                    resolved += 1;
                    progress.send(DocumentProgress::chunk_done(index, count));
                    continue;
                }
                Err(err) => err,
            };

            pending.attempts += 1;
            match self.policy.decide(&err.kind, pending.attempts, &pending.range) {
                RetryDecision::Retry { delay } => {
                    stats.retries += 1;
                    warn!(
                        "{}: pages {} {} (attempt {}/{}), retrying in {:?}",
                        label,
                        pending.range,
                        err.kind.label(),
                        pending.attempts,
                        self.policy.max_attempts,
                        delay
                    );
                    progress.send(DocumentProgress::retrying(
                        index,
                        count,
                        &err.kind,
                        delay,
                    ));
                    tokio::time::sleep(delay).await;
                    queue.push_front(pending);
                }
                RetryDecision::Split => match pending.range.split() {
                    Some((first, second)) => {
                        stats.splits += 1;
                        info!(
                            "{}: splitting pages {} into {} and {} ({})",
                            label,
                            pending.range,
                            first,
                            second,
                            err.kind.label()
                        );
                        queue.push_front(PendingRange::fresh(second));
                        queue.push_front(PendingRange::fresh(first));
                    }
                    None => {
                        failures.push(chunk_failure(pending, err.kind, err.message));
                        resolved += 1;
                        progress.send(DocumentProgress::chunk_done(index, count));
                    }
                },
                RetryDecision::Skip => {
                    warn!(
                        "{}: giving up on pages {} after {} attempt(s): {}",
                        label, pending.range, pending.attempts, err.message
                    );
                    failures.push(chunk_failure(pending, err.kind, err.message));
                    resolved += 1;
                    progress.send(DocumentProgress::chunk_done(index, count));
                }
                RetryDecision::AbortDocument => {
                    warn!("{}: region blocked, abandoning document", label);
                    return Err(InsightError::GeoBlocked {
                        document: label.to_string(),
                        detail: err.message,
                    });
                }
            }
        }
        stats.chunk_duration_ms = chunk_start.elapsed().as_millis() as u64;
        stats.chunks_succeeded = results.len();
        stats.chunks_failed = failures.len();

        if results.is_empty() {
            let first_error = failures
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(InsightError::AllChunksFailed {
                total: failures.len(),
                first_error,
            });
        }

        // ── Merge ────────────────────────────────────────────────────────
        progress.send(DocumentProgress::merging());
        let mut artifact = merge_chunk_results(&results, label)?;
        stats.slides_selected = artifact.slides.len();

        // ── Quality upgrade ──────────────────────────────────────────────
        let upgrade_start = Instant::now();
        let quality = upgrade_slides(
            self.renderer.as_ref(),
            path,
            &mut artifact,
            &self.config.high_quality,
            &UpgradeReporter::new(progress),
        )
        .await;
        stats.upgrade_duration_ms = upgrade_start.elapsed().as_millis() as u64;
        stats.slides_upgraded = quality.upgraded.len();
        stats.slides_downgraded = quality.downgraded.len();
        stats.upgrade_failures = quality.failed.len();

        let warning = compose_warning(&failures, quality.warning());
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "{}: {} slide(s) from {}/{} chunk(s), {} retries, {} splits, {}ms",
            label,
            stats.slides_selected,
            stats.chunks_succeeded,
            stats.chunks_succeeded + stats.chunks_failed,
            stats.retries,
            stats.splits,
            stats.total_duration_ms
        );
        progress.send(DocumentProgress::complete());

        Ok(DocumentReport {
            document: label.to_string(),
            artifact,
            warning,
            failed_chunks: failures,
            stats,
        })
    }
}

fn chunk_failure(pending: PendingRange, kind: FailureKind, detail: String) -> ChunkFailure {
    ChunkFailure {
        range: pending.range,
        kind,
        attempts: pending.attempts,
        detail,
    }
}

/// Partial-coverage and quality warnings joined into one message.
fn compose_warning(failures: &[ChunkFailure], quality: Option<String>) -> Option<String> {
    let mut lines = Vec::new();
    if !failures.is_empty() {
        let ranges: Vec<String> = failures.iter().map(|f| f.range.to_string()).collect();
        lines.push(format!(
            "Partial coverage: pages {} could not be analysed ({})",
            ranges.join(", "),
            failures[0].detail
        ));
    }
    lines.extend(quality);
    (!lines.is_empty()).then(|| lines.join("\n"))
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Analyse one PDF file or URL.
///
/// This is the single-document entry point; use
/// [`crate::batch::BatchOrchestrator`] for many.
///
/// # Errors
/// Returns `Err(InsightError)` when the input cannot be resolved, the
/// provider is not configured, or no usable result exists. Partial coverage
/// is not an error; check `report.warning`.
pub async fn analyze(
    source: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<DocumentReport, InsightError> {
    let source = source.as_ref();
    let analyzer = Analyzer::from_config(config)?;
    let resolved = input::resolve_input(source, config.download_timeout_secs).await?;
    let info = analyzer.inspect(resolved.path()).await?;
    analyzer
        .analyze_document(
            &input::display_name(source),
            resolved.path(),
            &info,
            &ProgressSender::disconnected(),
        )
        .await
}

/// Page count and byte size of a PDF file or URL.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    source: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<DocumentInfo, InsightError> {
    let resolved = input::resolve_input(source.as_ref(), config.download_timeout_secs).await?;
    PdfiumRenderer::new(config.password.clone(), config.max_rendered_pixels)
        .inspect(resolved.path())
        .await
}

/// Write a report as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_artifact(
    output_path: impl AsRef<Path>,
    report: &DocumentReport,
) -> Result<(), InsightError> {
    let path = output_path.as_ref();
    let write_err = |source: std::io::Error| InsightError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(report)
        .map_err(|e| InsightError::Internal(format!("Serialising report: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    debug!("Wrote {} bytes to {}", json.len(), path.display());
    Ok(())
}
