//! Progress reporting: typed stage updates, per-document events, batch totals.
//!
//! Three layers, innermost first:
//!
//! 1. **[`StageUpdate`]**: what a stage is doing right now ("converting 12
//!    pages", "converted page 3 of 12", "analyzing"). Renderers and the chunk
//!    executor emit these into a [`StageSink`]. Free-text messages from
//!    external renderers are mapped with [`StageUpdate::parse`].
//! 2. **[`ProgressEvent`]**: a normalised `{stage, message, current, total,
//!    percent}` for one document. [`DocumentProgress`] maps a stage update to
//!    a percent according to where the document is (which chunk of how many,
//!    or the quality upgrade).
//! 3. **[`BatchProgress`]**: aggregate over every item in the run, with the
//!    weighted blend `round(((queue_index + fraction) / total) * 100)`.
//!
//! Events travel over a per-document `tokio::sync::mpsc` channel that the
//! batch orchestrator drains on its own task; no closure captures shared
//! mutable state.
//!
//! # Example
//!
//! ```rust
//! use edgequake_insights::BatchProgressCallback;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, label: &str, warning: Option<&str>) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{label} done{}", if warning.is_some() { " (with warnings)" } else { "" });
//!     }
//! }
//! ```

use crate::error::FailureKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ── Stage updates ────────────────────────────────────────────────────────

/// A typed update from the stage currently working on a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageUpdate {
    /// About to rasterise `count` pages.
    ConvertingPages { count: usize },
    /// Finished rasterising page `current` of `total` in the current chunk.
    PageConverted { current: usize, total: usize },
    /// Payload sent; waiting for the inference service.
    Analyzing,
    /// Re-rendering selected page `page` (`current` of `total`) at high fidelity.
    Upgrading {
        current: usize,
        total: usize,
        page: u32,
    },
    /// Anything else worth showing.
    Message(String),
}

static CONVERTED_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)converted\s+page\s+(\d+)\s+of\s+(\d+)").expect("valid converted-page regex")
});

static CONVERTING_PAGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)converting\s+(\d+)\s+pages?").expect("valid converting-pages regex")
});

impl StageUpdate {
    /// Map a free-text status message onto a typed update.
    pub fn parse(text: &str) -> StageUpdate {
        if let Some(c) = CONVERTED_PAGE.captures(text) {
            if let (Ok(current), Ok(total)) = (c[1].parse(), c[2].parse()) {
                return StageUpdate::PageConverted { current, total };
            }
        }
        if let Some(c) = CONVERTING_PAGES.captures(text) {
            if let Ok(count) = c[1].parse() {
                return StageUpdate::ConvertingPages { count };
            }
        }
        if text.to_lowercase().contains("analyzing") {
            return StageUpdate::Analyzing;
        }
        StageUpdate::Message(text.to_string())
    }
}

/// Receiver of stage updates. Stages never know what the updates feed.
pub trait StageSink: Send + Sync {
    fn update(&self, update: StageUpdate);
}

/// Discards every update.
pub struct NoopSink;

impl StageSink for NoopSink {
    fn update(&self, _update: StageUpdate) {}
}

// ── Document-level events ────────────────────────────────────────────────

/// Coarse stage of one document's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Preparing,
    Uploading,
    Analyzing,
    Finalizing,
    Complete,
    Error,
}

/// A normalised progress snapshot for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    pub current: Option<usize>,
    pub total: Option<usize>,
    /// Always within `0..=100`.
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, message: impl Into<String>, percent: f64) -> Self {
        Self {
            stage,
            message: message.into(),
            current: None,
            total: None,
            percent: clamp_percent(percent),
        }
    }

    pub fn with_counts(mut self, current: usize, total: usize) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    /// Fraction of the document done, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        f64::from(self.percent) / 100.0
    }
}

fn clamp_percent(p: f64) -> u8 {
    if p.is_nan() {
        return 0;
    }
    p.round().clamp(0.0, 100.0) as u8
}

const CHUNKS_START: f64 = 5.0;
const CHUNKS_END: f64 = 85.0;
const UPGRADE_END: f64 = 98.0;
/// Share of a chunk's slot spent rendering; the rest is inference.
const RENDER_SHARE: f64 = 0.6;

/// Maps stage updates onto document percentages.
pub struct DocumentProgress;

impl DocumentProgress {
    pub fn preparing(label: &str) -> ProgressEvent {
        ProgressEvent::new(ProgressStage::Preparing, format!("Preparing {label}"), 2.0)
    }

    /// Event for `update` while working on chunk `index` (0-based) of `count`.
    pub fn chunk(index: usize, count: usize, update: &StageUpdate) -> ProgressEvent {
        let count = count.max(1);
        let width = (CHUNKS_END - CHUNKS_START) / count as f64;
        let base = CHUNKS_START + width * index.min(count) as f64;
        let prefix = format!("Chunk {}/{}", index + 1, count);

        match update {
            StageUpdate::ConvertingPages { count: pages } => ProgressEvent::new(
                ProgressStage::Uploading,
                format!("{prefix}: converting {pages} pages"),
                base,
            ),
            StageUpdate::PageConverted { current, total } => {
                let frac = *current as f64 / (*total).max(1) as f64;
                ProgressEvent::new(
                    ProgressStage::Uploading,
                    format!("{prefix}: converted page {current} of {total}"),
                    base + width * RENDER_SHARE * frac.min(1.0),
                )
                .with_counts(*current, *total)
            }
            StageUpdate::Analyzing => ProgressEvent::new(
                ProgressStage::Analyzing,
                format!("{prefix}: analyzing"),
                base + width * (RENDER_SHARE + 0.05),
            ),
            StageUpdate::Upgrading { current, total, page } => {
                Self::upgrade(*current, *total, *page)
            }
            StageUpdate::Message(text) => match StageUpdate::parse(text) {
                StageUpdate::Message(text) => {
                    ProgressEvent::new(ProgressStage::Analyzing, format!("{prefix}: {text}"), base)
                }
                parsed => Self::chunk(index, count, &parsed),
            },
        }
    }

    /// Event once chunk `index` (0-based) of `count` has resolved.
    pub fn chunk_done(index: usize, count: usize) -> ProgressEvent {
        let count = count.max(1);
        let width = (CHUNKS_END - CHUNKS_START) / count as f64;
        ProgressEvent::new(
            ProgressStage::Analyzing,
            format!("Chunk {}/{} done", index + 1, count),
            CHUNKS_START + width * (index + 1).min(count) as f64,
        )
        .with_counts(index + 1, count)
    }

    /// Event while waiting out a backoff on chunk `index` (0-based) of `count`.
    pub fn retrying(index: usize, count: usize, kind: &FailureKind, delay: Duration) -> ProgressEvent {
        let count = count.max(1);
        let width = (CHUNKS_END - CHUNKS_START) / count as f64;
        let reason = match kind {
            FailureKind::RateLimited { .. } => "rate limited",
            _ => "service unavailable",
        };
        ProgressEvent::new(
            ProgressStage::Analyzing,
            format!(
                "Chunk {}/{}: {}, retrying in {}s",
                index + 1,
                count,
                reason,
                delay.as_secs_f64().ceil() as u64
            ),
            CHUNKS_START + width * index.min(count) as f64,
        )
    }

    pub fn merging() -> ProgressEvent {
        ProgressEvent::new(ProgressStage::Finalizing, "Merging chunk results", CHUNKS_END)
    }

    /// Event while re-rendering selected page `current` of `total`.
    pub fn upgrade(current: usize, total: usize, page: u32) -> ProgressEvent {
        let frac = current as f64 / total.max(1) as f64;
        ProgressEvent::new(
            ProgressStage::Finalizing,
            format!("Upgrading slide {current} of {total} (page {page})"),
            CHUNKS_END + (UPGRADE_END - CHUNKS_END) * frac.min(1.0),
        )
        .with_counts(current, total)
    }

    pub fn complete() -> ProgressEvent {
        ProgressEvent::new(ProgressStage::Complete, "Complete", 100.0)
    }

    pub fn error(message: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(ProgressStage::Error, message, 100.0)
    }
}

/// Sending half of a document's progress channel.
///
/// Sends never fail from the caller's point of view: a dropped receiver just
/// means nobody is listening.
///
/// The percent a document reports never goes down. A split or a retry
/// renumbers the chunk slots, so a later event may map below an earlier
/// one; such events are raised to the highest percent already sent.
/// Clones share that high-water mark.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    high_water: Arc<AtomicU8>,
}

impl ProgressSender {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (ProgressSender, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = ProgressSender {
            tx: Some(tx),
            high_water: Arc::new(AtomicU8::new(0)),
        };
        (sender, rx)
    }

    /// A sender that drops every event.
    pub fn disconnected() -> ProgressSender {
        ProgressSender {
            tx: None,
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn send(&self, mut event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let previous = self.high_water.fetch_max(event.percent, Ordering::Relaxed);
        event.percent = event.percent.max(previous);
        let _ = tx.send(event);
    }
}

/// [`StageSink`] for one chunk: maps updates through [`DocumentProgress::chunk`].
pub struct ChunkReporter<'a> {
    sender: &'a ProgressSender,
    index: usize,
    count: usize,
}

impl<'a> ChunkReporter<'a> {
    pub fn new(sender: &'a ProgressSender, index: usize, count: usize) -> Self {
        Self {
            sender,
            index,
            count,
        }
    }
}

impl StageSink for ChunkReporter<'_> {
    fn update(&self, update: StageUpdate) {
        self.sender
            .send(DocumentProgress::chunk(self.index, self.count, &update));
    }
}

/// [`StageSink`] for the quality upgrade.
pub struct UpgradeReporter<'a> {
    sender: &'a ProgressSender,
}

impl<'a> UpgradeReporter<'a> {
    pub fn new(sender: &'a ProgressSender) -> Self {
        Self { sender }
    }
}

impl StageSink for UpgradeReporter<'_> {
    fn update(&self, update: StageUpdate) {
        let event = match update {
            StageUpdate::Upgrading { current, total, page } => {
                DocumentProgress::upgrade(current, total, page)
            }
            other => {
                let text = match other {
                    StageUpdate::Message(text) => text,
                    other => format!("{other:?}"),
                };
                ProgressEvent::new(ProgressStage::Finalizing, text, CHUNKS_END)
            }
        };
        self.sender.send(event);
    }
}

// ── Batch-level aggregate ────────────────────────────────────────────────

/// Aggregate progress over every item in the current batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Display name of the document being processed.
    pub current_label: Option<String>,
    /// Overall percent, blended across documents.
    pub progress: Option<u8>,
    /// Latest event from the current document.
    pub current_event: Option<ProgressEvent>,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            progress: Some(0),
            ..Self::default()
        }
    }

    /// Documents that have resolved either way.
    pub fn resolved(&self) -> usize {
        self.completed + self.failed
    }
}

/// Weighted blend: `round(((queue_index + fraction) / total) * 100)`.
pub fn blend_percent(queue_index: usize, fraction: f64, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let fraction = fraction.clamp(0.0, 1.0);
    clamp_percent(((queue_index as f64 + fraction) / total as f64) * 100.0)
}

// ── Caller-facing callback ───────────────────────────────────────────────

/// Called by the batch orchestrator as documents move through the pipeline.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls happen on the orchestrator's task, one at a
/// time, in batch order.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters `analyzing`.
    fn on_document_start(&self, label: &str, queue_index: usize, total_documents: usize) {
        let _ = (label, queue_index, total_documents);
    }

    /// Called for every progress event, with the refreshed aggregate.
    fn on_progress(&self, progress: &BatchProgress) {
        let _ = progress;
    }

    /// Called when a document lands in `complete`, with its warning if any.
    fn on_document_complete(&self, label: &str, warning: Option<&str>) {
        let _ = (label, warning);
    }

    /// Called when a document lands in `error`.
    fn on_document_error(&self, label: &str, error: &str) {
        let _ = (label, error);
    }

    /// Called once after every eligible document has been attempted.
    fn on_batch_complete(&self, progress: &BatchProgress) {
        let _ = progress;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
