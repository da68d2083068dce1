//! Batch orchestration: many documents, one at a time.
//!
//! Each item walks `pending → parsing → ready → analyzing → complete | error`.
//! [`BatchOrchestrator::prepare`] resolves and inspects pending items;
//! [`BatchOrchestrator::run`] analyses every `ready` item in upload order.
//! Documents never run concurrently: result order stays deterministic and the
//! inference service never sees more than one document's requests. One
//! document failing, even by region block, never stops the batch.
//!
//! While a document runs, its progress events arrive over a channel that the
//! orchestrator drains on the same task (`tokio::join!`), so aggregate
//! counters are updated by exactly one owner.

use crate::analyze::Analyzer;
use crate::config::PipelineConfig;
use crate::error::InsightError;
use crate::output::DocumentReport;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::render::DocumentInfo;
use crate::progress::{
    blend_percent, BatchProgress, DocumentProgress, ProgressCallback, ProgressEvent,
    ProgressSender,
};
use crate::stream::{BatchEvent, BatchEventStream, EventHub};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Stable identifier of a batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// Lifecycle status of a batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Parsing,
    Ready,
    Analyzing,
    Complete,
    Error,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Parsing => "parsing",
            BatchStatus::Ready => "ready",
            BatchStatus::Analyzing => "analyzing",
            BatchStatus::Complete => "complete",
            BatchStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One document submitted to the batch.
#[derive(Debug)]
pub struct BatchItem {
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Path or URL as submitted.
    pub source: String,
    pub status: BatchStatus,
    pub info: Option<DocumentInfo>,
    pub result: Option<DocumentReport>,
    /// Error text, or the warning of a `complete` item with partial coverage.
    pub error: Option<String>,
    pub progress: Option<ProgressEvent>,
    resolved: Option<ResolvedInput>,
}

impl BatchItem {
    fn new(id: ItemId, name: String, source: String) -> Self {
        Self {
            id,
            name,
            source,
            status: BatchStatus::Pending,
            info: None,
            result: None,
            error: None,
            progress: None,
            resolved: None,
        }
    }

    /// Local path of the resolved PDF, once parsed.
    pub fn path(&self) -> Option<&std::path::Path> {
        self.resolved.as_ref().map(ResolvedInput::path)
    }

    /// Input was resolved and inspected, so a retry needs no re-parse.
    fn is_salvageable(&self) -> bool {
        self.resolved.is_some() && self.info.is_some()
    }
}

/// Sequential driver for a batch of documents.
pub struct BatchOrchestrator {
    analyzer: Analyzer,
    items: Vec<BatchItem>,
    next_id: u64,
    progress: BatchProgress,
    callback: Option<ProgressCallback>,
    hub: EventHub,
}

impl BatchOrchestrator {
    pub fn new(analyzer: Analyzer) -> Self {
        let callback = analyzer.config().progress_callback.clone();
        Self {
            analyzer,
            items: Vec::new(),
            next_id: 1,
            progress: BatchProgress::default(),
            callback,
            hub: EventHub::default(),
        }
    }

    /// Orchestrator over the pdfium renderer and the configured provider.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, InsightError> {
        Ok(Self::new(Analyzer::from_config(config)?))
    }

    /// Stream of every event from now on.
    pub fn subscribe(&mut self) -> BatchEventStream {
        self.hub.subscribe()
    }

    /// Queue a path or URL; it stays `pending` until [`prepare`](Self::prepare).
    pub fn add(&mut self, source: impl Into<String>) -> ItemId {
        let source = source.into();
        let id = self.allocate_id();
        let item = BatchItem::new(id, input::display_name(&source), source);
        self.emit_status(&item);
        self.items.push(item);
        id
    }

    /// Queue a local PDF that was already inspected; it starts `ready`.
    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        info: DocumentInfo,
    ) -> ItemId {
        let path = path.into();
        let id = self.allocate_id();
        let mut item = BatchItem::new(id, name.into(), path.display().to_string());
        item.resolved = Some(ResolvedInput::Local(path));
        item.info = Some(info);
        item.status = BatchStatus::Ready;
        self.emit_status(&item);
        self.items.push(item);
        id
    }

    /// Resolve and inspect every `pending` item. Returns how many are `ready`.
    ///
    /// Items that cannot be opened go to `error` and are reported through
    /// `on_document_error` and [`BatchEvent::DocumentFailed`] right away.
    pub async fn prepare(&mut self) -> usize {
        let timeout = self.analyzer.config().download_timeout_secs;
        for idx in 0..self.items.len() {
            if self.items[idx].status != BatchStatus::Pending {
                continue;
            }
            self.set_status(idx, BatchStatus::Parsing);
            self.items[idx].progress = Some(DocumentProgress::preparing(&self.items[idx].name));

            let source = self.items[idx].source.clone();
            let parsed = match input::resolve_input(&source, timeout).await {
                Ok(resolved) => match self.analyzer.inspect(resolved.path()).await {
                    Ok(info) => Ok((resolved, info)),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            let item = &mut self.items[idx];
            match parsed {
                Ok((resolved, info)) => {
                    info!("{}: {} pages, {} bytes", item.name, info.page_count, info.byte_size);
                    item.resolved = Some(resolved);
                    item.info = Some(info);
                    item.error = None;
                    item.progress = None;
                    self.set_status(idx, BatchStatus::Ready);
                }
                Err(e) => {
                    warn!("{}: could not be prepared: {}", item.name, e);
                    let (id, name, error) = (item.id, item.name.clone(), e.to_string());
                    item.error = Some(error.clone());
                    item.progress = Some(DocumentProgress::error(error.clone()));
                    self.set_status(idx, BatchStatus::Error);
                    if let Some(cb) = &self.callback {
                        cb.on_document_error(&name, &error);
                    }
                    self.hub.emit(BatchEvent::DocumentFailed { id, name, error });
                }
            }
        }
        self.count(BatchStatus::Ready)
    }

    /// Analyse every `ready` item in upload order and return the aggregate.
    pub async fn run(&mut self) -> BatchProgress {
        let queue: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == BatchStatus::Ready)
            .map(|(idx, _)| idx)
            .collect();
        let total = queue.len();

        self.progress = BatchProgress::new(total);
        info!("Batch started: {} document(s)", total);
        if let Some(cb) = &self.callback {
            cb.on_batch_start(total);
        }
        self.hub.emit(BatchEvent::BatchStarted { total });

        for (queue_index, idx) in queue.into_iter().enumerate() {
            self.run_one(queue_index, idx, total).await;
        }

        self.progress.current_label = None;
        self.progress.current_event = None;
        self.progress.progress = Some(100);
        info!(
            "Batch finished: {} completed, {} failed",
            self.progress.completed, self.progress.failed
        );
        if let Some(cb) = &self.callback {
            cb.on_batch_complete(&self.progress);
        }
        self.hub.emit(BatchEvent::BatchCompleted {
            progress: self.progress.clone(),
        });
        self.progress.clone()
    }

    async fn run_one(&mut self, queue_index: usize, idx: usize, total: usize) {
        let id = self.items[idx].id;
        let label = self.items[idx].name.clone();
        self.set_status(idx, BatchStatus::Analyzing);
        self.items[idx].error = None;
        self.items[idx].result = None;
        self.progress.current_label = Some(label.clone());
        self.progress.progress = Some(blend_percent(queue_index, 0.0, total));
        if let Some(cb) = &self.callback {
            cb.on_document_start(&label, queue_index, total);
        }

        let path = self.items[idx].path().map(|p| p.to_path_buf());
        let info = self.items[idx].info.clone();
        let outcome = match (path, info) {
            (Some(path), Some(info)) => {
                let (sender, mut rx) = ProgressSender::channel();
                let analyzer = &self.analyzer;
                let doc = async move {
                    let result = analyzer.analyze_document(&label, &path, &info, &sender).await;
                    drop(sender);
                    result
                };

                let item = &mut self.items[idx];
                let progress = &mut self.progress;
                let callback = &self.callback;
                let hub = &mut self.hub;
                let drain = async {
                    while let Some(event) = rx.recv().await {
                        progress.progress =
                            Some(blend_percent(queue_index, event.fraction(), total));
                        progress.current_event = Some(event.clone());
                        item.progress = Some(event.clone());
                        if let Some(cb) = callback {
                            cb.on_progress(progress);
                        }
                        hub.emit(BatchEvent::Progress {
                            id,
                            event,
                            batch: progress.clone(),
                        });
                    }
                };

                let (result, ()) = tokio::join!(doc, drain);
                result
            }
            _ => Err(InsightError::Internal(format!(
                "{} is ready but was never inspected",
                self.items[idx].name
            ))),
        };

        self.finish(idx, outcome);
        self.progress.progress = Some(blend_percent(queue_index + 1, 0.0, total));
        if let Some(cb) = &self.callback {
            cb.on_progress(&self.progress);
        }
    }

    /// Record a document's outcome and update the aggregate counters.
    fn finish(&mut self, idx: usize, outcome: Result<DocumentReport, InsightError>) {
        let item = &mut self.items[idx];
        let (id, name) = (item.id, item.name.clone());
        match outcome {
            Ok(report) => {
                let warning = report.warning.clone();
                item.error = warning.clone();
                item.result = Some(report);
                item.progress = Some(DocumentProgress::complete());
                self.progress.completed += 1;
                if let Some(cb) = &self.callback {
                    cb.on_document_complete(&name, warning.as_deref());
                }
                self.set_status(idx, BatchStatus::Complete);
                self.hub.emit(BatchEvent::DocumentCompleted { id, name, warning });
            }
            Err(e) => {
                let error = e.to_string();
                warn!("{}: failed: {}", name, error);
                item.error = Some(error.clone());
                item.progress = Some(DocumentProgress::error(error.clone()));
                self.progress.failed += 1;
                if let Some(cb) = &self.callback {
                    cb.on_document_error(&name, &error);
                }
                self.set_status(idx, BatchStatus::Error);
                self.hub.emit(BatchEvent::DocumentFailed { id, name, error });
            }
        }
    }

    /// Put an `error` item back in line: `ready` when its input was already
    /// parsed, `pending` otherwise.
    pub fn reset(&mut self, id: ItemId) -> Result<BatchStatus, InsightError> {
        let idx = self.index_of(id)?;
        let item = &mut self.items[idx];
        if item.status != BatchStatus::Error {
            return Err(InsightError::InvalidTransition {
                id: id.to_string(),
                action: "reset",
                status: item.status.to_string(),
            });
        }
        item.error = None;
        item.result = None;
        item.progress = None;
        let status = if item.is_salvageable() {
            BatchStatus::Ready
        } else {
            item.resolved = None;
            item.info = None;
            BatchStatus::Pending
        };
        self.set_status(idx, status);
        Ok(status)
    }

    /// Remove an item; a downloaded input is deleted with it.
    pub fn remove(&mut self, id: ItemId) -> Result<BatchItem, InsightError> {
        let idx = self.index_of(id)?;
        let status = self.items[idx].status;
        if matches!(status, BatchStatus::Parsing | BatchStatus::Analyzing) {
            return Err(InsightError::InvalidTransition {
                id: id.to_string(),
                action: "removed",
                status: status.to_string(),
            });
        }
        Ok(self.items.remove(idx))
    }

    /// Drop every item that has not started (`pending` or `ready`).
    /// Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !matches!(item.status, BatchStatus::Pending | BatchStatus::Ready));
        before - self.items.len()
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&BatchItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Aggregate of the current or most recent run.
    pub fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    pub fn count(&self, status: BatchStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    fn allocate_id(&mut self) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        id
    }

    fn index_of(&self, id: ItemId) -> Result<usize, InsightError> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| InsightError::UnknownItem { id: id.to_string() })
    }

    fn set_status(&mut self, idx: usize, status: BatchStatus) {
        self.items[idx].status = status;
        let item = &self.items[idx];
        debug!("{} ({}): {}", item.name, item.id, status);
        self.hub.emit(BatchEvent::StatusChanged {
            id: item.id,
            name: item.name.clone(),
            status,
        });
    }

    fn emit_status(&mut self, item: &BatchItem) {
        self.hub.emit(BatchEvent::StatusChanged {
            id: item.id,
            name: item.name.clone(),
            status: item.status,
        });
    }
}
