//! Pipeline and batch behaviour against a scripted renderer and inference
//! service. No pdfium library and no API key needed.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_insights::{
    Analyzer, BatchEvent, BatchOrchestrator, BatchProgressCallback, BatchStatus, ChunkResult,
    DeckMetadata, DocumentInfo, EncodedImage, FailureKind, HighQualityOptions, HighQualityRender,
    InferenceBackend, InferenceError, InferenceRequest, InferenceResponse, InsightError,
    PageRange, PageRenderer, PipelineConfig, RenderProfile, SelectedSlide, StageSink,
    StageUpdate,
};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Renders `bytes_per_page` of base64 per page; records every call.
struct FakeRenderer {
    bytes_per_page: usize,
    docs: HashMap<PathBuf, DocumentInfo>,
    renders: Mutex<Vec<(PageRange, RenderProfile)>>,
    upgrade_calls: Mutex<Vec<Vec<u32>>>,
}

impl FakeRenderer {
    fn new(bytes_per_page: usize) -> Self {
        Self {
            bytes_per_page,
            docs: HashMap::new(),
            renders: Mutex::new(Vec::new()),
            upgrade_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_doc(mut self, path: &str, info: DocumentInfo) -> Self {
        self.docs.insert(PathBuf::from(path), info);
        self
    }

    fn rendered_ranges(&self) -> Vec<PageRange> {
        self.renders.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn inspect(&self, path: &Path) -> Result<DocumentInfo, InsightError> {
        self.docs
            .get(path)
            .cloned()
            .ok_or_else(|| InsightError::FileNotFound {
                path: path.to_path_buf(),
            })
    }

    async fn render_pages(
        &self,
        _path: &Path,
        range: PageRange,
        profile: RenderProfile,
        sink: &dyn StageSink,
    ) -> Result<Vec<EncodedImage>, InferenceError> {
        self.renders.lock().unwrap().push((range, profile));
        let total = range.len() as usize;
        Ok(range
            .pages()
            .enumerate()
            .map(|(i, page)| {
                sink.update(StageUpdate::PageConverted {
                    current: i + 1,
                    total,
                });
                EncodedImage::new(page, "image/jpeg", "A".repeat(self.bytes_per_page))
            })
            .collect())
    }

    async fn render_pages_high_quality(
        &self,
        _path: &Path,
        pages: &[u32],
        _options: &HighQualityOptions,
        _sink: &dyn StageSink,
    ) -> Result<HighQualityRender, InsightError> {
        self.upgrade_calls.lock().unwrap().push(pages.to_vec());
        let images_by_page: BTreeMap<u32, EncodedImage> = pages
            .iter()
            .map(|&p| (p, EncodedImage::new(p, "image/png", "UE5H")))
            .collect();
        Ok(HighQualityRender {
            images_by_page,
            failed_pages: vec![],
            downgraded_pages: vec![],
        })
    }
}

type Script = dyn Fn(&InferenceRequest, usize) -> Result<ChunkResult, InferenceError> + Send + Sync;

/// Answers each request with `script(request, prior_calls_for_that_range)`.
struct ScriptedInference {
    script: Box<Script>,
    calls: Mutex<Vec<PageRange>>,
}

impl ScriptedInference {
    fn new(
        script: impl Fn(&InferenceRequest, usize) -> Result<ChunkResult, InferenceError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<PageRange> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedInference {
    async fn analyze(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let prior = {
            let mut calls = self.calls.lock().unwrap();
            let prior = calls.iter().filter(|r| **r == request.range).count();
            calls.push(request.range);
            prior
        };
        (self.script)(request, prior).map(|result| InferenceResponse {
            result,
            input_tokens: 1000,
            output_tokens: 100,
        })
    }
}

/// Records the label of every `on_document_error` call.
#[derive(Default)]
struct ErrorLog {
    labels: Mutex<Vec<String>>,
}

impl ErrorLog {
    fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl BatchProgressCallback for ErrorLog {
    fn on_document_error(&self, label: &str, _error: &str) {
        self.labels.lock().unwrap().push(label.to_string());
    }
}

/// A model answer that picks the first page of the range.
fn pick_first(request: &InferenceRequest) -> ChunkResult {
    ChunkResult {
        metadata: DeckMetadata {
            company_name: "Acme Corp".into(),
            ticker: "ACME".into(),
            ..DeckMetadata::default()
        },
        slides: vec![SelectedSlide {
            selected_page_number: request.range.start_page,
            rationale: "Guidance raised".into(),
            revealed_content: "FY revenue guide +4%".into(),
            ..SelectedSlide::default()
        }],
    }
}

fn info(pages: u32, bytes: u64) -> DocumentInfo {
    DocumentInfo {
        page_count: pages,
        byte_size: bytes,
        title: None,
    }
}

fn orchestrator(
    renderer: Arc<FakeRenderer>,
    inference: Arc<ScriptedInference>,
    config: &PipelineConfig,
) -> BatchOrchestrator {
    BatchOrchestrator::new(Analyzer::new(renderer, inference, config))
}

// ── Single document ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rate_limits_are_waited_out_on_a_smaller_render() {
    let renderer = Arc::new(FakeRenderer::new(64).with_doc("q3.pdf", info(20, 2_000_000)));
    let inference = Arc::new(ScriptedInference::new(|req, prior| {
        if req.range.start_page == 1 && prior < 2 {
            Err(InferenceError::new(
                FailureKind::RateLimited { retry_after: None },
                "status 429: Too Many Requests",
            ))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(Arc::clone(&renderer), Arc::clone(&inference), &config);
    let id = batch.add_source("q3.pdf", "q3.pdf", info(20, 2_000_000));

    let summary = batch.run().await;
    assert_eq!(summary.completed, 1);

    let item = batch.item(id).unwrap();
    assert_eq!(item.status, BatchStatus::Complete);
    let report = item.result.as_ref().unwrap();
    assert_eq!(report.warning, None);
    assert_eq!(report.stats.retries, 2);
    assert_eq!(report.stats.chunks_planned, 2);
    assert_eq!(report.artifact.page_numbers(), vec![1, 13]);

    // 2 MB over 20 pages is under the medium threshold: 12-page ranges.
    assert_eq!(
        inference.calls(),
        vec![
            PageRange::new(1, 12),
            PageRange::new(1, 12),
            PageRange::new(1, 12),
            PageRange::new(13, 20),
        ]
    );

    // Every retry renders one rung down the ladder.
    let profiles: Vec<f32> = renderer
        .renders
        .lock()
        .unwrap()
        .iter()
        .map(|(_, p)| p.scale)
        .collect();
    assert_eq!(profiles, vec![1.15, 1.0, 0.85, 1.15]);
}

#[tokio::test(start_paused = true)]
async fn suggested_wait_is_honoured_with_a_safety_margin() {
    let renderer = Arc::new(FakeRenderer::new(64).with_doc("q3.pdf", info(20, 2_000_000)));
    let inference = Arc::new(ScriptedInference::new(|req, prior| {
        if req.range.start_page == 1 && prior == 0 {
            Err(InferenceError::new(
                FailureKind::RateLimited {
                    retry_after: Some(Duration::from_secs(17)),
                },
                "Quota exceeded for metric generate_content. Please retry in 17s.",
            ))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, Arc::clone(&inference), &config);
    let events = batch.subscribe();
    let id = batch.add_source("q3.pdf", "q3.pdf", info(20, 2_000_000));

    let started = Instant::now();
    batch.run().await;
    let waited = started.elapsed();

    // 17 s suggested plus the 1 s margin, and no other sleep.
    assert!(waited >= Duration::from_secs(18), "{waited:?}");
    assert!(waited < Duration::from_secs(19), "{waited:?}");

    let report = batch.item(id).unwrap().result.as_ref().unwrap();
    assert_eq!(report.stats.retries, 1);
    assert_eq!(report.warning, None);
    assert_eq!(inference.calls().len(), 3);

    drop(batch);
    let events: Vec<BatchEvent> = events.collect().await;
    assert!(events.iter().any(|e| matches!(
        e,
        BatchEvent::Progress { event, .. }
            if event.message == "Chunk 1/2: rate limited, retrying in 18s"
    )));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_then_split() {
    // One 8-page range that keeps failing until it is halved.
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(8, 80_000)));
    let inference = Arc::new(ScriptedInference::new(|req, _| {
        if req.range.len() > 4 {
            Err(InferenceError::transient("status 503 Service Unavailable"))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(Arc::clone(&renderer), Arc::clone(&inference), &config);
    let id = batch.add_source("deck.pdf", "deck.pdf", info(8, 80_000));

    let started = Instant::now();
    let summary = batch.run().await;
    assert_eq!(summary.completed, 1);

    let report = batch.item(id).unwrap().result.as_ref().unwrap();
    assert_eq!(report.stats.chunks_planned, 1);
    assert_eq!(report.stats.retries, 2);
    assert_eq!(report.stats.splits, 1);
    assert!(report.failed_chunks.is_empty());
    assert_eq!(report.warning, None);
    assert_eq!(report.artifact.page_numbers(), vec![1, 5]);

    // Three attempts at the whole range, then each half once.
    assert_eq!(
        inference.calls(),
        vec![
            PageRange::new(1, 8),
            PageRange::new(1, 8),
            PageRange::new(1, 8),
            PageRange::new(1, 4),
            PageRange::new(5, 8),
        ]
    );
    // Backoff of 2.5 s then 5 s; the split itself does not wait.
    assert!(started.elapsed() >= Duration::from_millis(7_500));
    assert!(started.elapsed() < Duration::from_millis(8_500));

    // The halves get a fresh budget and start back at the top of the ladder.
    let profiles: Vec<f32> = renderer
        .renders
        .lock()
        .unwrap()
        .iter()
        .map(|(_, p)| p.scale)
        .collect();
    assert_eq!(profiles, vec![1.15, 1.0, 0.85, 1.15, 1.15]);
}

#[tokio::test(start_paused = true)]
async fn oversized_payload_splits_without_spending_attempts() {
    // 8 pages at 1000 bytes each is over a 5000-byte ceiling; 4 pages is not.
    let renderer = Arc::new(FakeRenderer::new(1000).with_doc("big.pdf", info(8, 80_000)));
    let inference = Arc::new(ScriptedInference::new(|req, _| Ok(pick_first(req))));
    let config = assert_ok!(PipelineConfig::builder().max_payload_bytes(5000).build());
    let mut batch = orchestrator(Arc::clone(&renderer), Arc::clone(&inference), &config);
    let id = batch.add_source("big.pdf", "big.pdf", info(8, 80_000));

    batch.run().await;

    let report = batch.item(id).unwrap().result.as_ref().unwrap();
    assert_eq!(report.stats.splits, 1);
    assert_eq!(report.stats.retries, 0);
    assert_eq!(report.warning, None);
    assert_eq!(report.artifact.page_numbers(), vec![1, 5]);

    // The oversized render never reached inference.
    assert_eq!(
        inference.calls(),
        vec![PageRange::new(1, 4), PageRange::new(5, 8)]
    );
    // Both halves start at the top of the ladder.
    assert_eq!(
        renderer.rendered_ranges(),
        vec![PageRange::new(1, 8), PageRange::new(1, 4), PageRange::new(5, 8)]
    );
    let renders = renderer.renders.lock().unwrap().clone();
    assert!(renders.iter().all(|(_, p)| p.scale == 1.15));
}

#[tokio::test(start_paused = true)]
async fn service_side_413_splits_down_to_what_fits() {
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(8, 80_000)));
    let inference = Arc::new(ScriptedInference::new(|req, _| {
        if req.range.len() > 2 {
            Err(InferenceError::oversized("status 413: Payload Too Large"))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, Arc::clone(&inference), &config);
    let id = batch.add_source("deck.pdf", "deck.pdf", info(8, 80_000));

    batch.run().await;

    let report = batch.item(id).unwrap().result.as_ref().unwrap();
    assert_eq!(report.artifact.page_numbers(), vec![1, 3, 5, 7]);
    assert_eq!(report.stats.splits, 3);
    // Ranges are always attempted in ascending page order.
    let starts: Vec<u32> = inference.calls().iter().map(|r| r.start_page).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);
}

#[tokio::test(start_paused = true)]
async fn percent_never_drops_across_splits_and_retries() {
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(8, 80_000)));
    let inference = Arc::new(ScriptedInference::new(|req, prior| {
        if req.range.len() > 2 {
            Err(InferenceError::oversized("status 413: Payload Too Large"))
        } else if req.range.start_page == 5 && prior == 0 {
            Err(InferenceError::transient("status 502 Bad Gateway"))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, inference, &config);
    let events = batch.subscribe();
    let id = batch.add_source("deck.pdf", "deck.pdf", info(8, 80_000));

    batch.run().await;
    let report = batch.item(id).unwrap().result.as_ref().unwrap();
    assert_eq!(report.stats.splits, 3);
    assert_eq!(report.stats.retries, 1);
    assert_eq!(report.artifact.page_numbers(), vec![1, 3, 5, 7]);
    drop(batch);

    let events: Vec<BatchEvent> = events.collect().await;
    let (mut doc, mut total, mut seen) = (0u8, 0u8, 0usize);
    for e in &events {
        if let BatchEvent::Progress { event, batch, .. } = e {
            assert!(event.percent >= doc, "{} after {doc}%", event.message);
            let blended = batch.progress.unwrap();
            assert!(blended >= total, "batch {blended}% after {total}%");
            doc = event.percent;
            total = blended;
            seen += 1;
        }
    }
    assert!(seen > 10);
    assert_eq!(doc, 100);
}

#[tokio::test(start_paused = true)]
async fn fatal_range_is_skipped_with_a_partial_coverage_warning() {
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(20, 2_000_000)));
    let inference = Arc::new(ScriptedInference::new(|req, _| {
        if req.range.start_page == 13 {
            Err(InferenceError::fatal("status 400: invalid request"))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(Arc::clone(&renderer), Arc::clone(&inference), &config);
    let id = batch.add_source("deck.pdf", "deck.pdf", info(20, 2_000_000));

    let summary = batch.run().await;
    assert_eq!((summary.completed, summary.failed), (1, 0));

    let item = batch.item(id).unwrap();
    assert_eq!(item.status, BatchStatus::Complete);
    let report = item.result.as_ref().unwrap();
    let warning = report.warning.as_deref().unwrap();
    assert!(warning.contains("pages 13-20"), "{warning}");
    assert_eq!(item.error.as_deref(), Some(warning));
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].attempts, 1);
    assert_eq!(report.artifact.page_numbers(), vec![1]);
    // Fatal errors are never retried.
    assert_eq!(inference.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn document_fails_when_every_range_fails() {
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(20, 2_000_000)));
    let inference = Arc::new(ScriptedInference::new(|_, _| {
        Err(InferenceError::fatal("unparseable reply"))
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, inference, &config);
    let id = batch.add_source("deck.pdf", "deck.pdf", info(20, 2_000_000));

    let summary = batch.run().await;
    assert_eq!((summary.completed, summary.failed), (0, 1));

    let item = batch.item(id).unwrap();
    assert_eq!(item.status, BatchStatus::Error);
    assert!(item.result.is_none());
    assert!(item.error.as_deref().unwrap().contains("unparseable reply"));
}

#[tokio::test(start_paused = true)]
async fn only_selected_pages_are_upgraded() {
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(20, 2_000_000)));
    let inference = Arc::new(ScriptedInference::new(|req, _| Ok(pick_first(req))));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(Arc::clone(&renderer), inference, &config);
    let id = batch.add_source("deck.pdf", "deck.pdf", info(20, 2_000_000));

    batch.run().await;

    assert_eq!(*renderer.upgrade_calls.lock().unwrap(), vec![vec![1, 13]]);
    let report = batch.item(id).unwrap().result.as_ref().unwrap();
    assert_eq!(report.stats.slides_upgraded, 2);
    for slide in &report.artifact.slides {
        assert!(slide.high_fidelity);
        assert_eq!(slide.page_image.as_ref().unwrap().mime_type, "image/png");
    }
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn geo_block_fails_one_document_and_the_batch_continues() {
    // The second deck is the only 7-page one; its range is region-blocked.
    let renderer = Arc::new(
        FakeRenderer::new(16)
            .with_doc("a.pdf", info(10, 100_000))
            .with_doc("b.pdf", info(7, 70_000))
            .with_doc("c.pdf", info(9, 90_000)),
    );
    let inference = Arc::new(ScriptedInference::new(|req, _| {
        if req.range.end_page == 7 {
            Err(InferenceError::new(
                FailureKind::GeoBlocked,
                "User location is not supported for the API use.",
            ))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, Arc::clone(&inference), &config);
    let a = batch.add_source("a.pdf", "a.pdf", info(10, 100_000));
    let b = batch.add_source("b.pdf", "b.pdf", info(7, 70_000));
    let c = batch.add_source("c.pdf", "c.pdf", info(9, 90_000));

    let summary = batch.run().await;

    assert_eq!(summary.total, 3);
    assert_eq!((summary.completed, summary.failed), (2, 1));
    assert_eq!(summary.progress, Some(100));
    assert_eq!(batch.item(a).unwrap().status, BatchStatus::Complete);
    assert_eq!(batch.item(b).unwrap().status, BatchStatus::Error);
    assert_eq!(batch.item(c).unwrap().status, BatchStatus::Complete);
    assert!(batch
        .item(b)
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("location is not supported"));
    // Region blocks are never retried.
    assert_eq!(inference.calls().len(), 3);
}

#[tokio::test]
async fn prepare_marks_unreadable_inputs_as_errors() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.pdf");
    let bad = dir.path().join("notes.pdf");
    std::fs::write(&good, b"%PDF-1.7\n%fake body").unwrap();
    std::fs::write(&bad, b"PK\x03\x04 not a pdf").unwrap();

    let renderer = Arc::new(
        FakeRenderer::new(16).with_doc(good.to_str().unwrap(), info(5, 20)),
    );
    let inference = Arc::new(ScriptedInference::new(|req, _| Ok(pick_first(req))));
    let errors = Arc::new(ErrorLog::default());
    let config = assert_ok!(PipelineConfig::builder()
        .progress_callback(Arc::clone(&errors) as Arc<dyn BatchProgressCallback>)
        .build());
    let mut batch = orchestrator(renderer, inference, &config);
    let events = batch.subscribe();
    let g = batch.add(good.to_str().unwrap());
    let b = batch.add(bad.to_str().unwrap());
    let m = batch.add(dir.path().join("missing.pdf").to_str().unwrap());
    assert_eq!(batch.count(BatchStatus::Pending), 3);

    let ready = batch.prepare().await;

    assert_eq!(ready, 1);
    assert_eq!(batch.item(g).unwrap().status, BatchStatus::Ready);
    assert_eq!(batch.item(g).unwrap().info.as_ref().unwrap().page_count, 5);
    assert_eq!(batch.item(b).unwrap().status, BatchStatus::Error);
    assert_eq!(batch.item(m).unwrap().status, BatchStatus::Error);

    // Both failures are reported as soon as prepare finds them.
    let reported = errors.labels();
    assert_eq!(reported.len(), 2);
    assert!(reported[0].ends_with("notes.pdf"), "{reported:?}");
    assert!(reported[1].ends_with("missing.pdf"), "{reported:?}");

    // Only the ready item runs.
    let summary = batch.run().await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(errors.labels().len(), 2);

    drop(batch);
    let events: Vec<BatchEvent> = events.collect().await;
    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::DocumentFailed { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![b, m]);
}

#[tokio::test(start_paused = true)]
async fn reset_remove_and_clear_follow_the_lifecycle() {
    let renderer = Arc::new(
        FakeRenderer::new(16)
            .with_doc("blocked.pdf", info(7, 70_000))
            .with_doc("ok.pdf", info(4, 40_000)),
    );
    let inference = Arc::new(ScriptedInference::new(|req, _| {
        if req.range.end_page == 7 {
            Err(InferenceError::new(FailureKind::GeoBlocked, "region is not supported"))
        } else {
            Ok(pick_first(req))
        }
    }));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, inference, &config);
    let blocked = batch.add_source("blocked.pdf", "blocked.pdf", info(7, 70_000));
    let ok = batch.add_source("ok.pdf", "ok.pdf", info(4, 40_000));
    let pending = batch.add("later.pdf");

    batch.run().await;
    assert_eq!(batch.item(blocked).unwrap().status, BatchStatus::Error);

    // Reset of a complete item is refused; of an error item goes back to ready.
    assert!(matches!(
        batch.reset(ok),
        Err(InsightError::InvalidTransition { .. })
    ));
    assert_eq!(assert_ok!(batch.reset(blocked)), BatchStatus::Ready);
    let item = batch.item(blocked).unwrap();
    assert!(item.error.is_none() && item.result.is_none());

    // clear() drops what has not started: the reset item and the pending one.
    assert_eq!(batch.clear(), 2);
    assert!(batch.item(pending).is_none());
    assert!(batch.item(blocked).is_none());

    let removed = assert_ok!(batch.remove(ok));
    assert_eq!(removed.name, "ok.pdf");
    assert!(batch.items().is_empty());
    assert!(matches!(
        batch.remove(ok),
        Err(InsightError::UnknownItem { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn event_stream_follows_batch_order() {
    let renderer = Arc::new(FakeRenderer::new(16).with_doc("deck.pdf", info(4, 40_000)));
    let inference = Arc::new(ScriptedInference::new(|req, _| Ok(pick_first(req))));
    let config = PipelineConfig::default();
    let mut batch = orchestrator(renderer, inference, &config);
    let events = batch.subscribe();

    let id = batch.add_source("deck.pdf", "deck.pdf", info(4, 40_000));
    batch.run().await;
    drop(batch);

    let events: Vec<BatchEvent> = events.collect().await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            BatchEvent::StatusChanged { status, .. } => match status {
                BatchStatus::Ready => "ready",
                BatchStatus::Analyzing => "analyzing",
                BatchStatus::Complete => "complete",
                _ => "other-status",
            },
            BatchEvent::BatchStarted { .. } => "started",
            BatchEvent::Progress { .. } => "progress",
            BatchEvent::DocumentCompleted { .. } => "document-completed",
            BatchEvent::DocumentFailed { .. } => "document-failed",
            BatchEvent::BatchCompleted { .. } => "batch-completed",
        })
        .collect();

    assert_eq!(&kinds[..3], &["ready", "started", "analyzing"]);
    assert_eq!(
        &kinds[kinds.len() - 3..],
        &["complete", "document-completed", "batch-completed"]
    );
    assert!(kinds[3..kinds.len() - 3].iter().all(|k| *k == "progress"));

    // Document percent never goes backwards, and batch percent stays in range.
    let mut last = 0;
    for e in &events {
        if let BatchEvent::Progress { id: eid, event, batch } = e {
            assert_eq!(*eid, id);
            assert!(event.percent >= last, "{event:?}");
            last = event.percent;
            assert!(batch.progress.unwrap() <= 100);
        }
    }
    assert_eq!(last, 100);
}
