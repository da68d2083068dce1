//! Chunk execution: one attempt at one page range.
//!
//! Render at the attempt's profile, guard the payload size, call inference,
//! and attach the rendered images to the slides the model picked. Any failure
//! comes back as an [`InferenceError`] with a typed kind; deciding what to do
//! about it belongs to the document driver.

use crate::error::InferenceError;
use crate::pipeline::encode::{payload_bytes, EncodedImage};
use crate::pipeline::llm::{InferenceBackend, InferenceRequest, InferenceResponse};
use crate::pipeline::plan::PageRange;
use crate::pipeline::profile::{select_profile, RenderProfile};
use crate::pipeline::render::PageRenderer;
use crate::progress::{StageSink, StageUpdate};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const MIB: f64 = 1024.0 * 1024.0;

/// Runs single attempts at page ranges.
#[derive(Clone)]
pub struct ChunkExecutor {
    renderer: Arc<dyn PageRenderer>,
    inference: Arc<dyn InferenceBackend>,
    ladder: Vec<RenderProfile>,
    max_payload_bytes: usize,
    provider: Option<String>,
    model: Option<String>,
}

impl ChunkExecutor {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        inference: Arc<dyn InferenceBackend>,
        ladder: Vec<RenderProfile>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            renderer,
            inference,
            ladder,
            max_payload_bytes,
            provider: None,
            model: None,
        }
    }

    /// Provider and model names passed along with every request.
    pub fn with_selection(mut self, provider: Option<String>, model: Option<String>) -> Self {
        self.provider = provider;
        self.model = model;
        self
    }

    /// Attempt `range` once. `attempt` is zero-based and picks the render profile.
    pub async fn execute(
        &self,
        path: &Path,
        range: PageRange,
        attempt: u32,
        sink: &dyn StageSink,
    ) -> Result<InferenceResponse, InferenceError> {
        let profile = select_profile(&self.ladder, attempt);
        debug!(
            "Pages {}: attempt {} at scale {} quality {}",
            range,
            attempt + 1,
            profile.scale,
            profile.compression_quality
        );

        sink.update(StageUpdate::ConvertingPages {
            count: range.len() as usize,
        });
        let images = self
            .renderer
            .render_pages(path, range, profile, sink)
            .await?;

        let bytes = payload_bytes(&images);
        if bytes > self.max_payload_bytes {
            info!(
                "Pages {}: payload {:.1} MB over the {:.1} MB ceiling",
                range,
                bytes as f64 / MIB,
                self.max_payload_bytes as f64 / MIB
            );
            return Err(InferenceError::oversized(format!(
                "Rendered payload for pages {} is {:.1} MB, over the {:.1} MB limit",
                range,
                bytes as f64 / MIB,
                self.max_payload_bytes as f64 / MIB
            )));
        }

        sink.update(StageUpdate::Analyzing);
        let request = InferenceRequest {
            range,
            page_offset: range.page_offset(),
            images,
            provider: self.provider.clone(),
            model: self.model.clone(),
        };
        let mut response = self.inference.analyze(&request).await?;
        attach_images(&mut response, &request.images);
        Ok(response)
    }
}

/// Give each selected slide the chunk-stage image of its page.
fn attach_images(response: &mut InferenceResponse, images: &[EncodedImage]) {
    for slide in &mut response.result.slides {
        slide.page_image = images
            .iter()
            .find(|img| img.page_number == slide.selected_page_number)
            .cloned();
    }
}
