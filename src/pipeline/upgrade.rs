//! Quality upgrade: re-render only the selected pages at high fidelity.
//!
//! Runs after merging, so the expensive render touches the handful of pages
//! that made the cut rather than the whole deck. Per page, a lossless PNG is
//! preferred, a high-quality JPEG is used when the PNG is too large, and on a
//! render failure the chunk-stage image is kept. Nothing here can fail the
//! document; problems come back as a warning.

use crate::output::DocumentArtifact;
use crate::pipeline::render::{HighQualityOptions, PageRenderer};
use crate::progress::StageSink;
use std::path::Path;
use tracing::{info, warn};

/// What the upgrade did to each selected page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityReport {
    /// Pages now carrying a high-fidelity image (PNG or fallback JPEG).
    pub upgraded: Vec<u32>,
    /// Subset of `upgraded` that fell back to JPEG.
    pub downgraded: Vec<u32>,
    /// Pages that kept their chunk-stage image.
    pub failed: Vec<u32>,
}

impl QualityReport {
    /// User-facing summary of quality fallbacks, if there were any.
    pub fn warning(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.failed.is_empty() {
            parts.push(format!(
                "high-fidelity render failed for page(s) {}; kept the analysis image",
                join_pages(&self.failed)
            ));
        }
        if !self.downgraded.is_empty() {
            parts.push(format!(
                "page(s) {} exceeded the image size limit and were saved as JPEG",
                join_pages(&self.downgraded)
            ));
        }
        if parts.is_empty() {
            None
        } else {
            Some(format!("Quality: {}", parts.join("; ")))
        }
    }
}

fn join_pages(pages: &[u32]) -> String {
    pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Re-render every slide of `artifact` at high fidelity, in place.
pub async fn upgrade_slides(
    renderer: &dyn PageRenderer,
    path: &Path,
    artifact: &mut DocumentArtifact,
    options: &HighQualityOptions,
    sink: &dyn StageSink,
) -> QualityReport {
    let pages = artifact.page_numbers();
    let mut report = QualityReport::default();
    if pages.is_empty() {
        return report;
    }

    let render = match renderer
        .render_pages_high_quality(path, &pages, options, sink)
        .await
    {
        Ok(render) => render,
        Err(e) => {
            warn!("Quality upgrade skipped: {}", e);
            report.failed = pages;
            return report;
        }
    };

    for slide in &mut artifact.slides {
        let page = slide.selected_page_number;
        match render.images_by_page.get(&page) {
            Some(image) => {
                slide.page_image = Some(image.clone());
                slide.high_fidelity = true;
                report.upgraded.push(page);
                if render.downgraded_pages.contains(&page) {
                    report.downgraded.push(page);
                }
            }
            None => report.failed.push(page),
        }
    }

    info!(
        "Quality upgrade: {} upgraded, {} as JPEG, {} kept",
        report.upgraded.len(),
        report.downgraded.len(),
        report.failed.len()
    );
    report
}
