//! Page rendering: the [`PageRenderer`] capability and its pdfium backend.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves rasterisation and encoding onto the
//! blocking pool. Per-page progress comes back over an unbounded channel and
//! is forwarded to the caller's [`StageSink`] on the async side.
//!
//! ## Why cap pixels as well as scale?
//!
//! Slide decks mix 4:3, 16:9 and the occasional A3 appendix. A scale factor
//! alone lets an oversized page produce a huge bitmap; the pixel cap bounds
//! the longest edge regardless of physical size.

use crate::error::{InferenceError, InsightError};
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::plan::PageRange;
use crate::pipeline::profile::RenderProfile;
use crate::progress::{StageSink, StageUpdate};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Facts about a document needed before planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub page_count: u32,
    /// Size of the document file in bytes.
    pub byte_size: u64,
    pub title: Option<String>,
}

impl DocumentInfo {
    pub fn bytes_per_page(&self) -> u64 {
        self.byte_size / u64::from(self.page_count.max(1))
    }
}

/// Settings for the post-merge high-fidelity re-render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighQualityOptions {
    pub scale: f32,
    pub max_rendered_pixels: u32,
    /// Above this encoded size the PNG is replaced by a JPEG.
    pub max_encoded_bytes: usize,
    /// JPEG quality (`0.0..=1.0`) for the fallback.
    pub fallback_jpeg_quality: f32,
}

impl Default for HighQualityOptions {
    fn default() -> Self {
        Self {
            scale: 2.0,
            max_rendered_pixels: 3200,
            max_encoded_bytes: 4 * 1024 * 1024,
            fallback_jpeg_quality: 0.92,
        }
    }
}

/// Result of a high-fidelity render over a set of pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighQualityRender {
    pub images_by_page: BTreeMap<u32, EncodedImage>,
    /// Pages whose render failed outright.
    pub failed_pages: Vec<u32>,
    /// Pages that fell back to compressed JPEG.
    pub downgraded_pages: Vec<u32>,
}

/// Rendering capability consumed by the pipeline.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Page count and byte size, without rendering anything.
    async fn inspect(&self, path: &Path) -> Result<DocumentInfo, InsightError>;

    /// Render every page of `range` at `profile`.
    ///
    /// Emits [`StageUpdate::PageConverted`] per page.
    async fn render_pages(
        &self,
        path: &Path,
        range: PageRange,
        profile: RenderProfile,
        sink: &dyn StageSink,
    ) -> Result<Vec<EncodedImage>, InferenceError>;

    /// Re-render `pages` at high fidelity, with per-page fallback.
    ///
    /// Emits [`StageUpdate::Upgrading`] per page. An `Err` means the document
    /// could not be opened at all.
    async fn render_pages_high_quality(
        &self,
        path: &Path,
        pages: &[u32],
        options: &HighQualityOptions,
        sink: &dyn StageSink,
    ) -> Result<HighQualityRender, InsightError>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    password: Option<String>,
    max_rendered_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(password: Option<String>, max_rendered_pixels: u32) -> Self {
        Self {
            password,
            max_rendered_pixels: max_rendered_pixels.max(100),
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn inspect(&self, path: &Path) -> Result<DocumentInfo, InsightError> {
        let path = path.to_path_buf();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || inspect_blocking(&path, password.as_deref()))
            .await
            .map_err(|e| InsightError::Internal(format!("Inspect task panicked: {}", e)))?
    }

    async fn render_pages(
        &self,
        path: &Path,
        range: PageRange,
        profile: RenderProfile,
        sink: &dyn StageSink,
    ) -> Result<Vec<EncodedImage>, InferenceError> {
        let job = RenderJob {
            path: path.to_path_buf(),
            password: self.password.clone(),
            max_pixels: self.max_rendered_pixels,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || job.render_range(range, profile, &tx));

        while let Some(update) = rx.recv().await {
            sink.update(update);
        }

        handle
            .await
            .map_err(|e| InferenceError::fatal(format!("Render task panicked: {}", e)))?
    }

    async fn render_pages_high_quality(
        &self,
        path: &Path,
        pages: &[u32],
        options: &HighQualityOptions,
        sink: &dyn StageSink,
    ) -> Result<HighQualityRender, InsightError> {
        let job = RenderJob {
            path: path.to_path_buf(),
            password: self.password.clone(),
            max_pixels: options.max_rendered_pixels,
        };
        let pages = pages.to_vec();
        let options = *options;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle =
            tokio::task::spawn_blocking(move || job.render_high_quality(&pages, &options, &tx));

        while let Some(update) = rx.recv().await {
            sink.update(update);
        }

        handle
            .await
            .map_err(|e| InsightError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Everything a blocking render needs, owned so it can cross into spawn_blocking.
struct RenderJob {
    path: PathBuf,
    password: Option<String>,
    max_pixels: u32,
}

impl RenderJob {
    fn render_range(
        &self,
        range: PageRange,
        profile: RenderProfile,
        tx: &mpsc::UnboundedSender<StageUpdate>,
    ) -> Result<Vec<EncodedImage>, InferenceError> {
        let pdfium = bind_pdfium().map_err(|e| InferenceError::fatal(e.to_string()))?;
        let document = load_document(&pdfium, &self.path, self.password.as_deref())
            .map_err(|e| InferenceError::fatal(e.to_string()))?;
        let pages = document.pages();
        let total_pages = pages.len() as u32;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(profile.scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let count = range.len() as usize;
        let mut images = Vec::with_capacity(count);
        for (i, page_number) in range.pages().enumerate() {
            if page_number > total_pages {
                return Err(InferenceError::fatal(format!(
                    "Page {} is out of range (document has {} pages)",
                    page_number, total_pages
                )));
            }
            let image = render_page(&pages, page_number, &render_config)
                .map_err(InferenceError::fatal)?;
            let encoded = encode::encode_jpeg(page_number, &image, profile.jpeg_quality())
                .map_err(|e| {
                    InferenceError::fatal(format!("Encoding page {} failed: {}", page_number, e))
                })?;
            images.push(encoded);
            let _ = tx.send(StageUpdate::PageConverted {
                current: i + 1,
                total: count,
            });
        }
        Ok(images)
    }

    fn render_high_quality(
        &self,
        page_numbers: &[u32],
        options: &HighQualityOptions,
        tx: &mpsc::UnboundedSender<StageUpdate>,
    ) -> Result<HighQualityRender, InsightError> {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &self.path, self.password.as_deref())?;
        let pages = document.pages();

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);
        let fallback_quality = (options.fallback_jpeg_quality.clamp(0.01, 1.0) * 100.0).round() as u8;

        let mut out = HighQualityRender::default();
        let total = page_numbers.len();
        for (i, &page_number) in page_numbers.iter().enumerate() {
            let _ = tx.send(StageUpdate::Upgrading {
                current: i + 1,
                total,
                page: page_number,
            });

            let rendered = render_page(&pages, page_number, &render_config).and_then(|img| {
                encode::encode_high_fidelity(
                    page_number,
                    &img,
                    options.max_encoded_bytes,
                    fallback_quality,
                )
                .map_err(|e| format!("Encoding page {} failed: {}", page_number, e))
            });

            match rendered {
                Ok((image, downgraded)) => {
                    if downgraded {
                        out.downgraded_pages.push(page_number);
                    }
                    out.images_by_page.insert(page_number, image);
                }
                Err(detail) => {
                    warn!("High-fidelity render of page {} failed: {}", page_number, detail);
                    out.failed_pages.push(page_number);
                }
            }
        }
        Ok(out)
    }
}

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` may name the library file or its directory; otherwise the
/// working directory and then the system library path are tried.
fn bind_pdfium() -> Result<Pdfium, InsightError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(&p);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib)
        }
        _ => Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| InsightError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, InsightError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                InsightError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                InsightError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            InsightError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn render_page(
    pages: &PdfPages,
    page_number: u32,
    config: &PdfRenderConfig,
) -> Result<DynamicImage, String> {
    let page = pages
        .get((page_number - 1) as u16)
        .map_err(|e| format!("Page {}: {:?}", page_number, e))?;
    let bitmap = page
        .render_with_config(config)
        .map_err(|e| format!("Rasterisation failed for page {}: {:?}", page_number, e))?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_number,
        image.width(),
        image.height()
    );
    Ok(image)
}

fn inspect_blocking(pdf_path: &Path, password: Option<&str>) -> Result<DocumentInfo, InsightError> {
    let byte_size = std::fs::metadata(pdf_path)
        .map_err(|_| InsightError::FileNotFound {
            path: pdf_path.to_path_buf(),
        })?
        .len();

    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;
    let page_count = document.pages().len() as u32;
    if page_count == 0 {
        return Err(InsightError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    }

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_string())
        .filter(|v| !v.is_empty());

    info!(
        "PDF loaded: {} pages, {} bytes ({}): {}",
        page_count,
        byte_size,
        pdf_path.display(),
        title.as_deref().unwrap_or("untitled")
    );

    Ok(DocumentInfo {
        page_count,
        byte_size,
        title,
    })
}
