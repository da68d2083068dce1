//! Input resolution: turn a batch source (local path or URL) into a local PDF.
//!
//! pdfium opens files, not byte buffers, so URL sources are downloaded into a
//! `TempDir` that lives as long as the [`ResolvedInput`]. Removing a batch
//! item drops it and the download goes with it. Both paths check the `%PDF`
//! magic bytes up front so a mislabelled HTML error page fails as `NotAPdf`
//! instead of as a pdfium parse error several stages later.

use crate::error::InsightError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A source resolved to a readable local PDF.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Source was already a local file.
    Local(PathBuf),
    /// Source was a URL; the `TempDir` keeps the download alive.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the PDF regardless of where it came from.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, ResolvedInput::Downloaded { .. })
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Display name for a source: the file name of a path, or the last URL
/// segment, falling back to the source itself.
pub fn display_name(source: &str) -> String {
    if is_url(source) {
        return url_filename(source).unwrap_or_else(|| source.to_string());
    }
    Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string())
}

/// Resolve `source` to a local PDF, downloading URLs with `timeout_secs`.
pub async fn resolve_input(source: &str, timeout_secs: u64) -> Result<ResolvedInput, InsightError> {
    if is_url(source) {
        download_url(source, timeout_secs).await
    } else {
        resolve_local(Path::new(source))
    }
}

/// Check existence, readability and magic bytes of a local file.
pub fn resolve_local(path: &Path) -> Result<ResolvedInput, InsightError> {
    let path = path.to_path_buf();
    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InsightError::PermissionDenied { path });
        }
        Err(_) => return Err(InsightError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == PDF_MAGIC => {}
        Ok(()) => return Err(InsightError::NotAPdf { path, magic }),
        Err(_) => {
            return Err(InsightError::CorruptPdf {
                path,
                detail: "file is shorter than a PDF header".into(),
            })
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, InsightError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| InsightError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InsightError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = content_disposition_filename(&response)
        .or_else(|| url_filename(url))
        .unwrap_or_else(|| "downloaded.pdf".to_string());

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            InsightError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    let temp_dir = TempDir::new().map_err(|e| InsightError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(&filename);

    if bytes.len() < PDF_MAGIC.len() || &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(InsightError::NotAPdf { path, magic });
    }

    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| InsightError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), path.display());
    Ok(ResolvedInput::Downloaded {
        path,
        _temp_dir: temp_dir,
    })
}

/// Last non-empty URL path segment that looks like a file name.
fn url_filename(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    last.contains('.').then(|| sanitize_filename(last))
}

/// `filename="..."` from a Content-Disposition header, if present.
fn content_disposition_filename(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    parse_disposition_filename(header)
}

fn parse_disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"'))
        .filter(|name| !name.is_empty())
        .map(sanitize_filename)
}

/// Keep a downloaded name inside the temp dir.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}
