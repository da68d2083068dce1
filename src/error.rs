//! Error types for the edgequake-insights library.
//!
//! Three distinct error types reflect three distinct failure scopes:
//!
//! * [`InsightError`]: **Fatal for one document** (or for setup): the file
//!   cannot be read, the provider is not configured, the region is blocked,
//!   or nothing usable survived. The batch records it on the item and moves on.
//!
//! * [`InferenceError`]: **One attempt at one chunk** failed. It carries a
//!   typed [`FailureKind`] produced by the boundary that talked to the
//!   inference service, so the retry engine can decide between retrying,
//!   splitting, skipping, or aborting without re-reading message text.
//!
//! * [`ChunkFailure`]: **Non-fatal**: a page range exhausted every option.
//!   Stored in [`crate::output::DocumentReport`] so callers see partial
//!   coverage instead of losing the whole deck to one bad range.

use crate::pipeline::plan::PageRange;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All document-level and setup errors returned by the library.
#[derive(Debug, Error)]
pub enum InsightError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document reported zero pages.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider refused the request because of the caller's region.
    ///
    /// Aborts the current document only; remaining chunks are not attempted.
    #[error(
        "The inference provider rejected '{document}' due to regional policy: {detail}\n\
Switch to a provider available in your region (--provider) or route through a supported region."
    )]
    GeoBlocked { document: String, detail: String },

    /// Every chunk of the document failed; no result exists.
    #[error("All {total} chunks failed.\nFirst error: {first_error}")]
    AllChunksFailed { total: usize, first_error: String },

    /// Chunks succeeded but no slide survived merging.
    #[error("No insight slides were selected for '{document}'")]
    EmptyResult { document: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output artifact file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Batch errors ──────────────────────────────────────────────────────
    /// No batch item carries this identifier.
    #[error("Unknown batch item '{id}'")]
    UnknownItem { id: String },

    /// The requested lifecycle change is not allowed from the item's status.
    #[error("Batch item '{id}' cannot be {action} while {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: String,
    },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH to the directory\n\
that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a single failed attempt should be treated.
///
/// Produced at the inference/render boundary; consumed by
/// [`crate::pipeline::retry::RetryPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Regional policy rejection. Never retried.
    GeoBlocked,
    /// Quota or rate limit. `retry_after` is the upstream-suggested wait.
    RateLimited { retry_after: Option<Duration> },
    /// 5xx, timeout, network, overload or service-side image failure.
    Transient,
    /// The payload is too large for one request; smaller ranges may pass.
    OversizedPayload,
    /// Anything else.
    Fatal,
}

impl FailureKind {
    /// Rate limits and transient failures are worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FailureKind::RateLimited { .. } | FailureKind::Transient)
    }

    /// Short label used in logs and warnings.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::GeoBlocked => "geo-blocked",
            FailureKind::RateLimited { .. } => "rate-limited",
            FailureKind::Transient => "transient",
            FailureKind::OversizedPayload => "oversized payload",
            FailureKind::Fatal => "fatal",
        }
    }
}

/// One failed attempt at rendering or analysing a chunk.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct InferenceError {
    pub kind: FailureKind,
    pub message: String,
}

impl InferenceError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }

    pub fn oversized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::OversizedPayload, message)
    }
}

/// A page range that failed permanently.
///
/// Recorded in the document report; processing continued with the next range.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Pages {range}: {detail} (after {attempts} attempt(s))")]
pub struct ChunkFailure {
    pub range: PageRange,
    pub kind: FailureKind,
    pub attempts: u32,
    pub detail: String,
}
