//! Chunk planning: partition a deck's pages into inference-sized ranges.
//!
//! Image-heavy decks render to larger payloads per page, so the chunk size is
//! chosen once per document from the average encoded bytes per page. The plan
//! is only the initial seed: the document driver splits ranges in place when
//! a chunk turns out too large or keeps failing.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// An inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRange {
    pub start_page: u32,
    pub end_page: u32,
}

impl PageRange {
    /// Create a range. `start_page` must be ≥ 1 and ≤ `end_page`.
    pub fn new(start_page: u32, end_page: u32) -> Self {
        debug_assert!(start_page >= 1 && start_page <= end_page);
        Self {
            start_page,
            end_page,
        }
    }

    /// Number of pages in the range.
    pub fn len(&self) -> u32 {
        self.end_page - self.start_page + 1
    }

    /// Always false; a range holds at least one page.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_single_page(&self) -> bool {
        self.start_page == self.end_page
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.start_page..=self.end_page).contains(&page)
    }

    /// Zero-based offset of the first page; sent to the model so it can
    /// report absolute page numbers.
    pub fn page_offset(&self) -> u32 {
        self.start_page - 1
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start_page..=self.end_page
    }

    /// Bisect at the midpoint into `[a, m]` and `[m + 1, b]`.
    ///
    /// Returns `None` for a single page, which cannot be split.
    pub fn split(&self) -> Option<(PageRange, PageRange)> {
        if self.is_single_page() {
            return None;
        }
        let mid = self.start_page + (self.end_page - self.start_page) / 2;
        Some((
            PageRange::new(self.start_page, mid),
            PageRange::new(mid + 1, self.end_page),
        ))
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_page() {
            write!(f, "{}", self.start_page)
        } else {
            write!(f, "{}-{}", self.start_page, self.end_page)
        }
    }
}

/// Byte-per-page thresholds that select the chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSizing {
    /// Above this many bytes per page, use `large_chunk_pages`.
    pub large_page_bytes: u64,
    pub large_chunk_pages: u32,
    /// Above this many bytes per page, use `medium_chunk_pages`.
    pub medium_page_bytes: u64,
    pub medium_chunk_pages: u32,
    /// Everything lighter.
    pub default_chunk_pages: u32,
}

impl Default for ChunkSizing {
    fn default() -> Self {
        Self {
            large_page_bytes: 550 * 1024,
            large_chunk_pages: 6,
            medium_page_bytes: 320 * 1024,
            medium_chunk_pages: 8,
            default_chunk_pages: 12,
        }
    }
}

impl ChunkSizing {
    /// Pages per chunk for a document of `file_size` bytes and `page_count` pages.
    pub fn pages_per_chunk(&self, page_count: u32, file_size: u64) -> u32 {
        let bytes_per_page = file_size / u64::from(page_count.max(1));
        let size = if bytes_per_page > self.large_page_bytes {
            self.large_chunk_pages
        } else if bytes_per_page > self.medium_page_bytes {
            self.medium_chunk_pages
        } else {
            self.default_chunk_pages
        };
        size.max(1)
    }
}

/// Partition `1..=page_count` into ordered, non-overlapping ranges.
pub fn plan_chunks(page_count: u32, file_size: u64, sizing: &ChunkSizing) -> Vec<PageRange> {
    let chunk = sizing.pages_per_chunk(page_count, file_size);
    let mut ranges = Vec::with_capacity(page_count.div_ceil(chunk) as usize);
    let mut start = 1u32;
    while start <= page_count {
        let end = (start + chunk - 1).min(page_count);
        ranges.push(PageRange::new(start, end));
        start = end + 1;
    }
    debug!(
        "Planned {} chunk(s) of up to {} pages for {} pages / {} bytes",
        ranges.len(),
        chunk,
        page_count,
        file_size
    );
    ranges
}
