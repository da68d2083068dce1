//! Result merging: many chunk results → one document artifact.
//!
//! Slides are deduplicated by page number (first seen wins) and sorted
//! ascending. Each metadata field is resolved on its own: the first non-empty
//! value across chunks, else the first chunk's value, so a mid-deck chunk that
//! could not see the company header never blanks out a field another chunk
//! filled.

use crate::error::InsightError;
use crate::output::{ChunkResult, DeckMetadata, DocumentArtifact, SelectedSlide};
use std::collections::BTreeMap;
use tracing::debug;

/// Merge `results` (in processing order) into one artifact for `document`.
///
/// Fails with [`InsightError::EmptyResult`] when no slide survives.
pub fn merge_chunk_results(
    results: &[ChunkResult],
    document: &str,
) -> Result<DocumentArtifact, InsightError> {
    let mut by_page: BTreeMap<u32, SelectedSlide> = BTreeMap::new();
    for slide in results.iter().flat_map(|r| r.slides.iter()) {
        by_page
            .entry(slide.selected_page_number)
            .or_insert_with(|| slide.clone());
    }

    if by_page.is_empty() {
        return Err(InsightError::EmptyResult {
            document: document.to_string(),
        });
    }

    let metadata = merge_metadata(results);
    debug!(
        "Merged {} chunk result(s) into {} slide(s) for {}",
        results.len(),
        by_page.len(),
        document
    );

    Ok(DocumentArtifact {
        metadata,
        slides: by_page.into_values().collect(),
    })
}

fn merge_metadata(results: &[ChunkResult]) -> DeckMetadata {
    let metas: Vec<&DeckMetadata> = results.iter().map(|r| &r.metadata).collect();

    DeckMetadata {
        company_name: first_non_empty(&metas, |m| &m.company_name),
        fiscal_period: first_non_empty(&metas, |m| &m.fiscal_period),
        ticker: first_non_empty(&metas, |m| &m.ticker),
        market_cap_bucket: first_non_empty(&metas, |m| &m.market_cap_bucket),
        industry: first_non_empty(&metas, |m| &m.industry),
        description: first_non_empty(&metas, |m| &m.description),
        external_link: metas
            .iter()
            .find_map(|m| m.external_link.as_ref().filter(|l| !l.trim().is_empty()))
            .or_else(|| metas.first().and_then(|m| m.external_link.as_ref()))
            .cloned(),
    }
}

fn first_non_empty<F>(metas: &[&DeckMetadata], field: F) -> String
where
    F: Fn(&DeckMetadata) -> &String,
{
    metas
        .iter()
        .map(|m| field(*m))
        .find(|v| !v.trim().is_empty())
        .or_else(|| metas.first().map(|m| field(*m)))
        .cloned()
        .unwrap_or_default()
}
