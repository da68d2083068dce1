//! Output types: per-chunk model results and the merged per-document artifact.
//!
//! Field names serialise in camelCase because that is the shape the model is
//! asked to answer in (see [`crate::prompts`]); snake_case aliases are accepted
//! on input since some models drift to it.

use crate::error::ChunkFailure;
use crate::pipeline::encode::EncodedImage;
use serde::{Deserialize, Serialize};

/// Document-level fields the model reports for a deck.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeckMetadata {
    #[serde(alias = "company_name")]
    pub company_name: String,
    #[serde(alias = "fiscal_period")]
    pub fiscal_period: String,
    pub ticker: String,
    #[serde(alias = "market_cap_bucket", alias = "marketCap")]
    pub market_cap_bucket: String,
    pub industry: String,
    pub description: String,
    #[serde(alias = "external_link", skip_serializing_if = "Option::is_none")]
    pub external_link: Option<String>,
}

/// One page the model picked as an insight slide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedSlide {
    #[serde(alias = "selected_page_number", alias = "pageNumber", alias = "page")]
    pub selected_page_number: u32,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, alias = "revealed_content")]
    pub revealed_content: String,
    /// Rendered page image; attached by the pipeline, never by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_image: Option<EncodedImage>,
    /// True once the quality upgrade replaced the chunk-stage image.
    #[serde(default)]
    pub high_fidelity: bool,
}

/// The model's structured answer for one page range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    #[serde(flatten)]
    pub metadata: DeckMetadata,
    #[serde(default, alias = "selectedSlides", alias = "selected_slides")]
    pub slides: Vec<SelectedSlide>,
}

/// The merged, final per-document result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentArtifact {
    #[serde(flatten)]
    pub metadata: DeckMetadata,
    /// Deduplicated by page number, sorted ascending.
    pub slides: Vec<SelectedSlide>,
}

impl DocumentArtifact {
    pub fn page_numbers(&self) -> Vec<u32> {
        self.slides.iter().map(|s| s.selected_page_number).collect()
    }
}

/// Counters and timings for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub page_count: u32,
    /// Ranges in the initial plan.
    pub chunks_planned: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    /// Ranges bisected because of size or repeated failure.
    pub splits: usize,
    /// Retries across all ranges (first attempts not counted).
    pub retries: usize,
    pub slides_selected: usize,
    pub slides_upgraded: usize,
    pub slides_downgraded: usize,
    pub upgrade_failures: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_duration_ms: u64,
    pub chunk_duration_ms: u64,
    pub upgrade_duration_ms: u64,
}

/// Everything produced for one document that has a usable result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReport {
    /// Display name of the document.
    pub document: String,
    pub artifact: DocumentArtifact,
    /// Partial coverage and/or quality fallbacks, if any.
    pub warning: Option<String>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub stats: DocumentStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_result_accepts_camel_and_snake_case() {
        let camel = r#"{
            "companyName": "Acme Corp",
            "fiscalPeriod": "Q3 FY24",
            "ticker": "ACME",
            "marketCapBucket": "mid",
            "industry": "Industrials",
            "description": "Widgets",
            "slides": [
                {"selectedPageNumber": 4, "rationale": "Margin bridge", "revealedContent": "GM +120bp"}
            ]
        }"#;
        let snake = r#"{
            "company_name": "Acme Corp",
            "fiscal_period": "Q3 FY24",
            "selected_slides": [{"selected_page_number": 4, "rationale": "Margin bridge"}]
        }"#;
        let a: ChunkResult = serde_json::from_str(camel).unwrap();
        let b: ChunkResult = serde_json::from_str(snake).unwrap();
        assert_eq!(a.metadata.company_name, "Acme Corp");
        assert_eq!(b.metadata.company_name, "Acme Corp");
        assert_eq!(a.slides[0].selected_page_number, 4);
        assert_eq!(b.slides[0].selected_page_number, 4);
        assert_eq!(b.metadata.ticker, "");
        assert!(a.metadata.external_link.is_none());
    }

    #[test]
    fn artifact_serialises_flat_camel_case() {
        let artifact = DocumentArtifact {
            metadata: DeckMetadata {
                company_name: "Acme".into(),
                ..DeckMetadata::default()
            },
            slides: vec![SelectedSlide {
                selected_page_number: 3,
                ..SelectedSlide::default()
            }],
        };
        let v = serde_json::to_value(&artifact).unwrap();
        assert_eq!(v["companyName"], "Acme");
        assert_eq!(v["slides"][0]["selectedPageNumber"], 3);
        assert!(v["slides"][0].get("pageImage").is_none());
        assert_eq!(artifact.page_numbers(), vec![3]);
    }
}
