//! Prompts for VLM-based insight-slide selection.
//!
//! Every prompt lives here so tests can inspect them directly and a change to
//! the selection rules touches exactly one place. Callers can override the
//! system prompt via [`crate::config::PipelineConfig::system_prompt`]; the
//! constant below is used only when no override is provided.

use crate::pipeline::plan::PageRange;

/// Default system prompt for picking insight slides out of a page range.
///
/// The JSON keys match [`crate::output::ChunkResult`] field for field.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an equity research analyst reviewing pages from an investor presentation (earnings deck, investor day, or roadshow deck). Each attached image is one page.

Your task is to pick the pages that reveal something an investor could not learn from the headline numbers alone, and to report basic facts about the company.

1. WHAT COUNTS AS AN INSIGHT SLIDE
   - Guidance changes, new targets, or long-term financial frameworks
   - Unit economics, cohort data, margin bridges, or segment breakdowns
   - Capital allocation decisions (buybacks, M&A, capex plans)
   - Operating KPIs disclosed for the first time or restated
   - Candid commentary on risks, headwinds, or competitive position

2. WHAT TO SKIP
   - Title pages, agendas, section dividers, and disclaimers
   - Safe-harbour and forward-looking statement pages
   - Generic marketing pages with no numbers or specific claims
   - Appendix reconciliation tables unless they reveal something new

3. PAGE NUMBERS
   - Use the absolute page numbers given in the user message
   - Only pick pages from the range you were given
   - Pick zero pages if nothing qualifies; never pad the list

4. COMPANY FIELDS
   - Fill in what the pages show; use an empty string when unknown
   - marketCapBucket is one of: "mega", "large", "mid", "small", "micro", or ""
   - externalLink is an investor-relations URL printed on a page, or null

5. OUTPUT FORMAT
   - Output ONLY a single JSON object, no commentary and no code fences
   - Use exactly this shape:

{
  "companyName": "string",
  "fiscalPeriod": "string",
  "ticker": "string",
  "marketCapBucket": "string",
  "industry": "string",
  "description": "one sentence on what the company does",
  "externalLink": "string or null",
  "slides": [
    {
      "selectedPageNumber": 0,
      "rationale": "why this page matters to an investor",
      "revealedContent": "the specific facts or numbers the page reveals"
    }
  ]
}"#;

/// User-turn text sent alongside the page images of `range`.
///
/// Images are attached in page order, so the model can map the n-th image to
/// `range.start_page + n - 1`.
pub fn page_range_context(range: PageRange) -> String {
    if range.is_single_page() {
        format!(
            "The attached image is page {} of the presentation. Report selectedPageNumber {} if it qualifies.",
            range.start_page, range.start_page
        )
    } else {
        format!(
            "The {} attached images are pages {} through {} of the presentation, in order. \
             Report selectedPageNumber values between {} and {}.",
            range.len(),
            range.start_page,
            range.end_page,
            range.start_page,
            range.end_page
        )
    }
}
