//! Post-processing: turn a raw model reply into a clean [`ChunkResult`].
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted VLMs return replies that are *semantically* right but
//! *structurally* sloppy:
//!
//! - Wrapping the JSON in ` ```json ... ``` ` fences despite the prompt
//! - Prefacing the object with a sentence ("Here is the analysis:")
//! - Zero-width spaces and BOMs copied from the slide text
//! - Page numbers relative to the chunk (1..=n) instead of the deck
//! - Placeholder links such as `https://example.com`
//!
//! Each rule here is a cheap, deterministic pure function so it can be
//! tested in isolation and re-ordered without side effects.
//!
//! ## Rule Order
//!
//! Normalise line endings and strip invisible characters before locating the
//! JSON object, so brace matching sees clean input; clean individual fields
//! only after decoding, so escapes inside strings are already resolved.

use crate::output::{ChunkResult, SelectedSlide};
use crate::pipeline::plan::PageRange;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Decode a model reply for `range` into a cleaned [`ChunkResult`].
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Strip outer code fences
/// 4. Cut the outermost `{ … }` object out of any surrounding prose
/// 5. Decode JSON
/// 6. Clean every text field (trim, collapse spaces and blank lines)
/// 7. Drop placeholder external links
/// 8. Rebase chunk-relative page numbers; drop numbers outside the range
pub fn parse_chunk_response(raw: &str, range: PageRange) -> Result<ChunkResult, String> {
    let s = normalise_line_endings(raw);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let json = extract_json_object(&s)
        .ok_or_else(|| format!("No JSON object in model reply: {}", preview(raw)))?;

    let mut result: ChunkResult = serde_json::from_str(json)
        .map_err(|e| format!("Malformed JSON in model reply ({e}): {}", preview(raw)))?;

    let meta = &mut result.metadata;
    meta.company_name = clean_field(&meta.company_name);
    meta.fiscal_period = clean_field(&meta.fiscal_period);
    meta.ticker = clean_field(&meta.ticker).to_uppercase();
    meta.market_cap_bucket = clean_field(&meta.market_cap_bucket);
    meta.industry = clean_field(&meta.industry);
    meta.description = clean_field(&meta.description);
    meta.external_link = meta
        .external_link
        .as_deref()
        .map(clean_field)
        .filter(|url| is_real_link(url));

    result.slides = result
        .slides
        .into_iter()
        .filter_map(|slide| {
            let page = rebase_page_number(slide.selected_page_number, range);
            if page.is_none() {
                warn!(
                    "Dropping slide with page {} outside chunk {}",
                    slide.selected_page_number, range
                );
            }
            page.map(|p| SelectedSlide {
                selected_page_number: p,
                rationale: clean_field(&slide.rationale),
                revealed_content: clean_field(&slide.revealed_content),
                page_image: None,
                high_fidelity: false,
            })
        })
        .collect();

    Ok(result)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").expect("valid fence regex")
});

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 4: Extract the JSON object ─────────────────────────────────────────
//
// Scans for the first `{` and returns the slice up to its matching `}`,
// tracking string literals so braces inside rationale text don't count.

fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Rule 6: Clean text fields ────────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid spaces regex"));
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank-lines regex"));

fn clean_field(input: &str) -> String {
    let lines: Vec<String> = input
        .lines()
        .map(|line| RE_SPACES.replace_all(line.trim_end(), " ").to_string())
        .collect();
    RE_BLANK_LINES
        .replace_all(lines.join("\n").trim(), "\n\n")
        .to_string()
}

// ── Rule 7: Drop placeholder links ───────────────────────────────────────────
//
// Models sometimes invent `https://example.com` or `N/A` for the investor
// relations link when the deck shows none. Keep only absolute HTTP(S) links
// whose host is not a known placeholder.

fn is_real_link(url: &str) -> bool {
    let lower = url.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    let placeholders = [
        "example.com",
        "example.org",
        "placeholder",
        "your-domain",
        "yourcompany",
        "url-here",
        "localhost",
    ];
    !placeholders.iter().any(|p| lower.contains(p))
}

// ── Rule 8: Rebase page numbers ──────────────────────────────────────────────

/// Map a model-reported page number onto the deck.
///
/// Absolute numbers inside `range` pass through. Numbers in `1..=len` that
/// fall outside the range are chunk-relative and are shifted by the page
/// offset. Anything else is dropped.
pub fn rebase_page_number(page: u32, range: PageRange) -> Option<u32> {
    if range.contains(page) {
        Some(page)
    } else if page >= 1 && page <= range.len() {
        let rebased = page + range.page_offset();
        debug!(
            "Pages {}: treating page {} as chunk-relative, rebased to {}",
            range, page, rebased
        );
        Some(rebased)
    } else {
        None
    }
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() > 120 {
        format!("{}\u{2026}", trimmed.chars().take(119).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{
        "companyName": "  Acme   Corp ",
        "fiscalPeriod": "Q3 FY24",
        "ticker": "acme",
        "marketCapBucket": "mid",
        "industry": "Industrials",
        "description": "Widgets\n\n\n\nand gadgets",
        "externalLink": "https://example.com",
        "slides": [
            {"selectedPageNumber": 15, "rationale": "Margin {bridge}", "revealedContent": "GM +120bp"},
            {"selectedPageNumber": 2, "rationale": "Guidance raise", "revealedContent": "FY guide up"}
        ]
    }"#;

    #[test]
    fn parses_plain_reply() {
        let r = parse_chunk_response(REPLY, PageRange::new(13, 20)).unwrap();
        assert_eq!(r.metadata.company_name, "Acme Corp");
        assert_eq!(r.metadata.ticker, "ACME");
        assert_eq!(r.metadata.description, "Widgets\n\nand gadgets");
        assert_eq!(r.metadata.external_link, None);
        // 15 is absolute; 2 is chunk-relative → 14.
        let pages: Vec<u32> = r.slides.iter().map(|s| s.selected_page_number).collect();
        assert_eq!(pages, vec![15, 14]);
        assert_eq!(r.slides[0].rationale, "Margin {bridge}");
    }

    #[test]
    fn parses_fenced_reply_with_preamble() {
        let raw = format!("```json\n{REPLY}\n```");
        assert!(parse_chunk_response(&raw, PageRange::new(13, 20)).is_ok());

        let raw = format!("Here is the analysis:\n{REPLY}\nLet me know!");
        assert!(parse_chunk_response(&raw, PageRange::new(13, 20)).is_ok());
    }

    #[test]
    fn strips_invisible_characters() {
        let raw = "\u{FEFF}{\"companyName\": \"Ac\u{200B}me\", \"slides\": []}";
        let r = parse_chunk_response(raw, PageRange::new(1, 12)).unwrap();
        assert_eq!(r.metadata.company_name, "Acme");
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_chunk_response("I cannot help with that.", PageRange::new(1, 4)).unwrap_err();
        assert!(err.contains("No JSON object"), "{err}");
        assert!(parse_chunk_response("{\"slides\": [", PageRange::new(1, 4)).is_err());
    }

    #[test]
    fn drops_out_of_range_pages() {
        let raw = r#"{"slides": [{"selectedPageNumber": 40}, {"selectedPageNumber": 0}]}"#;
        let r = parse_chunk_response(raw, PageRange::new(13, 20)).unwrap();
        assert!(r.slides.is_empty());
    }

    #[test]
    fn keeps_real_links() {
        assert!(is_real_link("https://ir.acme.com/q3"));
        assert!(!is_real_link("N/A"));
        assert!(!is_real_link("http://localhost:8080"));
    }

    #[test]
    fn rebase_rules() {
        let r = PageRange::new(13, 20);
        assert_eq!(rebase_page_number(13, r), Some(13));
        assert_eq!(rebase_page_number(20, r), Some(20));
        assert_eq!(rebase_page_number(1, r), Some(13));
        assert_eq!(rebase_page_number(8, r), Some(20));
        assert_eq!(rebase_page_number(9, r), None);
        assert_eq!(rebase_page_number(21, r), None);
        let first = PageRange::new(1, 12);
        assert_eq!(rebase_page_number(5, first), Some(5));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rebasing_is_logged_at_debug() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let r = PageRange::new(13, 20);
            assert_eq!(rebase_page_number(2, r), Some(14));
            assert_eq!(rebase_page_number(15, r), Some(15));
            assert_eq!(rebase_page_number(30, r), None);
        });

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("chunk-relative").count(), 1, "{text}");
        assert!(text.contains("DEBUG"), "{text}");
        assert!(
            text.contains("Pages 13-20: treating page 2 as chunk-relative, rebased to 14"),
            "{text}"
        );
    }

    #[test]
    fn clean_field_collapses_whitespace() {
        assert_eq!(clean_field("  a   b\t\tc  \n\n\n\nd "), "a b c\n\nd");
    }
}
