//! Retry policy: classify failures, compute backoff, decide the next action.
//!
//! Providers report errors as free text (the edgequake-llm error carries the
//! upstream body verbatim), so [`classify_message`] is the one place that reads
//! message text. It runs at the inference boundary and turns the text into a
//! [`FailureKind`]; everything downstream works on the typed value.
//!
//! ## Precedence
//!
//! 1. Regional policy block → [`FailureKind::GeoBlocked`]
//! 2. Payload too large (HTTP 413) → [`FailureKind::OversizedPayload`]
//! 3. Quota / rate-limit / "too many requests" wording → [`FailureKind::RateLimited`]
//! 4. HTTP 429 or 5xx without such wording, timeout, network, gateway,
//!    overload, image-processing failure → [`FailureKind::Transient`]
//! 5. Everything else → [`FailureKind::Fatal`]
//!
//! ## Backoff
//!
//! Linear, not exponential: `base × attempt`, or the upstream-suggested wait
//! plus a safety margin when the message carries one. Both are clamped to a
//! fixed ceiling.

use crate::error::FailureKind;
use crate::pipeline::plan::PageRange;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Fixed ceiling applied to every backoff in the system.
pub const MAX_BACKOFF: Duration = Duration::from_secs(90);

static HTTP_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:status(?:\s*code)?|http(?:/\d(?:\.\d)?)?|error(?:\s*code)?|code|api|failed\s+with|returned)\s*[:=]?\s*\(?([1-5]\d{2})\b",
    )
    .expect("valid status regex")
});

static RETRY_IN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:retry(?:ing)?\s*(?:in|after)|"?retry_?delay"?\s*:\s*"?|try again in)\s*(\d+(?:\.\d+)?)\s*(?:s\b|sec|second)"#)
        .expect("valid retry-in regex")
});

const GEO_PHRASES: &[&str] = &[
    "user location is not supported",
    "location is not supported",
    "unsupported_country_region_territory",
    "country, region, or territory not supported",
    "not available in your region",
    "not available in your country",
    "region is not supported",
];

const OVERSIZE_PHRASES: &[&str] = &[
    "payload too large",
    "request entity too large",
    "request too large",
    "request_too_large",
    "payload size exceeds",
];

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota",
    "resource exhausted",
    "resource_exhausted",
];

const TRANSIENT_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "network error",
    "connection reset",
    "connection refused",
    "connection closed",
    "error sending request",
    "fetch failed",
    "bad gateway",
    "gateway timeout",
    "service unavailable",
    "temporarily unavailable",
    "overloaded",
    "internal server error",
    "upstream connect error",
    "unsupported image",
    "could not process image",
    "unable to process input image",
    "failed to process image",
    "invalid image",
];

/// Classify a provider error message.
///
/// The status code is read after `status`, `HTTP`, `error`, `code`, `API`,
/// `failed with` or `returned`, which covers edgequake-llm's
/// `"Gemini API error (500): ..."` and `"OpenRouter API error 502: ..."`.
/// A bare 429 is `Transient`: only quota or rate-limit wording makes a
/// failure `RateLimited`, and so only that wording skips a range once its
/// budget is spent instead of splitting it.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    let status = http_status(message);

    if GEO_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureKind::GeoBlocked;
    }
    if status == Some(413) || OVERSIZE_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureKind::OversizedPayload;
    }
    if RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureKind::RateLimited {
            retry_after: suggested_wait(message),
        };
    }
    if matches!(status, Some(429 | 500..=599)) || TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureKind::Transient;
    }
    FailureKind::Fatal
}

/// First 3-digit HTTP status embedded in the message, if any.
pub fn http_status(message: &str) -> Option<u16> {
    HTTP_STATUS
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Upstream-suggested wait ("retry in 12.5s", `"retryDelay": "30s"`).
pub fn suggested_wait(message: &str) -> Option<Duration> {
    let secs: f64 = RETRY_IN
        .captures(message)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs.min(MAX_BACKOFF.as_secs_f64() * 10.0)))
}

/// What the document driver should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then retry the same range one rung down the render ladder.
    Retry { delay: Duration },
    /// Replace the range with its two halves and continue from the first.
    Split,
    /// Record the range as failed and move on.
    Skip,
    /// Stop processing this document.
    AbortDocument,
}

/// Retry budget and backoff parameters for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per range, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub safety_margin: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2_500),
            safety_margin: Duration::from_millis(1_000),
            cap: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based count of failed attempts).
    pub fn backoff(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        let cap = self.cap.min(MAX_BACKOFF);
        let delay = match suggested {
            Some(wait) => wait.saturating_add(self.safety_margin),
            None => self.base_delay.saturating_mul(attempt.max(1)),
        };
        delay.min(cap)
    }

    /// Decide what to do after `attempts` failed attempts at `range`.
    ///
    /// Oversized payloads never count against the budget: they split (or
    /// skip a single page) immediately.
    pub fn decide(&self, kind: &FailureKind, attempts: u32, range: &PageRange) -> RetryDecision {
        match kind {
            FailureKind::GeoBlocked => RetryDecision::AbortDocument,
            FailureKind::OversizedPayload => {
                if range.is_single_page() {
                    RetryDecision::Skip
                } else {
                    RetryDecision::Split
                }
            }
            FailureKind::RateLimited { retry_after } => {
                if attempts < self.max_attempts {
                    RetryDecision::Retry {
                        delay: self.backoff(attempts, *retry_after),
                    }
                } else {
                    // Smaller requests do not help against a quota.
                    RetryDecision::Skip
                }
            }
            FailureKind::Transient => {
                if attempts < self.max_attempts {
                    RetryDecision::Retry {
                        delay: self.backoff(attempts, None),
                    }
                } else if range.is_single_page() {
                    RetryDecision::Skip
                } else {
                    RetryDecision::Split
                }
            }
            FailureKind::Fatal => RetryDecision::Skip,
        }
    }
}
