//! Render profiles: the fidelity ladder walked down on each retry.
//!
//! Repeated failures on a chunk are usually payload-size or service-load
//! related, so every retry renders the same pages smaller and more compressed.

use serde::{Deserialize, Serialize};

/// A resolution/compression tier used when converting pages to images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderProfile {
    /// Multiplier applied to the page's natural size (72 points per inch).
    pub scale: f32,
    /// JPEG quality in `0.0..=1.0`.
    pub compression_quality: f32,
}

impl RenderProfile {
    pub const fn new(scale: f32, compression_quality: f32) -> Self {
        Self {
            scale,
            compression_quality,
        }
    }

    /// Quality as the `1..=100` integer JPEG encoders expect.
    pub fn jpeg_quality(&self) -> u8 {
        (self.compression_quality.clamp(0.01, 1.0) * 100.0).round() as u8
    }
}

/// Default ladder, highest fidelity first.
pub const DEFAULT_RENDER_LADDER: [RenderProfile; 3] = [
    RenderProfile::new(1.15, 0.75),
    RenderProfile::new(1.0, 0.65),
    RenderProfile::new(0.85, 0.55),
];

/// Profile for zero-based attempt `attempt`, clamped to the last rung.
///
/// An empty ladder falls back to the default ladder.
pub fn select_profile(ladder: &[RenderProfile], attempt: u32) -> RenderProfile {
    let ladder = if ladder.is_empty() {
        &DEFAULT_RENDER_LADDER[..]
    } else {
        ladder
    };
    let idx = (attempt as usize).min(ladder.len() - 1);
    ladder[idx]
}
