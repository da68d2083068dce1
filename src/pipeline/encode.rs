//! Image encoding: `DynamicImage` → base64 JPEG/PNG wrapped in [`EncodedImage`].
//!
//! Chunk renders go out as JPEG at the profile's quality: a 12-slide chunk of
//! lossless PNGs easily breaks the 20 MB request ceiling, while slide text
//! stays legible at quality 0.55 and above. The quality-upgrade stage
//! prefers lossless PNG and only falls back to high-quality JPEG when the PNG
//! is too large.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// One rendered page, base64-encoded and ready for a request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    /// 1-indexed page number this image was rendered from.
    pub page_number: u32,
    pub mime_type: String,
    /// Base64 payload without a data-URI prefix.
    pub data: String,
}

impl EncodedImage {
    pub fn new(page_number: u32, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            page_number,
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Size of the encoded payload in bytes.
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }

    /// `data:<mime>;base64,<payload>` form for embedding in HTML or JSON.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Convert to the provider-facing image type.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.mime_type.clone()).with_detail("high")
    }
}

/// Total encoded size of a chunk payload.
pub fn payload_bytes(images: &[EncodedImage]) -> usize {
    images.iter().map(EncodedImage::encoded_len).sum()
}

/// Encode a page as base64 JPEG at `quality` (1–100).
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn encode_jpeg(
    page_number: u32,
    img: &DynamicImage,
    quality: u8,
) -> Result<EncodedImage, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64 (jpeg q{})", page_number, b64.len(), quality);
    Ok(EncodedImage::new(page_number, "image/jpeg", b64))
}

/// Encode a page as base64 PNG (lossless).
pub fn encode_png(page_number: u32, img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64 (png)", page_number, b64.len());
    Ok(EncodedImage::new(page_number, "image/png", b64))
}

/// Encode a high-fidelity render: PNG, or JPEG at `fallback_quality` when the
/// PNG exceeds `max_encoded_bytes`.
///
/// Returns the image and whether it was downgraded to the fallback format.
pub fn encode_high_fidelity(
    page_number: u32,
    img: &DynamicImage,
    max_encoded_bytes: usize,
    fallback_quality: u8,
) -> Result<(EncodedImage, bool), image::ImageError> {
    let png = encode_png(page_number, img)?;
    if png.encoded_len() <= max_encoded_bytes {
        return Ok((png, false));
    }
    debug!(
        "Page {}: PNG is {} bytes (> {}), falling back to JPEG q{}",
        page_number,
        png.encoded_len(),
        max_encoded_bytes,
        fallback_quality
    );
    Ok((encode_jpeg(page_number, img, fallback_quality)?, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    fn noisy(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
            let v = ((x * 31 + y * 17) ^ (x * y)) as u8;
            Rgba([v, v.wrapping_mul(3), v.wrapping_add(91), 255])
        }))
    }

    #[test]
    fn encode_small_png() {
        let data = encode_png(1, &red(10, 10)).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.page_number, 1);
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn encode_small_jpeg_flattens_alpha() {
        let data = encode_jpeg(4, &red(16, 16), 75).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn high_fidelity_keeps_png_under_ceiling() {
        let (img, downgraded) = encode_high_fidelity(2, &red(32, 32), 1_000_000, 92).unwrap();
        assert!(!downgraded);
        assert_eq!(img.mime_type, "image/png");
    }

    #[test]
    fn high_fidelity_falls_back_to_jpeg_over_ceiling() {
        let (img, downgraded) = encode_high_fidelity(2, &noisy(200, 200), 64, 92).unwrap();
        assert!(downgraded);
        assert_eq!(img.mime_type, "image/jpeg");
    }

    #[test]
    fn payload_sums_encoded_sizes() {
        let images = vec![
            EncodedImage::new(1, "image/jpeg", "a".repeat(10)),
            EncodedImage::new(2, "image/jpeg", "b".repeat(5)),
        ];
        assert_eq!(payload_bytes(&images), 15);
        assert!(images[0].data_uri().starts_with("data:image/jpeg;base64,"));
    }
}
