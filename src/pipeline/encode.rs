//! Image encoding: `DynamicImage` → base64 PNG wrapped in [`PageImage`].
//!
//! PNG over JPEG because lossless compression preserves text crispness;
//! compression artefacts on rendered text measurably degrade transcription
//! accuracy at low DPI.

use crate::gateway::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode one rasterised page for the model request body.
///
/// `page_num` is 1-based.
pub fn encode_page(page_num: usize, img: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", page_num, b64.len());

    Ok(PageImage::new(page_num, b64, "image/png"))
}
