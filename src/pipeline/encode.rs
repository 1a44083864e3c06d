//! Page image → base64 PNG `ImageData` for the vision request body.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as lossless PNG with `detail: "high"`.
///
/// Sub- and superscripts are a few pixels tall; JPEG artefacts and
/// low-detail tiling both erase them.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} page → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
