//! Page image → base64 `ImageData` for the vision request.
//!
//! Rendered pages are already PNG, so the bytes go to the model as-is after a
//! header check. Anything else that decodes (a JPEG dropped into the cache
//! directory by hand, say) is re-encoded to PNG first.

use crate::error::Pdf2MdError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Wrap PNG bytes as a base64 `ImageData` with `detail: "high"`.
///
/// Fine print and small table cells are unreadable at low detail.
pub fn png_image_data(png: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(png), "image/png").with_detail("high")
}

/// Encode a decoded image as PNG.
pub fn encode_image(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(png_image_data(&buf))
}

/// Validate `bytes` as an image and produce PNG `ImageData` from them.
pub fn encode_image_bytes(bytes: &[u8]) -> Result<ImageData, image::ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    match reader.format() {
        Some(ImageFormat::Png) => {
            let (w, h) = reader.into_dimensions()?;
            debug!("PNG {}x{}, {} bytes", w, h, bytes.len());
            Ok(png_image_data(bytes))
        }
        _ => {
            let img = reader.decode()?;
            debug!("Re-encoding {}x{} image as PNG", img.width(), img.height());
            encode_image(&img)
        }
    }
}

/// Read a rendered page from disk and encode it.
pub async fn load_page_image(path: &Path) -> Result<ImageData, Pdf2MdError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Pdf2MdError::ImageLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    encode_image_bytes(&bytes).map_err(|e| Pdf2MdError::ImageLoad {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}
