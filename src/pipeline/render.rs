//! pdfium access: page text extraction and page rasterisation.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Both entry points move the work onto the blocking pool so Tokio worker
//! threads never stall on a large document. When a conversion times out the
//! blocking task is detached and left to finish on its own.
//!
//! ## Library lookup
//!
//! `PDFIUM_LIB_PATH` (a directory) is tried first, then the working directory,
//! then the system loader path.

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure inside the pdfium layer.
#[derive(Debug, Error)]
pub enum PdfError {
    /// pdfium itself could not be loaded.
    #[error("pdfium library not found: {0}")]
    Bind(String),

    #[error("'{path}' is not a PDF (magic bytes {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    #[error("cannot open '{path}': {detail}")]
    Load { path: PathBuf, detail: String },

    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },

    #[error("pdfium task panicked: {0}")]
    Join(String),
}

/// Bind pdfium from `PDFIUM_LIB_PATH`, `./`, or the system path.
pub fn bind_pdfium() -> Result<Pdfium, PdfError> {
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => warn!("PDFIUM_LIB_PATH={} unusable: {:?}", dir, e),
        }
    }

    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| PdfError::Bind(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

/// Verify the `%PDF` header before handing a file to pdfium.
pub fn check_pdf_magic(path: &Path) -> Result<(), PdfError> {
    let mut file = std::fs::File::open(path).map_err(|e| PdfError::Load {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|e| PdfError::Load {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    if &magic != b"%PDF" {
        return Err(PdfError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Text layer of every page, in page order.
pub async fn extract_page_text(pdf_path: &Path) -> Result<Vec<String>, PdfError> {
    check_pdf_magic(pdf_path)?;
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_page_text_blocking(&path))
        .await
        .map_err(|e| PdfError::Join(e.to_string()))?
}

fn extract_page_text_blocking(pdf_path: &Path) -> Result<Vec<String>, PdfError> {
    let pdfium = bind_pdfium()?;
    let document = load(&pdfium, pdf_path)?;

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = page.text().map_err(|e| PdfError::Page {
            page: idx + 1,
            detail: format!("{e:?}"),
        })?;
        pages.push(text.all());
    }
    info!("{}: text layer of {} page(s)", pdf_path.display(), pages.len());
    Ok(pages)
}

/// Rasterise every page with the longest edge capped at `max_pixels`.
///
/// ## Why cap pixels, not DPI?
///
/// Page sizes vary wildly: an A0 poster at 150 DPI would produce a
/// 12,000 × 17,000 px image. Capping the longest edge keeps memory bounded
/// and stays in the image-size range vision models handle well.
///
/// # Returns
/// `(page_index_0based, image)` pairs in page order.
pub async fn render_pages(
    pdf_path: &Path,
    max_pixels: u32,
) -> Result<Vec<(usize, DynamicImage)>, PdfError> {
    check_pdf_magic(pdf_path)?;
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || render_pages_blocking(&path, max_pixels))
        .await
        .map_err(|e| PdfError::Join(e.to_string()))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    max_pixels: u32,
) -> Result<Vec<(usize, DynamicImage)>, PdfError> {
    let pdfium = bind_pdfium()?;
    let document = load(&pdfium, pdf_path)?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        match page.render_with_config(&render_config) {
            Ok(bitmap) => {
                let image = bitmap.as_image();
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
                results.push((idx, image));
            }
            Err(e) => warn!("Skipping page {}: {:?}", idx + 1, e),
        }
    }
    Ok(results)
}

fn load<'a>(pdfium: &'a Pdfium, pdf_path: &Path) -> Result<PdfDocument<'a>, PdfError> {
    pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfError::Load {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}
