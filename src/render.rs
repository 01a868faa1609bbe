//! Page rasterization.
//!
//! [`PageRasterizer`] turns one page of a document into an RGB bitmap;
//! [`encode_jpeg`] turns that bitmap into the bytes served to clients.
//! [`PdfiumRasterizer`] binds to the pdfium shared library at call time.
//! pdfium is not async-safe, so callers run it under `spawn_blocking`.

use std::path::PathBuf;

use image::{DynamicImage, RgbImage, RgbaImage};
use pdfium_render::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("rasterizer unavailable: {0}")]
    Unavailable(String),

    #[error("failed to open document: {0}")]
    Open(String),

    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("failed to render page {page}: {message}")]
    Render { page: usize, message: String },

    #[error("failed to encode JPEG: {0}")]
    Encode(String),

    #[error("rasterizer panicked: {0}")]
    Panicked(String),
}

impl RenderError {
    /// The page does not exist, as opposed to the renderer failing.
    pub fn is_missing_page(&self) -> bool {
        matches!(self, RenderError::PageOutOfRange { .. })
    }
}

pub trait PageRasterizer: Send + Sync {
    /// Render the 1-based `page` of the document in `bytes`.
    fn render_page(&self, bytes: &[u8], page: usize) -> Result<RgbImage, RenderError>;
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(img)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(out)
}

pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    target_width: u32,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>, target_width: u32) -> Self {
        Self {
            library_path,
            target_width,
        }
    }

    fn bind(&self) -> Result<Pdfium, RenderError> {
        let bindings = match &self.library_path {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RenderError::Unavailable(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_page(&self, bytes: &[u8], page: usize) -> Result<RgbImage, RenderError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| RenderError::Open(e.to_string()))?;

        let pages = document.pages();
        let count = pages.len() as usize;
        if page == 0 || page > count {
            return Err(RenderError::PageOutOfRange { page, count });
        }

        let index = PdfPageIndex::try_from(page - 1)
            .map_err(|_| RenderError::PageOutOfRange { page, count })?;
        let render_err = |e: PdfiumError| RenderError::Render {
            page,
            message: e.to_string(),
        };

        let pdf_page = pages.get(index).map_err(render_err)?;
        let config = PdfRenderConfig::new().set_target_width(self.target_width as i32);
        let bitmap = pdf_page.render_with_config(&config).map_err(render_err)?;

        let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
        let rgba = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(|| {
            RenderError::Render {
                page,
                message: format!("bitmap buffer does not match {}x{}", width, height),
            }
        })?;

        Ok(DynamicImage::ImageRgba8(rgba).to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_output_has_soi_and_eoi_markers() {
        let img = RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&img, 85).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn out_of_range_is_a_missing_page() {
        let err = RenderError::PageOutOfRange { page: 9, count: 2 };
        assert!(err.is_missing_page());
        assert!(!RenderError::Encode("x".into()).is_missing_page());
    }
}
