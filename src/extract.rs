//! Per-page text extraction.
//!
//! The pipeline only needs three things from a PDF library: open a byte
//! buffer, report the page count, and return one page's text. Those are the
//! [`TextExtractor`] / [`PageText`] pair. [`PdfTextExtractor`] implements
//! them with `pdf-extract`.
//!
//! Extraction is CPU-bound and synchronous; async callers run it under
//! `spawn_blocking`.

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";

/// Extraction error. Malformed input never panics the caller; it comes back here.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("document is not valid text: {0}")]
    Text(String),

    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("extractor panicked: {0}")]
    Panicked(String),
}

/// An opened document from which page text can be read.
pub trait PageText: Send {
    fn page_count(&self) -> usize;

    /// Text of the 1-based `page`.
    fn page_text(&self, page: usize) -> Result<String, ExtractError>;
}

pub trait TextExtractor: Send + Sync {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PageText>, ExtractError>;
}

/// Open `bytes` and read every page in ascending order. The first page that
/// fails aborts the whole document.
pub fn extract_pages(
    extractor: &dyn TextExtractor,
    bytes: &[u8],
) -> Result<Vec<String>, ExtractError> {
    let doc = extractor.open(bytes)?;
    let count = doc.page_count();
    let mut pages = Vec::with_capacity(count);
    for page in 1..=count {
        let text = doc.page_text(page)?;
        tracing::debug!(page, chars = text.len(), "extracted page text");
        pages.push(text);
    }
    Ok(pages)
}

/// `pdf-extract` backed extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

struct ExtractedPages(Vec<String>);

impl PageText for ExtractedPages {
    fn page_count(&self) -> usize {
        self.0.len()
    }

    fn page_text(&self, page: usize) -> Result<String, ExtractError> {
        page.checked_sub(1)
            .and_then(|i| self.0.get(i))
            .cloned()
            .ok_or(ExtractError::PageOutOfRange {
                page,
                count: self.0.len(),
            })
    }
}

impl TextExtractor for PdfTextExtractor {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PageText>, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(Box::new(ExtractedPages(pages)))
    }
}

/// Pre-extracted text: UTF-8 with pages separated by form feeds (`\x0c`),
/// the layout `pdftotext` writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PageText>, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Text(e.to_string()))?;
        let pages = text.split('\x0c').map(str::to_string).collect();
        Ok(Box::new(ExtractedPages(pages)))
    }
}
