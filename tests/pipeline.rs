//! End-to-end pipeline tests over in-memory stores.
//!
//! Asserts: sentence round-trip, size fidelity (including zero bytes),
//! deletion completeness, search correctness, idempotent bucket creation,
//! out-of-range page requests, and same-name overwrite behavior.

use std::sync::Arc;

use folio::app::App;
use folio::blob::{BlobStore, MemoryBlobStore};
use folio::config::Config;
use folio::error::PipelineError;
use folio::extract::{extract_pages, PdfTextExtractor, PlainTextExtractor, TextExtractor};
use folio::render::{PageRasterizer, RenderError};
use folio::segment::{segment_pages, DelimiterSegmenter};
use folio::store::memory::InMemoryStore;
use image::RgbImage;
use tempfile::TempDir;

/// Page count is the number of form-feed separated sections in the blob.
struct SectionRasterizer;

impl PageRasterizer for SectionRasterizer {
    fn render_page(&self, bytes: &[u8], page: usize) -> Result<RgbImage, RenderError> {
        let count = bytes.split(|b| *b == 0x0c).count();
        if page == 0 || page > count {
            return Err(RenderError::PageOutOfRange { page, count });
        }
        Ok(RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0])))
    }
}

struct Pipeline {
    app: App,
    blobs: Arc<MemoryBlobStore>,
    _tmp: TempDir,
}

fn pipeline_with(extractor: Arc<dyn TextExtractor>) -> Pipeline {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.ingest.temp_dir = Some(tmp.path().to_path_buf());

    let blobs = Arc::new(MemoryBlobStore::with_bucket(&config.blob.bucket));
    let app = App::from_parts(
        &config,
        blobs.clone(),
        Arc::new(InMemoryStore::new()),
        extractor,
        Arc::new(SectionRasterizer),
    );
    Pipeline {
        app,
        blobs,
        _tmp: tmp,
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(Arc::new(PlainTextExtractor))
}

/// Minimal PDF with one page per entry in `pages`, Helvetica text.
/// Body first, then an xref with the real byte offsets.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    // Objects: 1 catalog, 2 pages, 3 font, then (page, content) pairs.
    let page_obj = |i: usize| 4 + 2 * i;
    let mut out = Vec::new();
    let mut offsets = Vec::new();

    out.extend_from_slice(b"%PDF-1.4\n");
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets.push(out.len());
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", page_obj(i))).collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        let p = page_obj(i);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                p,
                p + 1
            )
            .as_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                p + 1,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for off in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

#[tokio::test]
async fn two_page_document_yields_five_sentences() {
    let p = pipeline();
    let id = p
        .app
        .ingest
        .upload("scenario.pdf", &b"Hello world. Second page.\x0cFinal."[..])
        .await
        .unwrap();

    let detail = p.app.retrieve.get_by_id(id).await.unwrap();
    assert_eq!(
        detail.sentences,
        vec!["Hello world", " Second page", "", "Final", ""]
    );
}

#[tokio::test]
async fn sentences_round_trip_through_extractor_and_segmenter() {
    let p = pipeline();
    let body = b"Pi is 3.14. e is 2.71.\x0cDr. Who.\x0c\x0cEnd";
    let id = p.app.ingest.upload("r.pdf", &body[..]).await.unwrap();

    let pages = extract_pages(&PlainTextExtractor, body).unwrap();
    let expected = segment_pages(&DelimiterSegmenter::default(), &pages);
    assert_eq!(p.app.retrieve.get_by_id(id).await.unwrap().sentences, expected);
}

#[tokio::test]
async fn recorded_size_matches_bytes_for_any_length() {
    let p = pipeline();
    for len in [0usize, 1, 4096, 70_001] {
        let body = vec![b'a'; len];
        let id = p
            .app
            .ingest
            .upload(&format!("size-{len}.pdf"), body.as_slice())
            .await
            .unwrap();
        let detail = p.app.retrieve.get_by_id(id).await.unwrap();
        assert_eq!(detail.pdf.file_size, len as i64);
        if len == 0 {
            assert!(detail.sentences.is_empty());
        }
    }
}

#[tokio::test]
async fn delete_leaves_nothing_behind() {
    let p = pipeline();
    let id = p
        .app
        .ingest
        .upload("gone.pdf", &b"Unique marker sentence."[..])
        .await
        .unwrap();
    let keep = p
        .app
        .ingest
        .upload("kept.pdf", &b"Another marker."[..])
        .await
        .unwrap();

    p.app.ingest.delete(id).await.unwrap();

    assert!(matches!(
        p.app.retrieve.get_by_id(id).await,
        Err(PipelineError::NotFound { .. })
    ));
    let hits = p.app.retrieve.search("marker").await.unwrap();
    assert!(hits.sentences.iter().all(|h| h.pdf_id != id));
    assert_eq!(hits.occurrences, 1);
    assert_eq!(hits.sentences[0].pdf_id, keep);
    assert!(p.blobs.object("pdfs", "gone.pdf").is_none());
    assert!(p.app.reconcile().await.unwrap().is_clean());
}

#[tokio::test]
async fn search_matches_case_insensitive_substrings() {
    let p = pipeline();
    p.app
        .ingest
        .upload("a.pdf", &b"Rust is fast. Go is simple. TRUSTED builds."[..])
        .await
        .unwrap();

    let res = p.app.retrieve.search("rust").await.unwrap();
    let texts: Vec<&str> = res.sentences.iter().map(|h| h.sentence.as_str()).collect();
    assert_eq!(texts, vec!["Rust is fast", " TRUSTED builds"]);
    assert_eq!(res.occurrences, res.sentences.len());

    assert!(matches!(
        p.app.retrieve.search("").await,
        Err(PipelineError::InvalidArgument(_))
    ));
    assert_eq!(p.app.retrieve.search("python").await.unwrap().occurrences, 0);
}

#[tokio::test]
async fn ensure_bucket_twice_is_fine() {
    let blobs = MemoryBlobStore::new();
    blobs.ensure_bucket("pdfs", "us-east-1").await.unwrap();
    blobs.ensure_bucket("pdfs", "us-east-1").await.unwrap();
    assert!(blobs.bucket_exists("pdfs").await.unwrap());
}

#[tokio::test]
async fn page_beyond_count_is_not_found() {
    let p = pipeline();
    let id = p
        .app
        .ingest
        .upload("two.pdf", &b"One.\x0cTwo."[..])
        .await
        .unwrap();

    let jpeg = p.app.retrieve.page_image(id, "2").await.unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let err = p.app.retrieve.page_image(id, "3").await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}

#[tokio::test]
async fn same_name_upload_overwrites_blob_but_keeps_old_row() {
    let p = pipeline();
    let first = p
        .app
        .ingest
        .upload("dup.pdf", &b"First version."[..])
        .await
        .unwrap();
    let second = p
        .app
        .ingest
        .upload("dup.pdf", &b"Second version.\x0cExtra page."[..])
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(p.app.retrieve.list().await.unwrap().len(), 2);
    assert_eq!(
        p.blobs.object("pdfs", "dup.pdf").unwrap(),
        b"Second version.\x0cExtra page.".to_vec()
    );
    // The old row still has its own sentences while its blob is gone.
    assert_eq!(
        p.app.retrieve.get_by_id(first).await.unwrap().sentences,
        vec!["First version", ""]
    );
    // Both rows resolve to the new blob, which has two pages.
    assert!(p.app.retrieve.page_image(first, "2").await.is_ok());
}

#[tokio::test]
async fn real_pdf_text_is_searchable() {
    let p = pipeline_with(Arc::new(PdfTextExtractor));
    let pdf = pdf_with_pages(&["Hello world. Second page.", "Final."]);
    let id = p.app.ingest.upload("real.pdf", pdf.as_slice()).await.unwrap();

    let detail = p.app.retrieve.get_by_id(id).await.unwrap();
    assert_eq!(detail.pdf.file_size, pdf.len() as i64);
    assert!(detail.sentences.iter().any(|s| s.contains("Hello world")));

    let res = p.app.retrieve.search("second PAGE").await.unwrap();
    assert_eq!(res.occurrences, 1);
    assert_eq!(res.sentences[0].pdf_id, id);
}

#[tokio::test]
async fn malformed_pdf_keeps_row_without_sentences() {
    let p = pipeline_with(Arc::new(PdfTextExtractor));
    let err = p
        .app
        .ingest
        .upload("broken.pdf", &b"%PDF-1.4 this is not a real document"[..])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ExtractionFailed { .. }));

    let docs = p.app.retrieve.list().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert!(p.app.retrieve.get_by_id(docs[0].id).await.unwrap().sentences.is_empty());
}
