//! Retrieval service: the read paths.
//!
//! Listing, lookup, and search are metadata-only, so an orphan blob is never
//! visible through them. Page images re-download the blob into a scoped
//! artifact and re-render on every call; nothing is cached.

use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::ScopedArtifact;
use crate::blob::{BlobError, BlobStore};
use crate::error::{PipelineError, Result};
use crate::models::{Document, DocumentDetail, SearchResponse};
use crate::render::{encode_jpeg, PageRasterizer, RenderError};
use crate::store::MetadataStore;

pub struct RetrievalService {
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn MetadataStore>,
    rasterizer: Arc<dyn PageRasterizer>,
    bucket: String,
    temp_dir: Option<PathBuf>,
    jpeg_quality: u8,
}

impl RetrievalService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn MetadataStore>,
        rasterizer: Arc<dyn PageRasterizer>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            blobs,
            store,
            rasterizer,
            bucket: bucket.into(),
            temp_dir: None,
            jpeg_quality: 85,
        }
    }

    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Every document, in insertion order.
    pub async fn list(&self) -> Result<Vec<Document>> {
        self.store
            .list_documents()
            .await
            .map_err(PipelineError::MetadataReadFailed)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<DocumentDetail> {
        let pdf = self.document(id).await?;
        let sentences = self
            .store
            .sentences_for(id)
            .await
            .map_err(PipelineError::MetadataReadFailed)?;
        Ok(DocumentDetail { pdf, sentences })
    }

    /// Sentence rows containing `keyword`, ignoring case.
    pub async fn search(&self, keyword: &str) -> Result<SearchResponse> {
        if keyword.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "keyword is required".to_string(),
            ));
        }
        let sentences = self
            .store
            .search_sentences(keyword)
            .await
            .map_err(PipelineError::MetadataReadFailed)?;
        tracing::debug!(keyword, hits = sentences.len(), "search");
        Ok(SearchResponse {
            keyword: keyword.to_string(),
            occurrences: sentences.len(),
            sentences,
        })
    }

    /// JPEG of the 1-based `page` of document `id`. `page` is taken as the
    /// caller supplied it and must parse as a positive integer.
    pub async fn page_image(&self, id: i64, page: &str) -> Result<Vec<u8>> {
        let page = parse_page(page)?;
        let doc = self.document(id).await?;

        let artifact = ScopedArtifact::create(self.temp_dir.as_deref())?;
        self.blobs
            .get(&self.bucket, &doc.file_name, artifact.path())
            .await
            .map_err(|source| match source {
                BlobError::NoSuchKey(_) => PipelineError::not_found("blob", &doc.file_name),
                source => PipelineError::StorageReadFailed {
                    key: doc.file_name.clone(),
                    source,
                },
            })?;
        let bytes = artifact.read().await?;
        drop(artifact);

        let rasterizer = Arc::clone(&self.rasterizer);
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || -> std::result::Result<_, RenderError> {
            let image = rasterizer.render_page(&bytes, page)?;
            encode_jpeg(&image, quality)
        })
        .await
        .map_err(|e| PipelineError::RenderFailed(RenderError::Panicked(e.to_string())))?
        .map_err(|e| {
            if e.is_missing_page() {
                PipelineError::not_found("page", format!("{}/{}", id, page))
            } else {
                tracing::warn!(id, page, error = %e, "page render failed");
                PipelineError::RenderFailed(e)
            }
        })?;

        tracing::debug!(id, page, bytes = jpeg.len(), "page rendered");
        Ok(jpeg)
    }

    async fn document(&self, id: i64) -> Result<Document> {
        self.store
            .get_document(id)
            .await
            .map_err(PipelineError::MetadataReadFailed)?
            .ok_or_else(|| PipelineError::not_found("document", id))
    }
}

fn parse_page(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(PipelineError::InvalidArgument(
            "page numbers start at 1".to_string(),
        )),
        Ok(page) => Ok(page),
        Err(_) => Err(PipelineError::InvalidArgument(format!(
            "invalid page number '{}'",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::models::NewDocument;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Treats the blob as a page count and paints a small bitmap.
    #[derive(Default)]
    struct CountingRasterizer {
        calls: AtomicUsize,
    }

    impl PageRasterizer for CountingRasterizer {
        fn render_page(&self, bytes: &[u8], page: usize) -> std::result::Result<RgbImage, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let count = bytes.len();
            if page > count {
                return Err(RenderError::PageOutOfRange { page, count });
            }
            if bytes[page - 1] == b'!' {
                return Err(RenderError::Render {
                    page,
                    message: "broken content stream".into(),
                });
            }
            Ok(RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255])))
        }
    }

    struct Fixture {
        blobs: Arc<MemoryBlobStore>,
        store: Arc<InMemoryStore>,
        rasterizer: Arc<CountingRasterizer>,
        service: RetrievalService,
        tmp: TempDir,
    }

    impl Fixture {
        fn leftover_artifacts(&self) -> usize {
            std::fs::read_dir(self.tmp.path()).unwrap().count()
        }
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(MemoryBlobStore::with_bucket("pdfs"));
        let store = Arc::new(InMemoryStore::new());
        let rasterizer = Arc::new(CountingRasterizer::default());
        let tmp = TempDir::new().unwrap();
        let service =
            RetrievalService::new(blobs.clone(), store.clone(), rasterizer.clone(), "pdfs")
                .with_temp_dir(Some(tmp.path().to_path_buf()));
        Fixture {
            blobs,
            store,
            rasterizer,
            service,
            tmp,
        }
    }

    async fn seed(f: &Fixture, name: &str, pages: &[u8], sentences: &[&str]) -> i64 {
        f.blobs.insert_object("pdfs", name, pages.to_vec());
        let id = f
            .store
            .insert_document(&NewDocument {
                file_name: name.to_string(),
                upload_time: Utc::now(),
                file_size: pages.len() as i64,
            })
            .await
            .unwrap();
        let sentences: Vec<String> = sentences.iter().map(|s| s.to_string()).collect();
        f.store.insert_sentences(id, &sentences).await.unwrap();
        id
    }

    #[tokio::test]
    async fn get_by_id_returns_row_and_ordered_sentences() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b"..", &["Hello world", " Second page", ""]).await;
        let detail = f.service.get_by_id(id).await.unwrap();
        assert_eq!(detail.pdf.file_name, "a.pdf");
        assert_eq!(detail.sentences, vec!["Hello world", " Second page", ""]);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.service.get_by_id(5).await,
            Err(PipelineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_hides_orphan_blobs() {
        let f = fixture();
        seed(&f, "a.pdf", b".", &[]).await;
        f.blobs.insert_object("pdfs", "orphan.pdf", b"x".to_vec());
        let docs = f.service.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "a.pdf");
    }

    #[tokio::test]
    async fn search_counts_matching_rows() {
        let f = fixture();
        let a = seed(&f, "a.pdf", b".", &["The Rust book", "nothing"]).await;
        let b = seed(&f, "b.pdf", b".", &["rusty nails", "RUST"]).await;
        let res = f.service.search("rust").await.unwrap();
        assert_eq!(res.keyword, "rust");
        assert_eq!(res.occurrences, 3);
        assert_eq!(res.occurrences, res.sentences.len());
        let ids: Vec<i64> = res.sentences.iter().map(|h| h.pdf_id).collect();
        assert_eq!(ids, vec![a, b, b]);
    }

    #[tokio::test]
    async fn empty_keyword_is_invalid() {
        let f = fixture();
        assert!(matches!(
            f.service.search("").await,
            Err(PipelineError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn page_image_is_jpeg() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b"..", &[]).await;
        let jpeg = f.service.page_image(id, "2").await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(f.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn bad_page_numbers_never_reach_storage() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b"..", &[]).await;
        f.blobs.fail_gets(true);
        for page in ["abc", "0", "-1", ""] {
            let err = f.service.page_image(id, page).await.unwrap_err();
            assert!(matches!(err, PipelineError::InvalidArgument(_)), "{page}");
        }
        assert_eq!(f.rasterizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn page_past_the_end_is_not_found() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b"..", &[]).await;
        let err = f.service.page_image(id, "3").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { resource: "page", .. }));
        assert_eq!(f.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn broken_page_is_render_failure() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b".!", &[]).await;
        let err = f.service.page_image(id, "2").await.unwrap_err();
        assert!(matches!(err, PipelineError::RenderFailed(_)));
        assert!(!err.is_retryable());
        assert_eq!(f.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn blob_outage_is_retryable_read_failure() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b".", &[]).await;
        f.blobs.fail_gets(true);
        let err = f.service.page_image(id, "1").await.unwrap_err();
        assert!(matches!(err, PipelineError::StorageReadFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(f.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn missing_blob_is_not_found_and_leaves_no_artifact() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b".", &[]).await;
        f.blobs.delete("pdfs", "a.pdf").await.unwrap();
        let err = f.service.page_image(id, "1").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { resource: "blob", .. }));
        assert_eq!(f.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn every_call_re_renders() {
        let f = fixture();
        let id = seed(&f, "a.pdf", b".", &[]).await;
        f.service.page_image(id, "1").await.unwrap();
        f.service.page_image(id, "1").await.unwrap();
        assert_eq!(f.rasterizer.calls.load(Ordering::SeqCst), 2);
    }
}
