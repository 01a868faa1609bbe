//! Ingestion coordinator.
//!
//! Drives a document through the write path:
//!
//! ```text
//! stream → temp artifact → blob put → document row → extract → segment → sentence rows
//! ```
//!
//! and the delete path in the opposite direction (blob first, then
//! sentences, then the row). The two stores share no transaction, so each
//! step runs at most once and a failure part-way through is reported with
//! the [`Consistency`] state it leaves behind rather than compensated.
//!
//! Writes for the same file name are serialized by an in-process lock held
//! around the blob write and the document insert.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::artifact::ScopedArtifact;
use crate::blob::BlobStore;
use crate::error::{Consistency, PipelineError, Result};
use crate::extract::{extract_pages, ExtractError, TextExtractor, MIME_PDF};
use crate::models::NewDocument;
use crate::segment::{segment_pages, SentenceSegmenter};
use crate::store::{MetadataStore, StoreError};

/// One async mutex per blob key. Entries nobody holds are pruned on the
/// next acquisition.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let handle = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        handle.lock_owned().await
    }
}

pub struct IngestionCoordinator {
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn MetadataStore>,
    extractor: Arc<dyn TextExtractor>,
    segmenter: Arc<dyn SentenceSegmenter>,
    bucket: String,
    content_type: String,
    temp_dir: Option<PathBuf>,
    locks: KeyLocks,
}

impl IngestionCoordinator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn MetadataStore>,
        extractor: Arc<dyn TextExtractor>,
        segmenter: Arc<dyn SentenceSegmenter>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            blobs,
            store,
            extractor,
            segmenter,
            bucket: bucket.into(),
            content_type: MIME_PDF.to_string(),
            temp_dir: None,
            locks: KeyLocks::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Directory for temporary artifacts; the OS temp dir when unset.
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// An empty artifact in this coordinator's temp dir. Callers that
    /// receive the body in chunks write into it and hand it to
    /// [`upload_artifact`](Self::upload_artifact).
    pub fn stage(&self) -> Result<ScopedArtifact> {
        Ok(ScopedArtifact::create(self.temp_dir.as_deref())?)
    }

    /// Ingest `reader` under `file_name` and return the new document id.
    ///
    /// A same-named blob is overwritten and a second row is created for it.
    pub async fn upload<R>(&self, file_name: &str, reader: R) -> Result<i64>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_file_name(file_name)?;
        let upload_time = Utc::now();
        let artifact = ScopedArtifact::materialize(self.temp_dir.as_deref(), reader).await?;
        self.ingest(file_name, upload_time, artifact).await
    }

    /// Ingest an already materialized artifact. The artifact is consumed
    /// and removed whatever the outcome.
    pub async fn upload_artifact(&self, file_name: &str, artifact: ScopedArtifact) -> Result<i64> {
        validate_file_name(file_name)?;
        self.ingest(file_name, Utc::now(), artifact).await
    }

    async fn ingest(
        &self,
        file_name: &str,
        upload_time: DateTime<Utc>,
        artifact: ScopedArtifact,
    ) -> Result<i64> {
        let file_size = artifact.len().await?;
        let file_size = i64::try_from(file_size).map_err(|_| {
            PipelineError::InvalidArgument(format!("file too large: {} bytes", file_size))
        })?;

        let id = {
            let _guard = self.locks.acquire(file_name).await;

            self.blobs
                .put(&self.bucket, file_name, artifact.path(), &self.content_type)
                .await
                .map_err(|source| {
                    tracing::error!(file_name, error = %source, "blob write failed");
                    PipelineError::StorageWriteFailed {
                        key: file_name.to_string(),
                        source,
                    }
                })?;

            let doc = NewDocument {
                file_name: file_name.to_string(),
                upload_time,
                file_size,
            };
            self.store.insert_document(&doc).await.map_err(|source| {
                tracing::warn!(file_name, error = %source, "blob stored without a document row");
                PipelineError::MetadataWriteFailed {
                    consistency: Consistency::OrphanBlob,
                    source,
                }
            })?
        };

        // Empty input has no pages; skip the parser rather than fail on it.
        let sentences = if file_size == 0 {
            Vec::new()
        } else {
            let bytes = artifact.read().await?;
            let pages = self.extract(bytes).await.map_err(|source| {
                tracing::warn!(id, file_name, error = %source, "extraction failed; row has no sentences");
                PipelineError::ExtractionFailed { id, source }
            })?;
            segment_pages(self.segmenter.as_ref(), &pages)
        };

        self.store
            .insert_sentences(id, &sentences)
            .await
            .map_err(|source| {
                tracing::warn!(id, file_name, error = %source, "sentence insert failed");
                PipelineError::MetadataWriteFailed {
                    consistency: Consistency::MissingSentences,
                    source,
                }
            })?;

        tracing::info!(
            id,
            file_name,
            file_size,
            sentences = sentences.len(),
            "document ingested"
        );
        Ok(id)
    }

    /// Remove the blob, the sentences, and the row of document `id`.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let doc = self
            .store
            .get_document(id)
            .await
            .map_err(PipelineError::MetadataReadFailed)?
            .ok_or_else(|| PipelineError::not_found("document", id))?;

        let _guard = self.locks.acquire(&doc.file_name).await;

        self.blobs
            .delete(&self.bucket, &doc.file_name)
            .await
            .map_err(|source| {
                tracing::error!(id, file_name = %doc.file_name, error = %source, "blob delete failed");
                PipelineError::StorageDeleteFailed {
                    key: doc.file_name.clone(),
                    source,
                }
            })?;

        let dangling = |source: StoreError| {
            tracing::warn!(id, error = %source, "blob removed but metadata remains");
            PipelineError::MetadataDeleteFailed { id, source }
        };
        let removed = self.store.delete_sentences(id).await.map_err(dangling)?;
        self.store.delete_document(id).await.map_err(dangling)?;

        tracing::info!(id, file_name = %doc.file_name, sentences = removed, "document deleted");
        Ok(())
    }

    async fn extract(&self, bytes: Vec<u8>) -> std::result::Result<Vec<String>, ExtractError> {
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || extract_pages(extractor.as_ref(), &bytes))
            .await
            .map_err(|e| ExtractError::Panicked(e.to_string()))?
    }
}

/// Longest name the `pdfs.file_name` column accepts.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// File names are blob keys: non-empty, no path separators, not `.` or `..`.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PipelineError::InvalidArgument(
            "file name is required".to_string(),
        ));
    }
    if name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(PipelineError::InvalidArgument(format!(
            "file name longer than {} characters",
            MAX_FILE_NAME_LEN
        )));
    }
    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(PipelineError::InvalidArgument(format!(
            "invalid file name '{}'",
            name
        )));
    }
    Ok(())
}
