//! Cross-store consistency sweep.
//!
//! Compares the blob keys in the bucket with the file names of document
//! rows. A key with no row is an orphan blob (upload failed after the blob
//! write); a row whose key is missing is dangling metadata (delete failed
//! after the blob was removed). The sweep only reports; it never deletes.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::blob::BlobStore;
use crate::error::{PipelineError, Result};
use crate::models::Document;
use crate::store::MetadataStore;

#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub orphan_blobs: Vec<String>,
    pub dangling_documents: Vec<Document>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty() && self.dangling_documents.is_empty()
    }
}

pub async fn reconcile(
    blobs: &dyn BlobStore,
    store: &dyn MetadataStore,
    bucket: &str,
) -> Result<ReconcileReport> {
    let keys: BTreeSet<String> = blobs
        .list_keys(bucket)
        .await
        .map_err(|source| PipelineError::StorageReadFailed {
            key: format!("{}/*", bucket),
            source,
        })?
        .into_iter()
        .collect();
    let documents = store
        .list_documents()
        .await
        .map_err(PipelineError::MetadataReadFailed)?;

    let referenced: BTreeSet<&str> = documents.iter().map(|d| d.file_name.as_str()).collect();
    let orphan_blobs = keys
        .iter()
        .filter(|k| !referenced.contains(k.as_str()))
        .cloned()
        .collect();
    let dangling_documents = documents
        .iter()
        .filter(|d| !keys.contains(&d.file_name))
        .cloned()
        .collect();

    let report = ReconcileReport {
        orphan_blobs,
        dangling_documents,
    };
    if report.is_clean() {
        tracing::info!(bucket, blobs = keys.len(), documents = documents.len(), "stores consistent");
    } else {
        tracing::warn!(
            bucket,
            orphan_blobs = report.orphan_blobs.len(),
            dangling_documents = report.dangling_documents.len(),
            "stores disagree"
        );
    }
    Ok(report)
}
