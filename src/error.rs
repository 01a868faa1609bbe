//! Pipeline error taxonomy.
//!
//! Every failure the coordinator or retrieval service can report is a
//! [`PipelineError`]. Each variant says whether a caller may retry it and
//! which cross-store state it leaves behind ([`Consistency`]), because the
//! blob store and the metadata store share no transaction.

use thiserror::Error;

use crate::blob::BlobError;
use crate::extract::ExtractError;
use crate::render::RenderError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// State of the blob/metadata pair after an operation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Both stores agree (nothing written, or everything written).
    Clean,
    /// A blob was written but no document row points at it.
    OrphanBlob,
    /// The document row exists but its sentences were not stored.
    MissingSentences,
    /// The blob is gone but part of the metadata remains.
    DanglingMetadata,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed to write blob '{key}': {source}")]
    StorageWriteFailed {
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("failed to read blob '{key}': {source}")]
    StorageReadFailed {
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("failed to delete blob '{key}': {source}")]
    StorageDeleteFailed {
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("failed to write metadata: {source}")]
    MetadataWriteFailed {
        consistency: Consistency,
        #[source]
        source: StoreError,
    },

    #[error("failed to read metadata: {0}")]
    MetadataReadFailed(#[source] StoreError),

    #[error("failed to delete metadata for document {id}: {source}")]
    MetadataDeleteFailed {
        id: i64,
        #[source]
        source: StoreError,
    },

    #[error("text extraction failed for document {id}: {source}")]
    ExtractionFailed {
        id: i64,
        #[source]
        source: ExtractError,
    },

    #[error("render failed: {0}")]
    RenderFailed(#[source] RenderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        PipelineError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Storage-layer failures may succeed on a later attempt; nothing is
    /// retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::StorageWriteFailed { .. }
                | PipelineError::StorageReadFailed { .. }
                | PipelineError::StorageDeleteFailed { .. }
                | PipelineError::MetadataWriteFailed { .. }
                | PipelineError::MetadataReadFailed(_)
                | PipelineError::MetadataDeleteFailed { .. }
                | PipelineError::Io(_)
        )
    }

    pub fn consistency(&self) -> Consistency {
        match self {
            PipelineError::MetadataWriteFailed { consistency, .. } => *consistency,
            PipelineError::ExtractionFailed { .. } => Consistency::MissingSentences,
            PipelineError::MetadataDeleteFailed { .. } => Consistency::DanglingMetadata,
            _ => Consistency::Clean,
        }
    }
}
