//! Core data models.
//!
//! These are the records that flow between the metadata store, the
//! coordinator, and the HTTP surface. Field names serialize the way the
//! JSON API exposes them.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metadata row for an ingested document. `file_name` doubles as the blob key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: i64,
    pub file_name: String,
    pub upload_time: DateTime<Utc>,
    pub file_size: i64,
}

/// A document row before the store has assigned its id.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub upload_time: DateTime<Utc>,
    pub file_size: i64,
}

/// Response shape for `GET /pdfs/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    pub pdf: Document,
    pub sentences: Vec<String>,
}

/// One sentence row matched by a keyword search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentenceHit {
    pub pdf_id: i64,
    pub sentence: String,
}

/// Response shape for `GET /search`. `occurrences` counts matching rows.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub keyword: String,
    pub occurrences: usize,
    pub sentences: Vec<SentenceHit>,
}

/// Stored credential record. `password_hash` is an argon2 PHC string.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
}

impl From<&UserRecord> for Principal {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}
