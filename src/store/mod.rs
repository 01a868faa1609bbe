//! Metadata store abstraction.
//!
//! The [`MetadataStore`] trait covers every relational operation the
//! pipeline needs: document rows, their sentences, and user credentials.
//! Implementations must be `Send + Sync`; one handle is shared by all
//! in-flight requests.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_document`](MetadataStore::insert_document) | Insert a row, return the generated id |
//! | [`get_document`](MetadataStore::get_document) | Row by id |
//! | [`list_documents`](MetadataStore::list_documents) | All rows, insertion order |
//! | [`insert_sentences`](MetadataStore::insert_sentences) | Bulk insert, all-or-nothing |
//! | [`sentences_for`](MetadataStore::sentences_for) | Sentences of one document, in order |
//! | [`search_sentences`](MetadataStore::search_sentences) | Case-insensitive substring match |
//! | [`delete_sentences`](MetadataStore::delete_sentences) | Remove a document's sentences |
//! | [`delete_document`](MetadataStore::delete_document) | Remove the row |
//! | [`find_user`](MetadataStore::find_user) / [`insert_user`](MetadataStore::insert_user) | Credentials |

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Document, NewDocument, SentenceHit, UserRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("metadata backend error: {0}")]
    Backend(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<i64>;

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>>;

    async fn list_documents(&self) -> StoreResult<Vec<Document>>;

    /// Insert one row per sentence, keeping slice order as position order.
    /// Either every row is stored or none is.
    async fn insert_sentences(&self, pdf_id: i64, sentences: &[String]) -> StoreResult<()>;

    async fn sentences_for(&self, pdf_id: i64) -> StoreResult<Vec<String>>;

    /// Rows whose text contains `keyword`, ignoring case. `%` and `_` in
    /// the keyword match literally.
    async fn search_sentences(&self, keyword: &str) -> StoreResult<Vec<SentenceHit>>;

    /// Returns the number of rows removed.
    async fn delete_sentences(&self, pdf_id: i64) -> StoreResult<u64>;

    /// Returns `false` when no row had that id.
    async fn delete_document(&self, id: i64) -> StoreResult<bool>;

    async fn find_user(&self, username: &str) -> StoreResult<Option<UserRecord>>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn insert_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord>;
}
