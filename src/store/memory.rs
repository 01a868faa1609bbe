//! In-memory [`MetadataStore`] for tests.
//!
//! Rows live in `Vec`s behind `std::sync::RwLock`, so insertion order is
//! list order. Individual write paths can be switched to fail so partial
//! failure states are reproducible.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::{Document, NewDocument, SentenceHit, UserRecord};

use super::{MetadataStore, StoreError, StoreResult};

struct StoredSentence {
    pdf_id: i64,
    text: String,
}

/// Which write path should fail next.
#[derive(Debug, Clone, Copy)]
pub enum FailPoint {
    InsertDocument,
    InsertSentences,
    DeleteSentences,
    DeleteDocument,
}

#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<Vec<Document>>,
    sentences: RwLock<Vec<StoredSentence>>,
    users: RwLock<Vec<UserRecord>>,
    next_doc_id: AtomicI64,
    next_user_id: AtomicI64,
    fail_insert_document: AtomicBool,
    fail_insert_sentences: AtomicBool,
    fail_delete_sentences: AtomicBool,
    fail_delete_document: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, point: FailPoint, fail: bool) {
        let flag = match point {
            FailPoint::InsertDocument => &self.fail_insert_document,
            FailPoint::InsertSentences => &self.fail_insert_sentences,
            FailPoint::DeleteSentences => &self.fail_delete_sentences,
            FailPoint::DeleteDocument => &self.fail_delete_document,
        };
        flag.store(fail, Ordering::SeqCst);
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.read().unwrap().len()
    }

    fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend(format!("injected {} failure", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<i64> {
        Self::check(&self.fail_insert_document, "document insert")?;
        let id = self.next_doc_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.documents.write().unwrap().push(Document {
            id,
            file_name: doc.file_name.clone(),
            upload_time: doc.upload_time,
            file_size: doc.file_size,
        });
        Ok(id)
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        Ok(self.documents.read().unwrap().clone())
    }

    async fn insert_sentences(&self, pdf_id: i64, sentences: &[String]) -> StoreResult<()> {
        Self::check(&self.fail_insert_sentences, "sentence insert")?;
        let mut stored = self.sentences.write().unwrap();
        stored.extend(sentences.iter().map(|s| StoredSentence {
            pdf_id,
            text: s.clone(),
        }));
        Ok(())
    }

    async fn sentences_for(&self, pdf_id: i64) -> StoreResult<Vec<String>> {
        Ok(self
            .sentences
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.pdf_id == pdf_id)
            .map(|s| s.text.clone())
            .collect())
    }

    async fn search_sentences(&self, keyword: &str) -> StoreResult<Vec<SentenceHit>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .sentences
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.text.to_lowercase().contains(&needle))
            .map(|s| SentenceHit {
                pdf_id: s.pdf_id,
                sentence: s.text.clone(),
            })
            .collect())
    }

    async fn delete_sentences(&self, pdf_id: i64) -> StoreResult<u64> {
        Self::check(&self.fail_delete_sentences, "sentence delete")?;
        let mut stored = self.sentences.write().unwrap();
        let before = stored.len();
        stored.retain(|s| s.pdf_id != pdf_id);
        Ok((before - stored.len()) as u64)
    }

    async fn delete_document(&self, id: i64) -> StoreResult<bool> {
        Self::check(&self.fail_delete_document, "document delete")?;
        let mut docs = self.documents.write().unwrap();
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() < before)
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        let mut users = self.users.write().unwrap();
        if users.iter().any(|u| u.username == username) {
            return Err(StoreError::Conflict(format!("username '{}'", username)));
        }
        let user = UserRecord {
            id: self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        users.push(user.clone());
        Ok(user)
    }
}
