//! Blob store capability.
//!
//! The coordinator owns the key space: keys are document file names, values
//! are the raw uploaded bytes. Transfers go through files on disk: the HTTP
//! upload path spools the request body into a file chunk by chunk, and the
//! store reads from or writes to that file. [`S3BlobStore`](crate::s3::S3BlobStore)
//! loads one object into memory per request because the SigV4 signature
//! covers the payload hash.
//!
//! [`S3BlobStore`](crate::s3::S3BlobStore) is the production backend;
//! [`MemoryBlobStore`] backs tests and can be told to fail on demand.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("blob store rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = std::result::Result<T, BlobError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `source` under `key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, source: &Path, content_type: &str)
        -> BlobResult<()>;

    /// Download `key` into the file at `dest` (created or truncated).
    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> BlobResult<()>;

    async fn delete(&self, bucket: &str, key: &str) -> BlobResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> BlobResult<bool>;

    /// Create a bucket. A bucket that already exists is not an error.
    async fn make_bucket(&self, bucket: &str, region: &str) -> BlobResult<()>;

    /// All keys in `bucket`, sorted.
    async fn list_keys(&self, bucket: &str) -> BlobResult<Vec<String>>;

    /// Make sure `bucket` exists; safe to call any number of times.
    async fn ensure_bucket(&self, bucket: &str, region: &str) -> BlobResult<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        self.make_bucket(bucket, region).await
    }
}

/// In-memory [`BlobStore`] for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        store
            .buckets
            .write()
            .unwrap()
            .insert(bucket.to_string(), BTreeMap::new());
        store
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Direct read for assertions.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .read()
            .unwrap()
            .get(bucket)
            .and_then(|b| b.get(key).cloned())
    }

    /// Direct write, bypassing the failure switches.
    pub fn insert_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.buckets
            .write()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        _content_type: &str,
    ) -> BlobResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected put failure".to_string()));
        }
        let bytes = tokio::fs::read(source).await?;
        let mut buckets = self.buckets.write().unwrap();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| BlobError::NoSuchBucket(bucket.to_string()))?;
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> BlobResult<()> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected get failure".to_string()));
        }
        let bytes = {
            let buckets = self.buckets.read().unwrap();
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| BlobError::NoSuchBucket(bucket.to_string()))?;
            objects
                .get(key)
                .cloned()
                .ok_or_else(|| BlobError::NoSuchKey(key.to_string()))?
        };
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> BlobResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected delete failure".to_string()));
        }
        let mut buckets = self.buckets.write().unwrap();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| BlobError::NoSuchBucket(bucket.to_string()))?;
        // S3 semantics: deleting a missing key succeeds.
        objects.remove(key);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> BlobResult<bool> {
        Ok(self.buckets.read().unwrap().contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, _region: &str) -> BlobResult<()> {
        self.buckets
            .write()
            .unwrap()
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn list_keys(&self, bucket: &str) -> BlobResult<Vec<String>> {
        let buckets = self.buckets.read().unwrap();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| BlobError::NoSuchBucket(bucket.to_string()))?;
        Ok(objects.keys().cloned().collect())
    }
}
