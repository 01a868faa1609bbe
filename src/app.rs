//! Component wiring.
//!
//! [`App`] owns one handle to each store and the services built on them.
//! `serve` and every CLI command construct it once from [`Config`] and
//! pass it down; nothing is reached through globals.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::AccessGate;
use crate::blob::BlobStore;
use crate::config::Config;
use crate::db;
use crate::extract::{PdfTextExtractor, TextExtractor};
use crate::ingest::IngestionCoordinator;
use crate::migrate;
use crate::reconcile::{self, ReconcileReport};
use crate::render::{PageRasterizer, PdfiumRasterizer};
use crate::retrieve::RetrievalService;
use crate::s3::S3BlobStore;
use crate::segment::DelimiterSegmenter;
use crate::store::postgres::PgStore;
use crate::store::MetadataStore;

pub struct App {
    pub config: Config,
    pub blobs: Arc<dyn BlobStore>,
    pub store: Arc<dyn MetadataStore>,
    pub ingest: IngestionCoordinator,
    pub retrieve: RetrievalService,
    pub gate: AccessGate,
}

impl App {
    /// Connect to Postgres and the blob store, create the schema if needed,
    /// and make sure the bucket exists.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let blobs = S3BlobStore::new(&config.blob)?;
        blobs
            .ensure_bucket(&config.blob.bucket, &config.blob.region)
            .await
            .with_context(|| format!("Failed to ensure bucket '{}'", config.blob.bucket))?;
        tracing::info!(bucket = %config.blob.bucket, "bucket ready");

        let rasterizer = PdfiumRasterizer::new(
            config.render.pdfium_library_path.clone(),
            config.render.target_width,
        );

        Ok(Self::from_parts(
            config,
            Arc::new(blobs),
            Arc::new(PgStore::new(pool)),
            Arc::new(PdfTextExtractor),
            Arc::new(rasterizer),
        ))
    }

    /// Assemble the services over caller-supplied capabilities.
    pub fn from_parts(
        config: &Config,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn MetadataStore>,
        extractor: Arc<dyn TextExtractor>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        let bucket = config.blob.bucket.clone();
        let temp_dir = config.ingest.temp_dir.clone();

        let ingest = IngestionCoordinator::new(
            blobs.clone(),
            store.clone(),
            extractor,
            Arc::new(DelimiterSegmenter::default()),
            bucket.clone(),
        )
        .with_content_type(config.blob.content_type.clone())
        .with_temp_dir(temp_dir.clone());

        let retrieve = RetrievalService::new(blobs.clone(), store.clone(), rasterizer, bucket)
            .with_temp_dir(temp_dir)
            .with_jpeg_quality(config.render.jpeg_quality);

        let gate = AccessGate::new(store.clone());

        Self {
            config: config.clone(),
            blobs,
            store,
            ingest,
            retrieve,
            gate,
        }
    }

    pub fn with_gate(mut self, gate: AccessGate) -> Self {
        self.gate = gate;
        self
    }

    pub async fn reconcile(&self) -> crate::error::Result<ReconcileReport> {
        reconcile::reconcile(
            self.blobs.as_ref(),
            self.store.as_ref(),
            &self.config.blob.bucket,
        )
        .await
    }
}
