//! # Folio
//!
//! PDF ingestion and retrieval. Documents are stored as blobs in an
//! S3-compatible bucket, their text is split into sentences and indexed in
//! Postgres, and individual pages are rendered to JPEG on demand.
//!
//! ## Architecture
//!
//! ```text
//!             ┌──────────────────────┐
//!  upload ───▶│ IngestionCoordinator │──▶ BlobStore (S3 / MinIO)
//!  delete     │  extract → segment   │──▶ MetadataStore (Postgres)
//!             └──────────────────────┘
//!             ┌──────────────────────┐
//!  list/get ─▶│   RetrievalService   │──▶ MetadataStore
//!  search     │                      │──▶ BlobStore ──▶ PageRasterizer
//!  page       └──────────────────────┘
//! ```
//!
//! The two stores share no transaction. Writes go blob first, deletes go
//! blob first too; a failure in between is reported with a
//! [`Consistency`](error::Consistency) tag and can be found later with
//! [`reconcile`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Postgres connection pool |
//! | [`migrate`] | Schema creation |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`artifact`] | Scoped temporary files |
//! | [`blob`] | Blob store capability and in-memory store |
//! | [`s3`] | SigV4 S3 blob store |
//! | [`store`] | Metadata store capability, Postgres and in-memory |
//! | [`extract`] | Per-page text extraction |
//! | [`segment`] | Sentence segmentation |
//! | [`render`] | Page rasterization and JPEG encoding |
//! | [`ingest`] | Upload and delete orchestration |
//! | [`retrieve`] | List, get, search, page image |
//! | [`auth`] | Basic credentials, argon2 verification, registration |
//! | [`reconcile`] | Orphan blob / dangling row sweep |
//! | [`app`] | Component wiring |
//! | [`server`] | axum HTTP surface |
//! | [`commands`] | CLI command implementations |

pub mod app;
pub mod artifact;
pub mod auth;
pub mod blob;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod render;
pub mod retrieve;
pub mod s3;
pub mod segment;
pub mod server;
pub mod store;
