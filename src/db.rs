//! Postgres connection management.
//!
//! One pool is created at process start and handed to every component that
//! needs it; nothing reaches the database through global state.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;

/// Create a connection pool to the configured database.
///
/// # Errors
///
/// Returns an error if the URL is malformed or the server is unreachable.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.db.url)
        .await
        .with_context(|| "Failed to connect to Postgres (check db.url / DATABASE_URL)")?;

    Ok(pool)
}
