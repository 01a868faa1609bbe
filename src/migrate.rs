use anyhow::Result;
use sqlx::PgPool;

/// Create the schema if it does not exist. Safe to run repeatedly.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            username VARCHAR(255) NOT NULL UNIQUE,
            password TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pdfs (
            id BIGSERIAL PRIMARY KEY,
            file_name VARCHAR(255) NOT NULL,
            upload_time TIMESTAMPTZ NOT NULL,
            file_size BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No ON DELETE CASCADE: the coordinator deletes sentences itself so
    // blob removal can be ordered before any metadata is touched.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sentences (
            id BIGSERIAL PRIMARY KEY,
            pdf_id BIGINT NOT NULL REFERENCES pdfs(id),
            position BIGINT NOT NULL,
            sentence TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sentences_pdf_id ON sentences(pdf_id, position)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pdfs_file_name ON pdfs(file_name)")
        .execute(pool)
        .await?;

    Ok(())
}
