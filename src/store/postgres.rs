//! Postgres-backed [`MetadataStore`].
//!
//! Maps each trait operation onto the `pdfs`, `sentences`, and `users`
//! tables created by [`migrate`](crate::migrate). Ids come from
//! `BIGSERIAL` columns via `RETURNING id`; keyword search uses `ILIKE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::{Document, NewDocument, SentenceHit, UserRecord};

use super::{MetadataStore, StoreError, StoreResult};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Escape `LIKE` metacharacters so the keyword matches literally.
pub(crate) fn escape_like(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len());
    for ch in keyword.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn row_to_document(row: &sqlx::postgres::PgRow) -> Document {
    let upload_time: DateTime<Utc> = row.get("upload_time");
    Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        upload_time,
        file_size: row.get("file_size"),
    }
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pdfs (file_name, upload_time, file_size) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&doc.file_name)
        .bind(doc.upload_time)
        .bind(doc.file_size)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT id, file_name, upload_time, file_size FROM pdfs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let rows =
            sqlx::query("SELECT id, file_name, upload_time, file_size FROM pdfs ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn insert_sentences(&self, pdf_id: i64, sentences: &[String]) -> StoreResult<()> {
        if sentences.is_empty() {
            return Ok(());
        }

        // Single statement: the whole batch commits or none of it does.
        sqlx::query(
            r#"
            INSERT INTO sentences (pdf_id, position, sentence)
            SELECT $1, t.ord - 1, t.sentence
            FROM UNNEST($2::text[]) WITH ORDINALITY AS t(sentence, ord)
            "#,
        )
        .bind(pdf_id)
        .bind(sentences)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn sentences_for(&self, pdf_id: i64) -> StoreResult<Vec<String>> {
        sqlx::query_scalar("SELECT sentence FROM sentences WHERE pdf_id = $1 ORDER BY position ASC")
            .bind(pdf_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn search_sentences(&self, keyword: &str) -> StoreResult<Vec<SentenceHit>> {
        let rows = sqlx::query(
            r#"
            SELECT pdf_id, sentence FROM sentences
            WHERE sentence ILIKE '%' || $1 || '%' ESCAPE '\'
            ORDER BY pdf_id ASC, position ASC
            "#,
        )
        .bind(escape_like(keyword))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .iter()
            .map(|row| SentenceHit {
                pdf_id: row.get("pdf_id"),
                sentence: row.get("sentence"),
            })
            .collect())
    }

    async fn delete_sentences(&self, pdf_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sentences WHERE pdf_id = $1")
            .bind(pdf_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn delete_document(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM pdfs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query("SELECT id, username, password FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password"),
        }))
    }

    async fn insert_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO users (username, password) VALUES ($1, $2) RETURNING id")
                .bind(username)
                .bind(password_hash)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| match &e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => {
                        StoreError::Conflict(format!("username '{}'", username))
                    }
                    _ => backend(e),
                })?;

        Ok(UserRecord {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        })
    }
}
