//! CLI command implementations.
//!
//! Each `run_*` function performs one operation through [`App`] and prints
//! a human-readable result to stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::app::App;

pub async fn run_register(app: &App, username: &str, password: &str) -> Result<()> {
    let principal = app.gate.register(username, password).await?;
    println!("Registered user '{}' (id {}).", principal.username, principal.id);
    Ok(())
}

/// Stored name for an upload: `--name` if given, otherwise the file's base name.
pub fn upload_name(path: &Path, name: Option<&str>) -> Result<String> {
    match name {
        Some(n) => Ok(n.to_string()),
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a file name from {}", path.display())),
    }
}

pub async fn run_upload(app: &App, path: &Path, name: Option<&str>) -> Result<()> {
    let file_name = upload_name(path, name)?;
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let id = app.ingest.upload(&file_name, file).await?;
    let detail = app.retrieve.get_by_id(id).await?;
    println!(
        "Uploaded '{}' as document {} ({} bytes, {} sentences).",
        file_name,
        id,
        detail.pdf.file_size,
        detail.sentences.len()
    );
    Ok(())
}

pub async fn run_list(app: &App) -> Result<()> {
    let docs = app.retrieve.list().await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!("{:>6}  {:>10}  {:<25}  FILE", "ID", "BYTES", "UPLOADED");
    for doc in docs {
        println!(
            "{:>6}  {:>10}  {:<25}  {}",
            doc.id,
            doc.file_size,
            doc.upload_time.format("%Y-%m-%d %H:%M:%S UTC"),
            doc.file_name
        );
    }
    Ok(())
}

pub async fn run_get(app: &App, id: i64) -> Result<()> {
    let detail = app.retrieve.get_by_id(id).await?;
    let doc = &detail.pdf;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("file_name:    {}", doc.file_name);
    println!("upload_time:  {}", doc.upload_time.to_rfc3339());
    println!("file_size:    {}", doc.file_size);
    println!("--- Sentences ({}) ---", detail.sentences.len());
    for (i, sentence) in detail.sentences.iter().enumerate() {
        println!("[{}] {}", i, sentence);
    }
    Ok(())
}

pub async fn run_search(app: &App, keyword: &str) -> Result<()> {
    let result = app.retrieve.search(keyword).await?;
    println!(
        "{} matching sentence(s) for '{}'",
        result.occurrences, result.keyword
    );
    for hit in result.sentences {
        println!("  [{}] {}", hit.pdf_id, hit.sentence.trim());
    }
    Ok(())
}

pub async fn run_page(app: &App, id: i64, page: &str, output: Option<PathBuf>) -> Result<()> {
    let jpeg = app.retrieve.page_image(id, page).await?;
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}-{}.jpg", id, page.trim())));
    tokio::fs::write(&output, &jpeg)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} ({} bytes).", output.display(), jpeg.len());
    Ok(())
}

pub async fn run_delete(app: &App, id: i64) -> Result<()> {
    app.ingest.delete(id).await?;
    println!("Deleted document {}.", id);
    Ok(())
}

pub async fn run_reconcile(app: &App) -> Result<()> {
    let report = app.reconcile().await?;
    if report.is_clean() {
        println!("Blob store and metadata agree.");
        return Ok(());
    }
    println!("Orphan blobs ({}):", report.orphan_blobs.len());
    for key in &report.orphan_blobs {
        println!("  {}", key);
    }
    println!("Dangling documents ({}):", report.dangling_documents.len());
    for doc in &report.dangling_documents {
        println!("  {}  {}", doc.id, doc.file_name);
    }
    Ok(())
}
