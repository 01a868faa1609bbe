//! Scoped temporary artifacts.
//!
//! Uploads and page renders both need the document on local disk for the
//! duration of one request. A [`ScopedArtifact`] owns a uniquely named
//! temporary file and removes it when dropped, so every exit path (success,
//! `?` propagation, panic unwinding) releases it.

use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};

pub struct ScopedArtifact {
    file: NamedTempFile,
}

impl ScopedArtifact {
    /// Create an empty artifact in `dir`, or the OS temp dir when `None`.
    pub fn create(dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("folio-").suffix(".pdf");
        let file = match dir {
            Some(d) => builder.tempfile_in(d)?,
            None => builder.tempfile()?,
        };
        Ok(Self { file })
    }

    /// Create an artifact and copy `reader` into it until EOF.
    pub async fn materialize<R>(dir: Option<&Path>, mut reader: R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin + Send,
    {
        let artifact = Self::create(dir)?;
        let mut out = artifact.writer().await?;
        tokio::io::copy(&mut reader, &mut out).await?;
        out.flush().await?;
        Ok(artifact)
    }

    /// Truncate the artifact and open it for writing. Callers that receive
    /// the body in chunks write through this handle.
    pub async fn writer(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::create(self.path()).await
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size on disk, in bytes.
    pub async fn len(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(self.path()).await?.len())
    }

    pub async fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }
}
