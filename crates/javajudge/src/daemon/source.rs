//! Where scraped pages come from
//!
//! The scraper itself runs outside the judge and drops one JSON snapshot per
//! page into a directory. [`DirectorySource`] reads those snapshots.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read page snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid page id '{0}'")]
    InvalidPageId(String),

    #[error("page source unavailable: {0}")]
    Unavailable(String),
}

/// Provider of raw page content
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Raw JSON of `page_id`, or `None` when there is nothing to judge yet
    async fn fetch(&self, page_id: &str) -> Result<Option<String>, SourceError>;
}

/// Reads `<dir>/<page_id>.json`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn page_path(&self, page_id: &str) -> Result<PathBuf, SourceError> {
        let valid = !page_id.is_empty()
            && page_id != "."
            && page_id != ".."
            && !page_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(SourceError::InvalidPageId(page_id.to_owned()));
        }
        Ok(self.dir.join(format!("{page_id}.json")))
    }
}

#[async_trait]
impl PageSource for DirectorySource {
    async fn fetch(&self, page_id: &str) -> Result<Option<String>, SourceError> {
        let path = self.page_path(page_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(page = page_id, path = %path.display(), "no snapshot");
                Ok(None)
            }
            Err(source) => Err(SourceError::Read { path, source }),
        }
    }
}
