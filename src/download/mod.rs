mod http;
mod manager;

pub use http::HttpDownloadProvider;
pub use manager::{DownloadEvent, DownloadManager, DownloadRequest};

use crate::import::{ImportError, ProgressNotification};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download cancelled")]
    Cancelled,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Download unavailable: {0}")]
    Unavailable(String),
    #[error("Import of download failed: {0}")]
    Import(ImportError),
    #[error("Download did not produce an importable {0}")]
    NothingImported(String),
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl From<ImportError> for DownloadError {
    fn from(e: ImportError) -> Self {
        if e.is_cancelled() {
            DownloadError::Cancelled
        } else {
            DownloadError::Import(e)
        }
    }
}

/// Network source for model archives
#[async_trait::async_trait]
pub trait DownloadProvider<M>: Send + Sync {
    /// Fetch the archive for `model` into a local file and return its path.
    ///
    /// Implementations report through `notification` and stop with
    /// [`DownloadError::Cancelled`] once it is cancelled.
    async fn fetch(
        &self,
        model: &M,
        notification: &ProgressNotification,
    ) -> Result<PathBuf, DownloadError>;
}
