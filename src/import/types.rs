use crate::archive::ArchiveError;
use crate::file_store::FileStoreError;
use crate::library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    /// Requested by the caller; never logged as a failure
    #[error("Import cancelled")]
    Cancelled,
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Staging failed: {0}")]
    Staging(#[from] FileStoreError),
    #[error("Population failed: {0}")]
    PopulationFailed(String),
    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[from] LibraryError),
    #[error("Import attempted inside a write transaction held by another import")]
    NotTransactionLeader,
    #[error("Import scheduler is no longer running")]
    SchedulerClosed,
}

impl ImportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}

impl From<sqlx::Error> for ImportError {
    fn from(e: sqlx::Error) -> Self {
        ImportError::PersistenceFailed(LibraryError::Database(e))
    }
}
