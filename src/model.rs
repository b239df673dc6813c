use crate::file_store::FileHandle;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A named reference from a model to content held in the file store.
///
/// The record itself belongs to exactly one model. The content behind
/// `handle` is shared and reference counted by the file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Archive-relative path using `/` separators
    pub filename: String,
    pub handle: FileHandle,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, handle: FileHandle) -> Self {
        FileRecord {
            filename: filename.into(),
            handle,
        }
    }
}

/// Columns every importable model carries, regardless of family.
///
/// Families embed this struct (usually with `#[serde(skip)]`) and expose it
/// through [`Importable::info`]. The store persists these fields in dedicated
/// columns and restores them after deserializing the family payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInfo {
    /// Primary key, assigned on first persistence
    pub id: Option<i64>,
    /// Identity hash used for duplicate detection
    pub hash: Option<String>,
    pub files: Vec<FileRecord>,
    pub delete_pending: bool,
    /// Protected rows are never purged
    pub protected: bool,
}

/// Capability shared by every model the import pipeline can handle.
///
/// The pipeline is written once against this trait; each family (skins,
/// beatmap sets, score packages, ...) implements it by composition.
pub trait Importable:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    fn info(&self) -> &ModelInfo;

    fn info_mut(&mut self) -> &mut ModelInfo;

    /// Human readable name used in logs, notifications and export filenames
    fn display_name(&self) -> String;

    fn id(&self) -> Option<i64> {
        self.info().id
    }

    fn hash(&self) -> Option<&str> {
        self.info().hash.as_deref()
    }

    fn set_hash(&mut self, hash: Option<String>) {
        self.info_mut().hash = hash;
    }

    fn files(&self) -> &[FileRecord] {
        &self.info().files
    }

    fn set_files(&mut self, files: Vec<FileRecord>) {
        self.info_mut().files = files;
    }

    fn delete_pending(&self) -> bool {
        self.info().delete_pending
    }

    fn protected(&self) -> bool {
        self.info().protected
    }

    fn file_handles(&self) -> Vec<FileHandle> {
        self.files().iter().map(|f| f.handle.clone()).collect()
    }
}

/// Short correlation tag for log lines: first five characters of the hash.
pub fn log_prefix<M: Importable>(model: Option<&M>) -> String {
    let hash = model.and_then(|m| m.hash()).unwrap_or("?????");
    let short: String = hash.chars().take(5).collect();
    format!("[{}]", short)
}
