use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database models for the hoard library
///
/// Every family shares one `models` table:
/// - common columns (hash, flags) are queryable
/// - the family-specific payload is stored as JSON in `data`
/// - file records live in `model_files`, ordered by `position`
///
/// A persisted model row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbModel {
    /// Assigned by SQLite on insert; `None` before the first insert
    pub id: Option<i64>,
    /// Family name, e.g. "skin"
    pub family: String,
    pub hash: Option<String>,
    /// Display name, kept as a column for listing without decoding `data`
    pub name: String,
    /// Family payload as JSON
    pub data: String,
    pub delete_pending: bool,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One file record owned by a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbModelFile {
    pub model_id: i64,
    /// Order of this file within the model (0-indexed)
    pub position: i32,
    /// Archive-relative path with `/` separators
    pub filename: String,
    /// Content hash, i.e. the file store handle
    pub file_hash: String,
}

impl DbModel {
    pub fn new(family: &str, name: &str, hash: Option<String>, data: String) -> Self {
        let now = Utc::now();
        DbModel {
            id: None,
            family: family.to_string(),
            hash,
            name: name.to_string(),
            data,
            delete_pending: false,
            protected: false,
            created_at: now,
            updated_at: now,
        }
    }
}
