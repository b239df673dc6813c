use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Opaque reference to stored content.
///
/// Handles are content addressed: the hash is the SHA-256 of the bytes, so
/// adding identical bytes twice yields equal handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle {
    pub hash: String,
}

impl FileHandle {
    pub fn new(hash: impl Into<String>) -> Self {
        FileHandle { hash: hash.into() }
    }

    /// Handle for the given bytes, without storing anything
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        FileHandle {
            hash: format!("{:x}", hasher.finalize()),
        }
    }
}

/// Reference-counted content store (allows mocking for tests)
///
/// Counts are only ever changed through `add`, `reference` and
/// `dereference`. An object at zero keeps its bytes until `cleanup`, so a
/// soft-deleted model can still be restored; `reference` revives it.
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    /// Store bytes and take one reference on them
    async fn add(&self, data: &[u8]) -> Result<FileHandle, FileStoreError>;
    async fn reference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError>;
    async fn dereference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError>;
    async fn open_read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError>;
    /// Current reference count, 0 for unknown handles
    async fn ref_count(&self, handle: &FileHandle) -> Result<u32, FileStoreError>;
    /// Delete the bytes of every object whose count dropped to zero,
    /// except those in `retain`
    async fn cleanup(&self, retain: &[FileHandle]) -> Result<usize, FileStoreError>;
}

/// Local filesystem store with reference counts kept in SQLite
///
/// Objects live at `{root}/ab/cd/{hash}`. Counts live in `{root}/files.db`,
/// separate from the model database so file store calls never contend with
/// an open model write transaction.
pub struct LocalFileStore {
    root: PathBuf,
    pool: SqlitePool,
    mutation_lock: Mutex<()>,
}

impl LocalFileStore {
    pub async fn new(root: &Path) -> Result<Self, FileStoreError> {
        fs::create_dir_all(root).await?;

        let database_url = format!("sqlite://{}?mode=rwc", root.join("files.db").display());
        debug!("Connecting file store index at {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_refs (
                hash TEXT PRIMARY KEY,
                ref_count INTEGER NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(LocalFileStore {
            root: root.to_path_buf(),
            pool,
            mutation_lock: Mutex::new(()),
        })
    }

    /// Path of an object using hash-based partitioning
    /// Example: abcd1234... -> {root}/ab/cd/abcd1234...
    fn object_path(&self, hash: &str) -> PathBuf {
        if hash.len() < 4 {
            return self.root.join("misc").join(hash);
        }
        self.root.join(&hash[..2]).join(&hash[2..4]).join(hash)
    }

    async fn current_count(&self, hash: &str) -> Result<i64, FileStoreError> {
        let row = sqlx::query("SELECT ref_count FROM file_refs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("ref_count")).unwrap_or(0))
    }

    async fn write_object(&self, hash: &str, data: &[u8]) -> Result<(), FileStoreError> {
        let path = self.object_path(hash);
        if fs::try_exists(&path).await? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = path.with_extension("partial");
        fs::write(&partial, data).await?;
        fs::rename(&partial, &path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FileStore for LocalFileStore {
    async fn add(&self, data: &[u8]) -> Result<FileHandle, FileStoreError> {
        let handle = FileHandle::for_bytes(data);
        let _guard = self.mutation_lock.lock().await;

        self.write_object(&handle.hash, data).await?;

        sqlx::query(
            r#"
            INSERT INTO file_refs (hash, ref_count, size, created_at) VALUES (?, 1, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET ref_count = ref_count + 1
            "#,
        )
        .bind(&handle.hash)
        .bind(data.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Stored {} ({} bytes)", handle.hash, data.len());
        Ok(handle)
    }

    async fn reference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError> {
        let _guard = self.mutation_lock.lock().await;

        for handle in handles {
            let result = sqlx::query("UPDATE file_refs SET ref_count = ref_count + 1 WHERE hash = ?")
                .bind(&handle.hash)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(FileStoreError::NotFound(handle.hash.clone()));
            }
        }
        Ok(())
    }

    async fn dereference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError> {
        let _guard = self.mutation_lock.lock().await;

        for handle in handles {
            let result = sqlx::query(
                "UPDATE file_refs SET ref_count = ref_count - 1 WHERE hash = ? AND ref_count > 0",
            )
            .bind(&handle.hash)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                warn!("Dereference of unreferenced object {}", handle.hash);
            }
        }
        Ok(())
    }

    async fn open_read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError> {
        match fs::read(self.object_path(&handle.hash)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileStoreError::NotFound(handle.hash.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ref_count(&self, handle: &FileHandle) -> Result<u32, FileStoreError> {
        Ok(self.current_count(&handle.hash).await?.max(0) as u32)
    }

    async fn cleanup(&self, retain: &[FileHandle]) -> Result<usize, FileStoreError> {
        let _guard = self.mutation_lock.lock().await;
        let retain: HashSet<&str> = retain.iter().map(|h| h.hash.as_str()).collect();

        let rows = sqlx::query("SELECT hash FROM file_refs WHERE ref_count <= 0")
            .fetch_all(&self.pool)
            .await?;

        let mut removed = 0;
        for row in rows {
            let hash: String = row.get("hash");
            if retain.contains(hash.as_str()) {
                continue;
            }
            match fs::remove_file(self.object_path(&hash)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove released object {}: {}", hash, e);
                    continue;
                }
            }
            sqlx::query("DELETE FROM file_refs WHERE hash = ? AND ref_count <= 0")
                .bind(&hash)
                .execute(&self.pool)
                .await?;
            removed += 1;
        }

        if removed > 0 {
            info!("Released {} unreferenced object(s)", removed);
        }
        Ok(removed)
    }
}

/// Shared entry point to the configured file store
#[derive(Clone)]
pub struct FileStoreManager {
    storage: Arc<dyn FileStore>,
}

impl std::fmt::Debug for FileStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStoreManager")
            .field("storage", &"<dyn FileStore>")
            .finish()
    }
}

impl FileStoreManager {
    /// Open the local store rooted at `root`
    pub async fn new(root: &Path) -> Result<Self, FileStoreError> {
        info!("Opening file store at {}", root.display());
        let storage = LocalFileStore::new(root).await?;
        Ok(FileStoreManager {
            storage: Arc::new(storage),
        })
    }

    pub fn from_storage(storage: Arc<dyn FileStore>) -> Self {
        FileStoreManager { storage }
    }

    pub async fn add(&self, data: &[u8]) -> Result<FileHandle, FileStoreError> {
        self.storage.add(data).await
    }

    pub async fn reference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError> {
        if handles.is_empty() {
            return Ok(());
        }
        self.storage.reference(handles).await
    }

    pub async fn dereference(&self, handles: &[FileHandle]) -> Result<(), FileStoreError> {
        if handles.is_empty() {
            return Ok(());
        }
        self.storage.dereference(handles).await
    }

    pub async fn open_read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError> {
        self.storage.open_read(handle).await
    }

    pub async fn ref_count(&self, handle: &FileHandle) -> Result<u32, FileStoreError> {
        self.storage.ref_count(handle).await
    }

    pub async fn cleanup(&self, retain: &[FileHandle]) -> Result<usize, FileStoreError> {
        self.storage.cleanup(retain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_identical_bytes_share_one_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let a = store.add(b"hello").await.unwrap();
        let b = store.add(b"hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.ref_count(&a).await.unwrap(), 2);

        store.dereference(&[a.clone()]).await.unwrap();
        assert_eq!(store.ref_count(&a).await.unwrap(), 1);
        assert_eq!(store.open_read(&a).await.unwrap(), b"hello");

        store.dereference(&[b]).await.unwrap();
        assert_eq!(store.ref_count(&a).await.unwrap(), 0);
        assert_eq!(store.cleanup(&[]).await.unwrap(), 1);
        assert!(matches!(
            store.open_read(&a).await,
            Err(FileStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_count_object_can_be_revived_before_cleanup() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let handle = store.add(b"skin.ini").await.unwrap();
        store.dereference(&[handle.clone()]).await.unwrap();
        store.reference(&[handle.clone()]).await.unwrap();

        assert_eq!(store.cleanup(&[]).await.unwrap(), 0);
        assert_eq!(store.ref_count(&handle).await.unwrap(), 1);
        assert_eq!(store.open_read(&handle).await.unwrap(), b"skin.ini");
    }

    #[tokio::test]
    async fn test_cleanup_keeps_retained_objects() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let kept = store.add(b"still listed").await.unwrap();
        let dropped = store.add(b"forgotten").await.unwrap();
        store.dereference(&[kept.clone(), dropped.clone()]).await.unwrap();

        assert_eq!(store.cleanup(&[kept.clone()]).await.unwrap(), 1);
        assert_eq!(store.open_read(&kept).await.unwrap(), b"still listed");
        store.reference(&[kept.clone()]).await.unwrap();
        assert_eq!(store.ref_count(&kept).await.unwrap(), 1);
        assert!(store.reference(&[dropped]).await.is_err());
    }

    #[tokio::test]
    async fn test_reference_of_unknown_object_fails() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let handle = store.add(b"gone").await.unwrap();
        store.dereference(&[handle.clone()]).await.unwrap();
        store.cleanup(&[]).await.unwrap();

        assert!(matches!(
            store.reference(&[handle]).await,
            Err(FileStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.reference(&[FileHandle::new("0000")]).await,
            Err(FileStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dereference_never_goes_negative() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let handle = store.add(b"once").await.unwrap();
        store.dereference(&[handle.clone()]).await.unwrap();
        store.dereference(&[handle.clone()]).await.unwrap();
        assert_eq!(store.ref_count(&handle).await.unwrap(), 0);

        store.add(b"once").await.unwrap();
        assert_eq!(store.ref_count(&handle).await.unwrap(), 1);
    }

    #[test]
    fn test_handle_is_sha256_of_bytes() {
        let handle = FileHandle::for_bytes(b"abc");
        assert_eq!(
            handle.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
