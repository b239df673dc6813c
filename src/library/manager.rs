use crate::db::{self, Database, WriteTransaction};
use crate::events::{DelayedEvents, EventHub, EventSink, ModelEvent};
use crate::file_store::{FileHandle, FileStoreError, FileStoreManager};
use crate::import::ProgressNotification;
use crate::library::store::ModelStore;
use crate::model::{log_prefix, Importable};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File store error: {0}")]
    FileStore(#[from] FileStoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Model not found: {0}")]
    ModelNotFound(i64),
    #[error("Model has not been persisted yet")]
    NotPersisted,
    #[error("File not found in model: {0}")]
    FileNotFound(String),
    #[error("Write requested inside another write transaction on this thread")]
    NestedWrite,
}

/// Reference count changes that take effect once their transaction commits
///
/// References are applied before dereferences so shared content never
/// passes through zero while being handed between models.
#[derive(Debug, Default)]
pub struct FileChanges {
    reference: Vec<FileHandle>,
    dereference: Vec<FileHandle>,
}

impl FileChanges {
    pub fn reference(&mut self, handles: impl IntoIterator<Item = FileHandle>) {
        self.reference.extend(handles);
    }

    pub fn dereference(&mut self, handles: impl IntoIterator<Item = FileHandle>) {
        self.dereference.extend(handles);
    }

    /// Dereferences are attempted even when a reference fails
    pub async fn apply(self, files: &FileStoreManager) -> Result<(), FileStoreError> {
        let referenced = files.reference(&self.reference).await;
        let dereferenced = files.dereference(&self.dereference).await;
        referenced.and(dereferenced)
    }
}

#[derive(Debug, Clone, Copy)]
enum BatchOp {
    Delete,
    Undelete,
}

/// Soft-delete lifecycle and persistence for one model family
///
/// Handles:
/// - Delete / undelete (single and batch)
/// - Purging pending deletes
/// - Query methods and change events
#[derive(Clone)]
pub struct LibraryManager<M: Importable> {
    store: ModelStore<M>,
    files: FileStoreManager,
    events: EventHub<ModelEvent<M>>,
}

impl<M: Importable> LibraryManager<M> {
    pub fn new(database: Database, files: FileStoreManager, family: &str) -> Self {
        LibraryManager {
            store: ModelStore::new(database, family),
            files,
            events: EventHub::new(),
        }
    }

    pub fn store(&self) -> &ModelStore<M> {
        &self.store
    }

    pub fn files(&self) -> &FileStoreManager {
        &self.files
    }

    pub fn events(&self) -> &EventHub<ModelEvent<M>> {
        &self.events
    }

    /// Subscribe to `Updated`/`Removed` events of this family
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<ModelEvent<M>> {
        self.events.subscribe()
    }

    /// Open the write transaction, refusing nested use
    pub async fn begin_write(&self) -> Result<WriteTransaction, LibraryError> {
        let tx = self.store.database().begin_write().await?;
        if !tx.is_leader() {
            return Err(LibraryError::NestedWrite);
        }
        Ok(tx)
    }

    /// Get a model by ID, including pending deletes
    pub async fn get(&self, model_id: i64) -> Result<Option<M>, LibraryError> {
        self.store.get(model_id).await
    }

    /// All models not pending deletion
    pub async fn all(&self) -> Result<Vec<M>, LibraryError> {
        self.store.all(false).await
    }

    /// Mark a model pending deletion and release its files.
    /// Returns false if it is missing or already pending.
    pub async fn delete(&self, model: &M) -> Result<bool, LibraryError> {
        let mut tx = self.begin_write().await?;
        let delayed = self.events.begin();
        let mut changes = FileChanges::default();
        let result = self
            .delete_in(tx.conn()?, model, &delayed, &mut changes)
            .await;
        self.settle(tx, delayed, changes, result).await
    }

    /// Clear a pending deletion and take its files back.
    /// Returns false if it is missing or not pending.
    pub async fn undelete(&self, model: &M) -> Result<bool, LibraryError> {
        let mut tx = self.begin_write().await?;
        let delayed = self.events.begin();
        let mut changes = FileChanges::default();
        let result = self
            .undelete_in(tx.conn()?, model, &delayed, &mut changes)
            .await;
        self.settle(tx, delayed, changes, result).await
    }

    /// Persist changes to an existing model and raise `Updated`
    pub async fn update(&self, model: &M) -> Result<(), LibraryError> {
        let mut tx = self.begin_write().await?;
        let delayed = self.events.begin();
        let result = self.store.update_in(tx.conn()?, model, &delayed).await;
        self.settle(tx, delayed, FileChanges::default(), result)
            .await
    }

    /// Commit and publish on success; roll back and discard on failure
    pub(crate) async fn settle<T>(
        &self,
        mut tx: WriteTransaction,
        delayed: DelayedEvents<ModelEvent<M>>,
        changes: FileChanges,
        result: Result<T, LibraryError>,
    ) -> Result<T, LibraryError> {
        match result {
            Ok(value) => {
                tx.finish().await?;
                changes.apply(&self.files).await?;
                delayed.end(true);
                Ok(value)
            }
            Err(e) => {
                tx.record_error(&e);
                tx.finish().await?;
                delayed.end(false);
                Err(e)
            }
        }
    }

    pub async fn delete_in(
        &self,
        conn: &mut SqliteConnection,
        model: &M,
        events: &dyn EventSink<ModelEvent<M>>,
        changes: &mut FileChanges,
    ) -> Result<bool, LibraryError> {
        let Some(id) = model.id() else {
            return Ok(false);
        };
        let Some(mut stored) = self.store.get_in(conn, id).await? else {
            return Ok(false);
        };
        if stored.delete_pending() {
            return Ok(false);
        }

        db::set_delete_pending(conn, id, true).await?;
        stored.info_mut().delete_pending = true;
        changes.dereference(stored.file_handles());

        debug!("{} Marked {} pending deletion", log_prefix(Some(&stored)), id);
        events.raise(ModelEvent::Removed { id, model: stored });
        Ok(true)
    }

    pub async fn undelete_in(
        &self,
        conn: &mut SqliteConnection,
        model: &M,
        events: &dyn EventSink<ModelEvent<M>>,
        changes: &mut FileChanges,
    ) -> Result<bool, LibraryError> {
        let Some(id) = model.id() else {
            return Ok(false);
        };
        let Some(mut stored) = self.store.get_in(conn, id).await? else {
            return Ok(false);
        };
        if !stored.delete_pending() {
            return Ok(false);
        }

        db::set_delete_pending(conn, id, false).await?;
        stored.info_mut().delete_pending = false;
        changes.reference(stored.file_handles());

        debug!("{} Restored {}", log_prefix(Some(&stored)), id);
        events.raise(ModelEvent::Updated { id, model: stored });
        Ok(true)
    }

    /// Delete each model in turn, reporting through `notification`.
    ///
    /// Each model gets its own transaction; a cancellation stops before the
    /// next model and leaves earlier ones deleted.
    pub async fn delete_many(
        &self,
        models: &[M],
        notification: &ProgressNotification,
    ) -> Result<usize, LibraryError> {
        self.run_batch(models, notification, BatchOp::Delete).await
    }

    /// Undelete each model in turn; same batch semantics as [`delete_many`](Self::delete_many)
    pub async fn undelete_many(
        &self,
        models: &[M],
        notification: &ProgressNotification,
    ) -> Result<usize, LibraryError> {
        self.run_batch(models, notification, BatchOp::Undelete).await
    }

    async fn run_batch(
        &self,
        models: &[M],
        notification: &ProgressNotification,
        op: BatchOp,
    ) -> Result<usize, LibraryError> {
        if models.is_empty() {
            return Ok(0);
        }

        let name = self.store.family();
        let total = models.len();
        let (preparing, completion) = match op {
            BatchOp::Delete => (
                format!("Preparing to delete all {}s...", name),
                format!("Deleted all {}s!", name),
            ),
            BatchOp::Undelete => (
                format!("Preparing to restore all deleted {}s...", name),
                format!("Restored all deleted {}s!", name),
            ),
        };
        notification.set_progress(0.0, preparing);
        notification.set_completion_text(completion);

        let mut changed = 0;
        for (i, model) in models.iter().enumerate() {
            // user requested abort
            if notification.is_cancel_requested() {
                info!("Batch stopped after {} of {} {}s", i, total, name);
                return Ok(changed);
            }

            let text = match op {
                BatchOp::Delete => format!("Deleting {}s ({} of {})", name, i + 1, total),
                BatchOp::Undelete => format!("Restoring ({} of {})", i + 1, total),
            };
            notification.set_text(text.clone());

            let result = match op {
                BatchOp::Delete => self.delete(model).await,
                BatchOp::Undelete => self.undelete(model).await,
            };
            match result {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => error!("{} Batch step failed: {}", log_prefix(Some(model)), e),
            }
            notification.set_progress((i + 1) as f32 / total as f32, text);
        }

        notification.complete();
        Ok(changed)
    }

    /// Permanently remove pending-delete rows matching `predicate`.
    /// Protected rows are never removed.
    pub async fn purge(
        &self,
        predicate: impl Fn(&M) -> bool + Send + Sync,
    ) -> Result<usize, LibraryError> {
        let mut tx = self.begin_write().await?;
        let purged = match self.purge_in(tx.conn()?, &predicate).await {
            Ok(purged) => purged,
            Err(e) => {
                tx.record_error(&e);
                tx.finish().await?;
                return Err(e);
            }
        };
        tx.finish().await?;
        Ok(purged)
    }

    pub async fn purge_in(
        &self,
        conn: &mut SqliteConnection,
        predicate: &(dyn Fn(&M) -> bool + Send + Sync),
    ) -> Result<usize, LibraryError> {
        let mut purged = 0;
        for model in self.store.all_in(conn, true).await? {
            if !model.delete_pending() || model.protected() || !predicate(&model) {
                continue;
            }
            let Some(id) = model.id() else { continue };
            purged += db::delete_model(conn, id).await? as usize;
            debug!("{} Purged {}", log_prefix(Some(&model)), id);
        }
        Ok(purged)
    }

    /// Purge every pending delete and release unreferenced file content.
    /// Content still listed by a surviving row is kept, so protected pending
    /// rows stay restorable.
    pub async fn cleanup(&self) -> Result<usize, LibraryError> {
        let purged = self.purge(|_| true).await?;
        let retain: Vec<FileHandle> = self
            .store
            .database()
            .get_referenced_file_hashes()
            .await?
            .into_iter()
            .map(FileHandle::new)
            .collect();
        let released = self.files.cleanup(&retain).await?;
        if purged > 0 || released > 0 {
            info!(
                "Cleanup purged {} {}(s) and released {} file(s)",
                purged,
                self.store.family(),
                released
            );
        }
        Ok(purged)
    }
}
