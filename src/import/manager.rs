use crate::archive::{reader_from_path, ArchiveReader};
use crate::db::{self, WriteTransaction};
use crate::events::{DelayedEvents, ModelEvent};
use crate::file_store::FileHandle;
use crate::import::cancel::CancellationToken;
use crate::import::duplicates;
use crate::import::family::ModelFamily;
use crate::import::hasher::compute_hash;
use crate::import::progress::{ImportProgress, ImportProgressHandle, ProgressNotification};
use crate::import::scheduler::ImportScheduler;
use crate::import::types::ImportError;
use crate::import::unpacker::{stage_files, standardise_path};
use crate::library::{ExportService, FileChanges, LibraryError, LibraryManager};
use crate::model::{log_prefix, FileRecord, Importable};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

type ModelOf<F> = <F as ModelFamily>::Model;

/// What the transactional part of an import decided
enum Resolution<M> {
    /// A stored model with the same content stands in for the candidate
    Reused(M),
    Added,
}

/// Import coordinator for one model family
///
/// Turns archives into persisted models: stage files, hash, populate, then
/// resolve duplicates and persist inside the write transaction. Entry points
/// named `import_*` run on the family's [`ImportScheduler`]; [`import`](Self::import)
/// and [`import_bare`](Self::import_bare) run inline in the caller.
pub struct ImportManager<F: ModelFamily> {
    family: Arc<F>,
    library: LibraryManager<ModelOf<F>>,
    scheduler: Arc<ImportScheduler>,
    progress: ImportProgressHandle,
    exports_dir: PathBuf,
}

impl<F: ModelFamily> Clone for ImportManager<F> {
    fn clone(&self) -> Self {
        ImportManager {
            family: self.family.clone(),
            library: self.library.clone(),
            scheduler: self.scheduler.clone(),
            progress: self.progress.clone(),
            exports_dir: self.exports_dir.clone(),
        }
    }
}

impl<F: ModelFamily> std::fmt::Debug for ImportManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportManager")
            .field("family", &self.family.name())
            .field("scheduler", &self.scheduler.name())
            .field("exports_dir", &self.exports_dir)
            .finish()
    }
}

impl<F: ModelFamily> ImportManager<F> {
    /// Build the coordinator and purge deletions left over from earlier runs
    pub async fn new(
        family: F,
        library: LibraryManager<ModelOf<F>>,
        scheduler: Arc<ImportScheduler>,
        progress: ImportProgressHandle,
        exports_dir: PathBuf,
    ) -> Result<Self, LibraryError> {
        library.cleanup().await?;
        Ok(ImportManager {
            family: Arc::new(family),
            library,
            scheduler,
            progress,
            exports_dir,
        })
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn library(&self) -> &LibraryManager<ModelOf<F>> {
        &self.library
    }

    pub fn scheduler(&self) -> &ImportScheduler {
        &self.scheduler
    }

    /// New notification whose updates reach [`subscribe_progress`](Self::subscribe_progress)
    pub fn post_notification(&self) -> ProgressNotification {
        self.progress.notification()
    }

    pub fn subscribe_progress(&self) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.progress.subscribe_all()
    }

    /// Subscribe to `Updated`/`Removed` events of this family
    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<ModelEvent<ModelOf<F>>> {
        self.library.subscribe()
    }

    // ---------------------------------------------------------------------
    // Scheduled entry points
    // ---------------------------------------------------------------------

    /// Import a file, zip or directory on the import scheduler.
    ///
    /// Queued when called. The source is deleted afterwards if the family
    /// asks for it.
    pub fn import_path(
        &self,
        path: &Path,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Option<ModelOf<F>>, ImportError>> {
        let this = self.clone();
        let path = path.to_path_buf();
        let queued = self
            .scheduler
            .schedule(async move { this.import_from_path(&path, &cancel).await });
        async move { queued.await? }
    }

    /// Import a pre-opened archive on the import scheduler
    pub fn import_archive(
        &self,
        mut archive: Box<dyn ArchiveReader>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Option<ModelOf<F>>, ImportError>> {
        let this = self.clone();
        let queued = self
            .scheduler
            .schedule(async move { this.import(archive.as_mut(), &cancel).await });
        async move { queued.await? }
    }

    /// Persist a model built elsewhere, without archive content, on the import scheduler
    pub fn import_model(
        &self,
        model: ModelOf<F>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Option<ModelOf<F>>, ImportError>> {
        let this = self.clone();
        let queued = self
            .scheduler
            .schedule(async move { this.import_bare(model, &cancel).await });
        async move { queued.await? }
    }

    /// Import several sources, reporting through a fresh notification
    pub async fn import_paths(&self, paths: &[PathBuf]) -> Vec<ModelOf<F>> {
        let notification = self.post_notification();
        self.import_paths_with(paths, &notification).await
    }

    /// Import several sources, reporting through `notification`.
    ///
    /// Every source is queued up front and gets its own cancellation scope
    /// under the notification's. A failing source is logged and left out;
    /// the rest keep going. Results keep submission order.
    pub async fn import_paths_with(
        &self,
        paths: &[PathBuf],
        notification: &ProgressNotification,
    ) -> Vec<ModelOf<F>> {
        let name = self.family.name().to_string();
        let total = paths.len();
        if total == 0 {
            return Vec::new();
        }

        notification.set_progress(0.0, format!("Import of {} is in progress", name));

        let mut pending = FuturesUnordered::new();
        for (index, path) in paths.iter().enumerate() {
            let import = self.import_path(path, notification.cancel_token().child());
            pending.push(async move { (index, import.await) });
        }

        let mut slots: Vec<Option<ModelOf<F>>> = vec![None; total];
        let mut current = 0;
        while let Some((index, result)) = pending.next().await {
            current += 1;
            match result {
                Ok(Some(model)) => slots[index] = Some(model),
                Ok(None) => {}
                Err(e) if e.is_cancelled() => {
                    debug!("Import of {} cancelled", paths[index].display());
                }
                Err(e) => error!("Could not import {}: {}", paths[index].display(), e),
            }
            notification.set_progress(
                current as f32 / total as f32,
                format!("Imported {} of {} {}s", current, total, name),
            );
        }

        let imported: Vec<ModelOf<F>> = slots.into_iter().flatten().collect();

        if imported.is_empty() {
            if notification.is_cancel_requested() {
                notification.cancel();
            } else {
                notification.fail(format!("Import of {} failed!", name));
            }
        } else {
            let completion = match imported.as_slice() {
                [single] => format!("Imported {}!", single.display_name()),
                many => format!("Imported {} {}s!", many.len(), name),
            };
            notification.set_completion_text(completion);
            notification.complete();
        }

        info!("Imported {} of {} {} source(s)", imported.len(), total, name);
        imported
    }

    /// Import every item directory of a legacy installation rooted at `root`
    pub async fn import_from_legacy(&self, root: &Path) -> Vec<ModelOf<F>> {
        let Some(sub_path) = self.family.legacy_import_path() else {
            debug!("{} has no legacy import location", self.family.name());
            return Vec::new();
        };

        if !root.is_dir() {
            error!("No legacy installation found at {}", root.display());
            return Vec::new();
        }

        let source = root.join(sub_path);
        if !source.is_dir() {
            error!(
                "Legacy {} folder does not exist at {}",
                self.family.name(),
                source.display()
            );
            return Vec::new();
        }

        let mut directories = Vec::new();
        match tokio::fs::read_dir(&source).await {
            Ok(mut entries) => loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if path.is_dir() {
                            directories.push(path);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Could not list {}: {}", source.display(), e);
                        return Vec::new();
                    }
                }
            },
            Err(e) => {
                error!("Could not list {}: {}", source.display(), e);
                return Vec::new();
            }
        }
        directories.sort();

        info!(
            "Importing {} legacy {}(s) from {}",
            directories.len(),
            self.family.name(),
            source.display()
        );
        self.import_paths(&directories).await
    }

    // ---------------------------------------------------------------------
    // Inline entry points
    // ---------------------------------------------------------------------

    /// Import an archive in the caller's context.
    ///
    /// Returns `Ok(None)` when the family rejects the archive. Calling this
    /// while the current import worker already holds the write transaction
    /// fails with [`ImportError::NotTransactionLeader`].
    pub async fn import(
        &self,
        archive: &mut (dyn ArchiveReader + 'static),
        cancel: &CancellationToken,
    ) -> Result<Option<ModelOf<F>>, ImportError> {
        cancel.check()?;

        let Some(model) = self.create_model(archive)? else {
            debug!("{} was not accepted as a {}", archive.name(), self.family.name());
            return Ok(None);
        };

        self.run_import(model, Some(archive), cancel).await
    }

    /// Persist a model without archive content in the caller's context.
    /// Its file list is replaced by nothing, since no files were staged for it.
    pub async fn import_bare(
        &self,
        model: ModelOf<F>,
        cancel: &CancellationToken,
    ) -> Result<Option<ModelOf<F>>, ImportError> {
        cancel.check()?;
        self.run_import(model, None, cancel).await
    }

    async fn import_from_path(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<ModelOf<F>>, ImportError> {
        cancel.check()?;

        let mut archive = reader_from_path(path)?;
        let imported = self.import(archive.as_mut(), cancel).await?;
        // Release the source before touching it on disk
        drop(archive);

        if imported.is_some() && self.family.should_delete_archive(path) {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(
                    "Could not delete original file after import ({}): {}",
                    path.display(),
                    e
                );
            }
        }

        Ok(imported)
    }

    fn create_model(
        &self,
        archive: &mut dyn ArchiveReader,
    ) -> Result<Option<ModelOf<F>>, ImportError> {
        match self.family.create_model(archive) {
            Ok(model) => Ok(model),
            Err(ImportError::Cancelled) => Err(ImportError::Cancelled),
            Err(e) => {
                error!("Model creation of {} failed: {}", archive.name(), e);
                Ok(None)
            }
        }
    }

    async fn run_import(
        &self,
        mut model: ModelOf<F>,
        mut archive: Option<&mut (dyn ArchiveReader + 'static)>,
        cancel: &CancellationToken,
    ) -> Result<Option<ModelOf<F>>, ImportError> {
        debug!("{} Beginning import...", log_prefix(Some(&model)));

        let archive_name = archive.as_ref().map(|a| a.name().to_string());
        let staged = match archive.as_deref_mut() {
            Some(reader) => match stage_files(reader, self.library.files()).await {
                Ok(staged) => staged,
                Err(e) => {
                    self.log_failure(&model, &e);
                    return Err(e);
                }
            },
            None => Vec::new(),
        };
        model.set_files(staged);
        let staged_handles = model.file_handles();

        if let Err(e) = self
            .prepare(&mut model, archive, archive_name.as_deref(), cancel)
            .await
        {
            self.release_staged(&model, &staged_handles).await;
            self.log_failure(&model, &e);
            return Err(e);
        }

        let mut tx = match self.library.store().database().begin_write().await {
            Ok(tx) => tx,
            Err(e) => {
                let e = ImportError::from(e);
                self.release_staged(&model, &staged_handles).await;
                self.log_failure(&model, &e);
                return Err(e);
            }
        };
        if !tx.is_leader() {
            error!(
                "{} Import attempted while this worker already holds the write transaction",
                log_prefix(Some(&model))
            );
            self.release_staged(&model, &staged_handles).await;
            return Err(ImportError::NotTransactionLeader);
        }

        let delayed = self.library.events().begin();
        let mut changes = FileChanges::default();
        let result = self
            .resolve_and_persist(&mut tx, &mut model, &staged_handles, &delayed, &mut changes, cancel)
            .await;

        match result {
            Ok(resolution) => {
                if let Err(e) = tx.finish().await {
                    let e = ImportError::from(e);
                    delayed.end(false);
                    self.release_staged(&model, &staged_handles).await;
                    self.log_failure(&model, &e);
                    return Err(e);
                }
                if let Err(e) = changes.apply(self.library.files()).await {
                    warn!(
                        "{} Reference count update after commit failed: {}",
                        log_prefix(Some(&model)),
                        e
                    );
                }
                delayed.end(true);

                match resolution {
                    Resolution::Reused(existing) => Ok(Some(existing)),
                    Resolution::Added => {
                        info!("{} Import successfully completed!", log_prefix(Some(&model)));
                        Ok(Some(model))
                    }
                }
            }
            Err(e) => {
                tx.record_error(&e);
                if let Err(rollback) = tx.finish().await {
                    warn!(
                        "{} Rollback failed: {}",
                        log_prefix(Some(&model)),
                        rollback
                    );
                }
                delayed.end(false);
                self.release_staged(&model, &staged_handles).await;
                self.log_failure(&model, &e);
                Err(e)
            }
        }
    }

    /// Hash and populate the staged candidate
    async fn prepare(
        &self,
        model: &mut ModelOf<F>,
        archive: Option<&mut (dyn ArchiveReader + 'static)>,
        archive_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        cancel.check()?;

        let hash = compute_hash(
            &*model,
            archive_name,
            self.family.hashable_extensions(),
            self.library.files(),
        )
        .await?;
        model.set_hash(hash);

        self.family
            .populate(model, archive, self.library.files(), cancel)
            .await
            .map_err(|e| match e {
                ImportError::Cancelled | ImportError::PopulationFailed(_) => e,
                other => ImportError::PopulationFailed(other.to_string()),
            })
    }

    /// Duplicate resolution and insert, inside the write transaction
    async fn resolve_and_persist(
        &self,
        tx: &mut WriteTransaction,
        model: &mut ModelOf<F>,
        staged_handles: &[FileHandle],
        delayed: &DelayedEvents<ModelEvent<ModelOf<F>>>,
        changes: &mut FileChanges,
        cancel: &CancellationToken,
    ) -> Result<Resolution<ModelOf<F>>, ImportError> {
        let conn = tx.conn()?;

        if let Some(existing) = duplicates::find_existing(self.library.store(), conn, model).await? {
            if self.family.can_reuse_existing(&existing, model) {
                self.library
                    .undelete_in(conn, &existing, delayed, changes)
                    .await?;
                changes.dereference(staged_handles.iter().cloned());

                let existing_id = existing.id().unwrap_or_default();
                info!(
                    "{} Found existing {} for {} (ID {}) - skipping import.",
                    log_prefix(Some(&existing)),
                    self.family.name(),
                    model.display_name(),
                    existing_id
                );
                let current = self
                    .library
                    .store()
                    .get_in(conn, existing_id)
                    .await?
                    .unwrap_or(existing);
                return Ok(Resolution::Reused(current));
            }

            debug!(
                "{} Found existing but failed re-use check",
                log_prefix(Some(&existing))
            );
            self.library
                .delete_in(conn, &existing, delayed, changes)
                .await?;
            let existing_id = existing.id();
            let purged = self
                .library
                .purge_in(conn, &move |m: &ModelOf<F>| m.id() == existing_id)
                .await?;
            if let (0, Some(id)) = (purged, existing_id) {
                // Protected rows outlive the purge; only one row may own a hash
                db::clear_model_hash(conn, id).await?;
                debug!(
                    "{} Kept protected {} without its hash",
                    log_prefix(Some(&existing)),
                    id
                );
            }
        }

        cancel.check()?;

        self.family.pre_import(model);
        self.library.store().add_in(conn, model, delayed).await?;
        Ok(Resolution::Added)
    }

    async fn release_staged(&self, model: &ModelOf<F>, staged_handles: &[FileHandle]) {
        if let Err(e) = self.library.files().dereference(staged_handles).await {
            warn!(
                "{} Could not release staged files: {}",
                log_prefix(Some(model)),
                e
            );
        }
    }

    fn log_failure(&self, model: &ModelOf<F>, e: &ImportError) {
        if e.is_cancelled() {
            debug!("{} Import cancelled", log_prefix(Some(model)));
        } else {
            error!(
                "{} Database import or population failed and has been rolled back: {}",
                log_prefix(Some(model)),
                e
            );
        }
    }

    // ---------------------------------------------------------------------
    // Editing stored models
    // ---------------------------------------------------------------------

    /// Recompute the identity hash from the current files and persist
    pub async fn update(&self, model: &ModelOf<F>) -> Result<ModelOf<F>, ImportError> {
        let mut updated = model.clone();
        let hash = compute_hash(
            &updated,
            None,
            self.family.hashable_extensions(),
            self.library.files(),
        )
        .await?;
        updated.set_hash(hash);
        self.library.update(&updated).await?;
        Ok(updated)
    }

    /// Add `data` to the model under `filename`
    pub async fn add_file(
        &self,
        model: &ModelOf<F>,
        data: &[u8],
        filename: &str,
    ) -> Result<ModelOf<F>, ImportError> {
        let handle = self.library.files().add(data).await?;

        let mut updated = model.clone();
        let mut files = updated.files().to_vec();
        files.push(FileRecord::new(standardise_path(filename), handle.clone()));
        updated.set_files(files);

        match self.update(&updated).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                self.release_staged(&updated, &[handle]).await;
                Err(e)
            }
        }
    }

    /// Remove the file named `filename` from the model and release its content
    pub async fn delete_file(
        &self,
        model: &ModelOf<F>,
        filename: &str,
    ) -> Result<ModelOf<F>, ImportError> {
        let mut updated = model.clone();
        let mut files = updated.files().to_vec();
        let position = files
            .iter()
            .position(|f| f.filename == filename)
            .ok_or_else(|| LibraryError::FileNotFound(filename.to_string()))?;
        let removed = files.remove(position);
        updated.set_files(files);

        let updated = self.update(&updated).await?;
        self.library.files().dereference(&[removed.handle]).await?;
        Ok(updated)
    }

    /// Swap the content of `filename`, optionally renaming it
    pub async fn replace_file(
        &self,
        model: &ModelOf<F>,
        filename: &str,
        data: &[u8],
        new_name: Option<&str>,
    ) -> Result<ModelOf<F>, ImportError> {
        let mut files = model.files().to_vec();
        let position = files
            .iter()
            .position(|f| f.filename == filename)
            .ok_or_else(|| LibraryError::FileNotFound(filename.to_string()))?;
        let removed = files.remove(position);

        let handle = self.library.files().add(data).await?;
        let name = new_name.map(standardise_path).unwrap_or(removed.filename.clone());
        files.push(FileRecord::new(name, handle.clone()));

        let mut updated = model.clone();
        updated.set_files(files);

        let updated = match self.update(&updated).await {
            Ok(updated) => updated,
            Err(e) => {
                self.release_staged(&updated, &[handle]).await;
                return Err(e);
            }
        };
        self.library.files().dereference(&[removed.handle]).await?;
        Ok(updated)
    }

    /// Write the model's files into a new archive in the exports directory
    pub async fn export(&self, model: &ModelOf<F>) -> Result<PathBuf, LibraryError> {
        let extension = self
            .family
            .handled_extensions()
            .first()
            .copied()
            .unwrap_or(".zip");
        ExportService::export_model(model, &self.library, &self.exports_dir, extension).await
    }

    // ---------------------------------------------------------------------
    // Batch lifecycle
    // ---------------------------------------------------------------------

    /// Soft-delete every model, reporting through a fresh notification
    pub async fn delete_all(&self, models: &[ModelOf<F>]) -> Result<usize, LibraryError> {
        let notification = self.post_notification();
        self.library.delete_many(models, &notification).await
    }

    /// Restore every pending-delete model, reporting through a fresh notification
    pub async fn undelete_all(&self, models: &[ModelOf<F>]) -> Result<usize, LibraryError> {
        let notification = self.post_notification();
        self.library.undelete_many(models, &notification).await
    }
}
