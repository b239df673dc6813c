use crate::archive::ArchiveReader;
use crate::file_store::FileStoreManager;
use crate::import::cancel::CancellationToken;
use crate::import::duplicates;
use crate::import::types::ImportError;
use crate::model::Importable;
use std::path::Path;

/// Per-family behavior plugged into the generic import pipeline
///
/// Only `name` and `create_model` are required. Everything else has the
/// behavior a plain zip-packaged family wants.
#[async_trait::async_trait]
pub trait ModelFamily: Send + Sync + 'static {
    type Model: Importable;

    /// Singular lowercase name, e.g. "skin". Also the storage family key.
    fn name(&self) -> &str;

    /// Extensions whose file contents define a model's identity
    fn hashable_extensions(&self) -> &[&str] {
        &[]
    }

    /// Extensions of archives this family imports; the first is used for exports
    fn handled_extensions(&self) -> &[&str] {
        &[".zip"]
    }

    /// Cheap model construction, enough for duplicate lookup.
    /// `Ok(None)` rejects the archive without it counting as a failure.
    fn create_model(
        &self,
        archive: &mut dyn ArchiveReader,
    ) -> Result<Option<Self::Model>, ImportError>;

    /// Fill in domain fields once files are staged and hashed
    async fn populate(
        &self,
        _model: &mut Self::Model,
        _archive: Option<&mut (dyn ArchiveReader + 'static)>,
        _files: &FileStoreManager,
        _cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        Ok(())
    }

    /// Last chance to change the model before it is persisted
    fn pre_import(&self, _model: &mut Self::Model) {}

    /// Whether an existing model with the same hash can stand in for the candidate
    fn can_reuse_existing(&self, existing: &Self::Model, candidate: &Self::Model) -> bool {
        duplicates::files_match(existing, candidate)
    }

    /// Whether a source file should be removed after it was imported
    fn should_delete_archive(&self, _path: &Path) -> bool {
        false
    }

    /// Directory below a legacy installation root holding this family's items
    fn legacy_import_path(&self) -> Option<&str> {
        None
    }

    /// Whether `model` is usable without downloading it; `stored` is its
    /// current row, if any
    fn check_local_availability(&self, model: &Self::Model, stored: Option<&Self::Model>) -> bool {
        model.id().is_some()
            && stored.is_some_and(|s| !s.delete_pending() && !s.files().is_empty())
    }
}
