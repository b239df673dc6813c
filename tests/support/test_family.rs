use hoard::archive::ArchiveReader;
use hoard::file_store::FileStoreManager;
use hoard::import::{duplicates, CancellationToken, ImportError, ModelFamily};
use hoard::{Importable, ModelInfo};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestModel {
    #[serde(skip)]
    pub info: ModelInfo,
    pub title: String,
    /// Set by populate from `meta.txt`
    pub detail: Option<String>,
}

impl TestModel {
    pub fn new(title: &str) -> Self {
        TestModel {
            info: ModelInfo::default(),
            title: title.to_string(),
            detail: None,
        }
    }
}

impl Importable for TestModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ModelInfo {
        &mut self.info
    }

    fn display_name(&self) -> String {
        self.title.clone()
    }
}

/// Family with switches for the failure modes of the pipeline
#[derive(Debug, Clone, Default)]
pub struct TestFamily {
    pub fail_populate: Arc<AtomicBool>,
    pub cancel_in_populate: Arc<AtomicBool>,
    pub reject_archives: Arc<AtomicBool>,
    pub never_reuse: Arc<AtomicBool>,
    pub populate_calls: Arc<AtomicUsize>,
    /// Imports currently inside their write transaction
    pub writes_open: Arc<AtomicUsize>,
    /// Highest `writes_open` seen so far
    pub max_writes_open: Arc<AtomicUsize>,
}

impl TestFamily {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ModelFamily for TestFamily {
    type Model = TestModel;

    fn name(&self) -> &str {
        "item"
    }

    fn hashable_extensions(&self) -> &[&str] {
        &[".txt"]
    }

    fn handled_extensions(&self) -> &[&str] {
        &[".pkg", ".zip"]
    }

    fn create_model(
        &self,
        archive: &mut dyn ArchiveReader,
    ) -> Result<Option<TestModel>, ImportError> {
        if self.reject_archives.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let title = Path::new(archive.name())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Some(TestModel::new(&title)))
    }

    async fn populate(
        &self,
        model: &mut TestModel,
        _archive: Option<&mut (dyn ArchiveReader + 'static)>,
        files: &FileStoreManager,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        self.populate_calls.fetch_add(1, Ordering::SeqCst);

        if self.cancel_in_populate.load(Ordering::SeqCst) {
            cancel.cancel();
            cancel.check()?;
        }
        if self.fail_populate.load(Ordering::SeqCst) {
            return Err(ImportError::PopulationFailed("switch set".to_string()));
        }

        if let Some(meta) = model.files().iter().find(|f| f.filename == "meta.txt") {
            let data = files.open_read(&meta.handle).await?;
            model.detail = Some(String::from_utf8_lossy(&data).into_owned());
        }
        Ok(())
    }

    fn pre_import(&self, _model: &mut TestModel) {
        let open = self.writes_open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writes_open.fetch_max(open, Ordering::SeqCst);
        // Widen the window for an overlapping writer to show up
        std::thread::sleep(std::time::Duration::from_millis(5));
        self.writes_open.fetch_sub(1, Ordering::SeqCst);
    }

    fn can_reuse_existing(&self, existing: &TestModel, candidate: &TestModel) -> bool {
        !self.never_reuse.load(Ordering::SeqCst) && duplicates::files_match(existing, candidate)
    }

    fn should_delete_archive(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "pkg")
    }

    fn legacy_import_path(&self) -> Option<&str> {
        Some("Items")
    }
}
