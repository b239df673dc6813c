#![allow(dead_code)]

pub mod mock_file_store;
pub mod test_family;

pub use mock_file_store::MockFileStore;
pub use test_family::{TestFamily, TestModel};

use hoard::archive::ArchiveReader;
use hoard::db::Database;
use hoard::file_store::FileStoreManager;
use hoard::import::{ImportManager, ImportProgressHandle, ImportScheduler};
use hoard::library::LibraryManager;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Collects formatted log output for assertions
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's logs here until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let capture = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || capture.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Archive held entirely in memory
pub struct MemoryArchiveReader {
    name: String,
    entries: Vec<(String, Vec<u8>)>,
    /// Reading this member fails
    fail_on: Option<String>,
}

impl MemoryArchiveReader {
    pub fn new(name: &str, entries: &[(&str, &str)]) -> Self {
        MemoryArchiveReader {
            name: name.to_string(),
            entries: entries
                .iter()
                .map(|(n, c)| (n.to_string(), c.as_bytes().to_vec()))
                .collect(),
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, filename: &str) -> Self {
        self.fail_on = Some(filename.to_string());
        self
    }
}

impl ArchiveReader for MemoryArchiveReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn filenames(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    fn read(&mut self, filename: &str) -> Result<Vec<u8>, hoard::archive::ArchiveError> {
        if self.fail_on.as_deref() == Some(filename) {
            return Err(hoard::archive::ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "simulated read failure",
            )));
        }
        self.entries
            .iter()
            .find(|(n, _)| n == filename)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| hoard::archive::ArchiveError::EntryNotFound(filename.to_string()))
    }
}

/// Write a zip with `entries`, in the given order, to `dir/name`
pub fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (filename, contents) in entries {
            zip.start_file(*filename, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    let path = dir.join(name);
    std::fs::write(&path, cursor.into_inner()).unwrap();
    path
}

/// Write a directory tree with `entries` below `dir/name`
pub fn write_dir(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let root = dir.join(name);
    for (filename, contents) in entries {
        let path = root.join(filename);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    root
}

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub database: Database,
    pub store: Arc<MockFileStore>,
    pub files: FileStoreManager,
    pub family: TestFamily,
    pub importer: ImportManager<TestFamily>,
}

impl TestEnv {
    pub fn library(&self) -> &LibraryManager<TestModel> {
        self.importer.library()
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

pub async fn setup_test_environment() -> TestEnv {
    setup_with_degree(1).await
}

pub async fn setup_with_degree(degree: usize) -> TestEnv {
    tracing_init();

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let database = Database::new(db_path.to_str().unwrap())
        .await
        .expect("Failed to create database");

    let store = Arc::new(MockFileStore::new());
    let files = FileStoreManager::from_storage(store.clone());

    let runtime_handle = tokio::runtime::Handle::current();
    let family = TestFamily::default();
    let library = LibraryManager::new(database.clone(), files.clone(), "item");
    let scheduler = Arc::new(ImportScheduler::new("item", degree, runtime_handle.clone()));
    let progress = ImportProgressHandle::new(&runtime_handle);
    let importer = ImportManager::new(
        family.clone(),
        library,
        scheduler,
        progress,
        temp_dir.path().join("exports"),
    )
    .await
    .expect("Failed to create import manager");

    TestEnv {
        temp_dir,
        database,
        store,
        files,
        family,
        importer,
    }
}
