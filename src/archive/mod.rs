mod directory;
mod zip_reader;

pub use directory::DirectoryArchiveReader;
pub use zip_reader::ZipArchiveReader;

use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Unsupported import source: {0}")]
    Unsupported(PathBuf),
    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),
}

/// Read access to the members of an import source
///
/// Filenames are returned as the source reports them; separator
/// normalization happens during staging.
pub trait ArchiveReader: Send {
    /// Source name, used as a hash fallback and in logs
    fn name(&self) -> &str;

    fn filenames(&self) -> Vec<String>;

    fn read(&mut self, filename: &str) -> Result<Vec<u8>, ArchiveError>;
}

/// A single plain file presented as a one-member archive
pub struct SingleFileArchiveReader {
    path: PathBuf,
    name: String,
}

impl SingleFileArchiveReader {
    pub fn new(path: &Path) -> Self {
        SingleFileArchiveReader {
            path: path.to_path_buf(),
            name: file_name_of(path),
        }
    }
}

impl ArchiveReader for SingleFileArchiveReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn filenames(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn read(&mut self, filename: &str) -> Result<Vec<u8>, ArchiveError> {
        if filename != self.name {
            return Err(ArchiveError::EntryNotFound(filename.to_string()));
        }
        Ok(std::fs::read(&self.path)?)
    }
}

const ZIP_MAGIC: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

/// True if the file starts with a zip local header or an empty-archive marker
pub fn is_zip_archive(path: &Path) -> bool {
    let mut header = [0u8; 4];
    match std::fs::File::open(path).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => ZIP_MAGIC.iter().any(|magic| **magic == header),
        Err(_) => false,
    }
}

/// Pick a reader for an import source: zip file, directory, then plain file
pub fn reader_from_path(path: &Path) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    if path.is_file() && is_zip_archive(path) {
        return Ok(Box::new(ZipArchiveReader::open(path)?));
    }
    if path.is_dir() {
        return Ok(Box::new(DirectoryArchiveReader::new(path)));
    }
    if path.is_file() {
        return Ok(Box::new(SingleFileArchiveReader::new(path)));
    }
    Err(ArchiveError::Unsupported(path.to_path_buf()))
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_reader_selection() {
        let dir = TempDir::new().unwrap();

        let zip_path = dir.path().join("pack.osk");
        write_zip(&zip_path, &[("skin.ini", b"[General]")]);
        let reader = reader_from_path(&zip_path).unwrap();
        assert_eq!(reader.name(), "pack.osk");
        assert_eq!(reader.filenames(), vec!["skin.ini".to_string()]);

        let plain = dir.path().join("notes.txt");
        std::fs::write(&plain, b"just text").unwrap();
        let mut reader = reader_from_path(&plain).unwrap();
        assert_eq!(reader.filenames(), vec!["notes.txt".to_string()]);
        assert_eq!(reader.read("notes.txt").unwrap(), b"just text");

        let folder = dir.path().join("folder");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("a.png"), b"png").unwrap();
        let reader = reader_from_path(&folder).unwrap();
        assert_eq!(reader.name(), "folder");
        assert_eq!(reader.filenames(), vec!["a.png".to_string()]);

        assert!(matches!(
            reader_from_path(&dir.path().join("missing")),
            Err(ArchiveError::Unsupported(_))
        ));
    }

    #[test]
    fn test_single_file_rejects_other_names() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("a.txt");
        std::fs::write(&plain, b"a").unwrap();

        let mut reader = SingleFileArchiveReader::new(&plain);
        assert!(matches!(
            reader.read("b.txt"),
            Err(ArchiveError::EntryNotFound(_))
        ));
    }
}
