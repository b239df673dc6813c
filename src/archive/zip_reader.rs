use super::{file_name_of, ArchiveError, ArchiveReader};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// Reads members of a zip file
pub struct ZipArchiveReader {
    archive: ZipArchive<File>,
    name: String,
    /// Member names in central directory order, directories excluded
    members: Vec<String>,
}

impl ZipArchiveReader {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut members = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if !entry.is_dir() {
                members.push(entry.name().to_string());
            }
        }

        Ok(ZipArchiveReader {
            archive,
            name: file_name_of(path),
            members,
        })
    }
}

impl ArchiveReader for ZipArchiveReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn filenames(&self) -> Vec<String> {
        self.members.clone()
    }

    fn read(&mut self, filename: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry = match self.archive.by_name(filename) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ArchiveError::EntryNotFound(filename.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}
