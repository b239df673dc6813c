use crate::file_store::FileStoreManager;
use crate::library::{LibraryError, LibraryManager};
use crate::model::{log_prefix, Importable};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Export service for packaging stored models back into archives
pub struct ExportService;

impl ExportService {
    /// Write a model's files into `{exports_dir}/{name}{extension}`
    ///
    /// The model is re-read from the library first; a model that no longer
    /// exists is an error. Returns the written path.
    pub async fn export_model<M: Importable>(
        model: &M,
        library: &LibraryManager<M>,
        exports_dir: &Path,
        extension: &str,
    ) -> Result<PathBuf, LibraryError> {
        let id = model.id().ok_or(LibraryError::NotPersisted)?;
        let stored = library
            .get(id)
            .await?
            .filter(|m| !m.delete_pending())
            .ok_or(LibraryError::ModelNotFound(id))?;

        let bytes = Self::build_archive(&stored, library.files()).await?;

        tokio::fs::create_dir_all(exports_dir).await?;
        let path = exports_dir.join(format!(
            "{}{}",
            valid_filename(&stored.display_name()),
            extension
        ));
        tokio::fs::write(&path, bytes).await?;

        info!(
            "{} Exported {} file(s) to {}",
            log_prefix(Some(&stored)),
            stored.files().len(),
            path.display()
        );
        Ok(path)
    }

    async fn build_archive<M: Importable>(
        model: &M,
        files: &FileStoreManager,
    ) -> Result<Vec<u8>, LibraryError> {
        // Read everything first; the zip writer is synchronous
        let mut contents = Vec::with_capacity(model.files().len());
        for file in model.files() {
            contents.push((file.filename.clone(), files.open_read(&file.handle).await?));
        }

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
            for (filename, data) in contents {
                zip.start_file(filename, options)?;
                zip.write_all(&data)?;
            }
            zip.finish()?;
        }
        Ok(cursor.into_inner())
    }
}

/// Replace characters that are invalid in filenames on common platforms
pub fn valid_filename(name: &str) -> String {
    const INVALID: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let cleaned: String = name
        .chars()
        .map(|c| {
            if INVALID.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.trim().is_empty() {
        "export".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_characters_are_replaced() {
        assert_eq!(valid_filename("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(valid_filename("plain name"), "plain name");
        assert_eq!(valid_filename("   "), "export");
    }
}
