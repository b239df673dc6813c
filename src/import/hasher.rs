use crate::file_store::{FileStoreError, FileStoreManager};
use crate::model::{FileRecord, Importable};
use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes, lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Files whose names end in one of `extensions` (ASCII case-insensitive),
/// ordered by filename
pub fn hashable_files<'a>(files: &'a [FileRecord], extensions: &[&str]) -> Vec<&'a FileRecord> {
    let mut selected: Vec<&FileRecord> = files
        .iter()
        .filter(|f| {
            let name = f.filename.to_ascii_lowercase();
            extensions
                .iter()
                .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
        })
        .collect();
    selected.sort_by(|a, b| a.filename.cmp(&b.filename));
    selected
}

/// Identity hash of a model
///
/// Concatenates the contents of the hashable files in filename order and
/// digests them. With no hashable content, falls back to the archive name,
/// then to the hash the model already carries.
pub async fn compute_hash<M: Importable>(
    model: &M,
    archive_name: Option<&str>,
    extensions: &[&str],
    files: &FileStoreManager,
) -> Result<Option<String>, FileStoreError> {
    let mut hasher = Sha256::new();
    let mut hashed_bytes = 0usize;

    for file in hashable_files(model.files(), extensions) {
        let data = files.open_read(&file.handle).await?;
        hashed_bytes += data.len();
        hasher.update(&data);
    }

    if hashed_bytes > 0 {
        return Ok(Some(format!("{:x}", hasher.finalize())));
    }

    if let Some(name) = archive_name {
        return Ok(Some(sha256_hex(name.as_bytes())));
    }

    Ok(model.hash().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::FileHandle;

    fn record(name: &str) -> FileRecord {
        FileRecord::new(name, FileHandle::new(format!("h-{}", name)))
    }

    #[test]
    fn test_selection_is_case_insensitive_and_ordinal() {
        let files = vec![
            record("b.INI"),
            record("image.png"),
            record("B.ini"),
            record("a.ini"),
        ];

        let names: Vec<&str> = hashable_files(&files, &[".ini"])
            .into_iter()
            .map(|f| f.filename.as_str())
            .collect();

        // Ordinal: uppercase sorts before lowercase
        assert_eq!(names, vec!["B.ini", "a.ini", "b.INI"]);
    }

    #[test]
    fn test_no_extensions_selects_nothing() {
        let files = vec![record("skin.ini")];
        assert!(hashable_files(&files, &[]).is_empty());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
