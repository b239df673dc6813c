use super::{file_name_of, ArchiveError, ArchiveReader};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Presents a directory tree as an archive; members are paths relative to the root
pub struct DirectoryArchiveReader {
    root: PathBuf,
    name: String,
}

impl DirectoryArchiveReader {
    pub fn new(root: &Path) -> Self {
        DirectoryArchiveReader {
            root: root.to_path_buf(),
            name: file_name_of(root),
        }
    }
}

impl ArchiveReader for DirectoryArchiveReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        names
    }

    fn read(&mut self, filename: &str) -> Result<Vec<u8>, ArchiveError> {
        // Members stay below the root
        let escapes = Path::new(filename)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        let path = self.root.join(filename);
        if escapes || !path.is_file() {
            return Err(ArchiveError::EntryNotFound(filename.to_string()));
        }
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_nested_files_are_listed_relative_to_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("My Skin");
        std::fs::create_dir_all(root.join("sounds")).unwrap();
        std::fs::write(root.join("skin.ini"), b"ini").unwrap();
        std::fs::write(root.join("sounds").join("hit.wav"), b"wav").unwrap();

        let mut reader = DirectoryArchiveReader::new(&root);
        assert_eq!(reader.name(), "My Skin");

        let names = reader.filenames();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"skin.ini".to_string()));
        let nested = names
            .iter()
            .find(|n| n.ends_with("hit.wav"))
            .cloned()
            .unwrap();
        assert_eq!(reader.read(&nested).unwrap(), b"wav");
    }

    #[test]
    fn test_members_outside_root_are_not_readable() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("skin");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        let mut reader = DirectoryArchiveReader::new(&root);
        assert!(matches!(
            reader.read("../secret.txt"),
            Err(ArchiveError::EntryNotFound(_))
        ));
        let absolute = dir.path().join("secret.txt");
        assert!(reader.read(&absolute.to_string_lossy()).is_err());
    }
}
