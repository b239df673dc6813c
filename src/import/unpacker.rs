use crate::archive::ArchiveReader;
use crate::file_store::FileStoreManager;
use crate::import::types::ImportError;
use crate::model::FileRecord;
use tracing::{trace, warn};

/// Longest common character prefix of all names
fn common_prefix(names: &[String]) -> &str {
    let Some(first) = names.first() else {
        return "";
    };

    let mut end = first.len();
    for name in &names[1..] {
        end = first[..end]
            .char_indices()
            .zip(name.chars())
            .find(|((_, a), b)| a != b)
            .map(|((i, _), _)| i)
            .unwrap_or_else(|| end.min(name.len()));
    }
    &first[..end]
}

/// Canonical form of an archive member path
pub fn standardise_path(name: &str) -> String {
    name.replace('\\', "/")
}

/// Prefix to strip from every member: the common prefix, but only when it
/// ends at a directory boundary
pub fn strippable_prefix(names: &[String]) -> &str {
    let prefix = common_prefix(names);
    if prefix.ends_with('/') || prefix.ends_with('\\') {
        prefix
    } else {
        ""
    }
}

/// Copy every archive member into the file store
///
/// Records come back in archive order. If any member fails, everything
/// staged so far is dereferenced before the error is returned.
pub async fn stage_files(
    archive: &mut dyn ArchiveReader,
    files: &FileStoreManager,
) -> Result<Vec<FileRecord>, ImportError> {
    let names = archive.filenames();
    let prefix_len = strippable_prefix(&names).len();

    let mut staged: Vec<FileRecord> = Vec::with_capacity(names.len());
    for name in &names {
        let result = match archive.read(name) {
            Ok(data) => files.add(&data).await.map_err(ImportError::from),
            Err(e) => Err(ImportError::from(e)),
        };

        match result {
            Ok(handle) => {
                let filename = standardise_path(&name[prefix_len..]);
                trace!("Staged {} as {}", filename, handle.hash);
                staged.push(FileRecord::new(filename, handle));
            }
            Err(e) => {
                let handles: Vec<_> = staged.iter().map(|f| f.handle.clone()).collect();
                if let Err(cleanup) = files.dereference(&handles).await {
                    warn!("Could not release partially staged files: {}", cleanup);
                }
                return Err(e);
            }
        }
    }
    Ok(staged)
}
