use crate::library::{LibraryError, ModelStore};
use crate::model::{FileRecord, Importable};
use sqlx::SqliteConnection;

/// Existing row with the candidate's hash, pending deletes included.
/// A candidate without a hash never has a duplicate.
pub async fn find_existing<M: Importable>(
    store: &ModelStore<M>,
    conn: &mut SqliteConnection,
    candidate: &M,
) -> Result<Option<M>, LibraryError> {
    match candidate.hash() {
        Some(hash) => store.find_by_hash_in(conn, hash).await,
        None => Ok(None),
    }
}

fn sorted_by_filename(files: &[FileRecord]) -> Vec<&FileRecord> {
    let mut sorted: Vec<&FileRecord> = files.iter().collect();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));
    sorted
}

/// Same file contents under the same filenames, compared in filename order
pub fn files_match<M: Importable>(existing: &M, candidate: &M) -> bool {
    let existing = sorted_by_filename(existing.files());
    let candidate = sorted_by_filename(candidate.files());

    existing.len() == candidate.len()
        && existing
            .iter()
            .zip(candidate.iter())
            .all(|(a, b)| a.handle == b.handle && a.filename == b.filename)
}
