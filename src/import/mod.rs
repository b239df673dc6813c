// # Import Module
//
// Archive import pipeline, written once against `Importable`:
//
// - **Unpacker**: Stages archive members into the file store
// - **Hasher**: Derives the identity hash from significant files
// - **Duplicates**: Finds stored models with the same hash and decides reuse
// - **ImportManager**: Runs the transactional import and file editing
// - **ImportScheduler**: Worker pool that serializes imports
//
// Public API:
// - `ImportManager`: Import paths, archives and bare models
// - `ModelFamily`: Per-family hooks (factory, populate, reuse policy)
// - `ProgressNotification` / `ImportProgressHandle`: Progress and cancellation
// - `ImportError`: Failure taxonomy

mod cancel;
pub mod duplicates;
mod family;
pub mod hasher;
mod manager;
mod progress;
mod scheduler;
mod types;
pub mod unpacker;

pub use cancel::CancellationToken;
pub use family::ModelFamily;
pub use manager::ImportManager;
pub use progress::{
    ImportProgress, ImportProgressHandle, NotificationSnapshot, NotificationState,
    ProgressNotification,
};
pub use scheduler::ImportScheduler;
pub use types::ImportError;
