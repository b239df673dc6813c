mod export;
mod manager;
mod store;

pub use export::{valid_filename, ExportService};
pub use manager::{FileChanges, LibraryError, LibraryManager};
pub use store::ModelStore;
