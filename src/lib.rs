// Library exports for the CLI, integration tests and reusable components

pub mod archive;
pub mod config;
pub mod db;
pub mod download;
pub mod events;
pub mod families;
pub mod file_store;
pub mod import;
pub mod library;
pub mod model;

pub use model::{FileRecord, Importable, ModelInfo};
