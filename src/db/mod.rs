mod client;
mod models;
mod transaction;

pub use client::Database;
pub use models::*;
pub use transaction::{mark_exclusive_thread, WriteTransaction};

pub(crate) use client::{
    clear_model_hash, delete_model, fetch_model, fetch_model_files, fetch_models,
    fetch_models_by_hash, insert_model, replace_model_files, set_delete_pending, update_model,
};
