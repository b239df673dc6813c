use crate::db::{self, Database, DbModel, DbModelFile};
use crate::events::{EventSink, ModelEvent};
use crate::file_store::FileHandle;
use crate::library::LibraryError;
use crate::model::{FileRecord, Importable};
use sqlx::SqliteConnection;
use std::marker::PhantomData;

/// Typed view over the `models` table for one family
#[derive(Debug, Clone)]
pub struct ModelStore<M> {
    database: Database,
    family: String,
    _model: PhantomData<fn() -> M>,
}

impl<M: Importable> ModelStore<M> {
    pub fn new(database: Database, family: &str) -> Self {
        ModelStore {
            database,
            family: family.to_string(),
            _model: PhantomData,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn to_row(&self, model: &M) -> Result<DbModel, LibraryError> {
        let mut row = DbModel::new(
            &self.family,
            &model.display_name(),
            model.hash().map(str::to_string),
            serde_json::to_string(model)?,
        );
        row.id = model.id();
        row.delete_pending = model.delete_pending();
        row.protected = model.protected();
        Ok(row)
    }

    fn from_row(&self, row: DbModel, files: Vec<DbModelFile>) -> Result<M, LibraryError> {
        let mut model: M = serde_json::from_str(&row.data)?;
        let info = model.info_mut();
        info.id = row.id;
        info.hash = row.hash;
        info.delete_pending = row.delete_pending;
        info.protected = row.protected;
        info.files = files
            .into_iter()
            .map(|f| FileRecord::new(f.filename, FileHandle::new(f.file_hash)))
            .collect();
        Ok(model)
    }

    fn file_rows(model_id: i64, model: &M) -> Vec<DbModelFile> {
        model
            .files()
            .iter()
            .enumerate()
            .map(|(position, file)| DbModelFile {
                model_id,
                position: position as i32,
                filename: file.filename.clone(),
                file_hash: file.handle.hash.clone(),
            })
            .collect()
    }

    /// Get a model by ID, including pending deletes
    pub async fn get(&self, model_id: i64) -> Result<Option<M>, LibraryError> {
        let Some(row) = self.database.get_model(model_id).await? else {
            return Ok(None);
        };
        if row.family != self.family {
            return Ok(None);
        }
        let files = self.database.get_model_files(model_id).await?;
        Ok(Some(self.from_row(row, files)?))
    }

    pub async fn get_in(
        &self,
        conn: &mut SqliteConnection,
        model_id: i64,
    ) -> Result<Option<M>, LibraryError> {
        let Some(row) = db::fetch_model(conn, model_id).await? else {
            return Ok(None);
        };
        if row.family != self.family {
            return Ok(None);
        }
        let files = db::fetch_model_files(conn, model_id).await?;
        Ok(Some(self.from_row(row, files)?))
    }

    /// All models of this family, optionally including pending deletes
    pub async fn all(&self, include_pending: bool) -> Result<Vec<M>, LibraryError> {
        let rows = self.database.get_models(&self.family, include_pending).await?;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.id else { continue };
            let files = self.database.get_model_files(id).await?;
            models.push(self.from_row(row, files)?);
        }
        Ok(models)
    }

    pub async fn all_in(
        &self,
        conn: &mut SqliteConnection,
        include_pending: bool,
    ) -> Result<Vec<M>, LibraryError> {
        let rows = db::fetch_models(conn, &self.family, include_pending).await?;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.id else { continue };
            let files = db::fetch_model_files(conn, id).await?;
            models.push(self.from_row(row, files)?);
        }
        Ok(models)
    }

    /// First row sharing `hash`, pending deletes included
    pub async fn find_by_hash_in(
        &self,
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> Result<Option<M>, LibraryError> {
        let rows = db::fetch_models_by_hash(conn, &self.family, hash).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let Some(id) = row.id else {
            return Ok(None);
        };
        let files = db::fetch_model_files(conn, id).await?;
        Ok(Some(self.from_row(row, files)?))
    }

    /// Insert a new row with its file records and raise `Updated`
    pub async fn add_in(
        &self,
        conn: &mut SqliteConnection,
        model: &mut M,
        events: &dyn EventSink<ModelEvent<M>>,
    ) -> Result<i64, LibraryError> {
        let row = self.to_row(model)?;
        let id = db::insert_model(conn, &row).await?;
        db::replace_model_files(conn, id, &Self::file_rows(id, model)).await?;

        model.info_mut().id = Some(id);
        events.raise(ModelEvent::Updated {
            id,
            model: model.clone(),
        });
        Ok(id)
    }

    /// Rewrite an existing row and its file records and raise `Updated`
    pub async fn update_in(
        &self,
        conn: &mut SqliteConnection,
        model: &M,
        events: &dyn EventSink<ModelEvent<M>>,
    ) -> Result<(), LibraryError> {
        let id = model.id().ok_or(LibraryError::NotPersisted)?;
        let row = self.to_row(model)?;
        if db::update_model(conn, id, &row).await? == 0 {
            return Err(LibraryError::ModelNotFound(id));
        }
        db::replace_model_files(conn, id, &Self::file_rows(id, model)).await?;

        events.raise(ModelEvent::Updated {
            id,
            model: model.clone(),
        });
        Ok(())
    }
}
