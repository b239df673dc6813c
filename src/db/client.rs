use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::db::models::*;
use crate::db::transaction::WriteTransaction;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Models of every family; family-specific fields live in `data`
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                family TEXT NOT NULL,
                hash TEXT,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                delete_pending BOOLEAN NOT NULL DEFAULT FALSE,
                protected BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                filename TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                FOREIGN KEY (model_id) REFERENCES models (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_models_family_hash ON models (family, hash)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_model_files_model ON model_files (model_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Open the write transaction for this database
    ///
    /// Only one write transaction exists at a time. Callers on other tasks
    /// wait for it; a nested call from the thread that already holds it gets
    /// a non-leader handle instead of deadlocking.
    pub async fn begin_write(&self) -> Result<WriteTransaction, sqlx::Error> {
        WriteTransaction::begin(&self.pool, self.write_gate.clone()).await
    }

    /// Get a model row by ID
    pub async fn get_model(&self, model_id: i64) -> Result<Option<DbModel>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_model(&mut conn, model_id).await
    }

    /// Get file records for a model, in position order
    pub async fn get_model_files(&self, model_id: i64) -> Result<Vec<DbModelFile>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_model_files(&mut conn, model_id).await
    }

    /// Content hashes listed by any stored row, pending deletes included
    pub async fn get_referenced_file_hashes(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT DISTINCT file_hash FROM model_files")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("file_hash")).collect())
    }

    /// Get all rows of a family
    pub async fn get_models(
        &self,
        family: &str,
        include_pending: bool,
    ) -> Result<Vec<DbModel>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_models(&mut conn, family, include_pending).await
    }
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.get(column);
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn model_from_row(row: &SqliteRow) -> Result<DbModel, sqlx::Error> {
    Ok(DbModel {
        id: Some(row.get("id")),
        family: row.get("family"),
        hash: row.get("hash"),
        name: row.get("name"),
        data: row.get("data"),
        delete_pending: row.get("delete_pending"),
        protected: row.get("protected"),
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

pub(crate) async fn fetch_model(
    conn: &mut SqliteConnection,
    model_id: i64,
) -> Result<Option<DbModel>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, family, hash, name, data, delete_pending, protected, created_at, updated_at
        FROM models WHERE id = ?
        "#,
    )
    .bind(model_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(model_from_row).transpose()
}

pub(crate) async fn fetch_model_files(
    conn: &mut SqliteConnection,
    model_id: i64,
) -> Result<Vec<DbModelFile>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT model_id, position, filename, file_hash
        FROM model_files WHERE model_id = ?
        ORDER BY position
        "#,
    )
    .bind(model_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DbModelFile {
            model_id: row.get("model_id"),
            position: row.get("position"),
            filename: row.get("filename"),
            file_hash: row.get("file_hash"),
        })
        .collect())
}

pub(crate) async fn fetch_models_by_hash(
    conn: &mut SqliteConnection,
    family: &str,
    hash: &str,
) -> Result<Vec<DbModel>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, family, hash, name, data, delete_pending, protected, created_at, updated_at
        FROM models WHERE family = ? AND hash = ?
        ORDER BY id
        "#,
    )
    .bind(family)
    .bind(hash)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(model_from_row).collect()
}

pub(crate) async fn fetch_models(
    conn: &mut SqliteConnection,
    family: &str,
    include_pending: bool,
) -> Result<Vec<DbModel>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, family, hash, name, data, delete_pending, protected, created_at, updated_at
        FROM models WHERE family = ? AND (? OR delete_pending = FALSE)
        ORDER BY id
        "#,
    )
    .bind(family)
    .bind(include_pending)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(model_from_row).collect()
}

pub(crate) async fn insert_model(
    conn: &mut SqliteConnection,
    model: &DbModel,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO models (
            family, hash, name, data, delete_pending, protected, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&model.family)
    .bind(&model.hash)
    .bind(&model.name)
    .bind(&model.data)
    .bind(model.delete_pending)
    .bind(model.protected)
    .bind(model.created_at.to_rfc3339())
    .bind(model.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(crate) async fn update_model(
    conn: &mut SqliteConnection,
    model_id: i64,
    model: &DbModel,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE models
        SET hash = ?, name = ?, data = ?, delete_pending = ?, protected = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&model.hash)
    .bind(&model.name)
    .bind(&model.data)
    .bind(model.delete_pending)
    .bind(model.protected)
    .bind(Utc::now().to_rfc3339())
    .bind(model_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub(crate) async fn replace_model_files(
    conn: &mut SqliteConnection,
    model_id: i64,
    files: &[DbModelFile],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM model_files WHERE model_id = ?")
        .bind(model_id)
        .execute(&mut *conn)
        .await?;

    for file in files {
        sqlx::query(
            r#"
            INSERT INTO model_files (model_id, position, filename, file_hash)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(file.position)
        .bind(&file.filename)
        .bind(&file.file_hash)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn set_delete_pending(
    conn: &mut SqliteConnection,
    model_id: i64,
    pending: bool,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE models SET delete_pending = ?, updated_at = ? WHERE id = ?")
        .bind(pending)
        .bind(Utc::now().to_rfc3339())
        .bind(model_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn clear_model_hash(
    conn: &mut SqliteConnection,
    model_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE models SET hash = NULL, updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(model_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn delete_model(
    conn: &mut SqliteConnection,
    model_id: i64,
) -> Result<u64, sqlx::Error> {
    // model_files rows go with it (ON DELETE CASCADE)
    let result = sqlx::query("DELETE FROM models WHERE id = ?")
        .bind(model_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
