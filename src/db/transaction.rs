use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::cell::Cell;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

thread_local! {
    /// Set on threads that run one task to completion at a time
    static EXCLUSIVE_THREAD: Cell<bool> = const { Cell::new(false) };
    /// Set while such a thread holds the write transaction
    static WRITE_HELD: Cell<bool> = const { Cell::new(false) };
}

/// Declare that the current thread drives a single task at a time.
///
/// Import workers call this on startup. Write ownership is then tracked per
/// thread, which lets a re-entrant `begin_write` be detected instead of
/// waiting on itself forever.
pub fn mark_exclusive_thread() {
    EXCLUSIVE_THREAD.with(|t| t.set(true));
}

fn write_held_here() -> bool {
    EXCLUSIVE_THREAD.with(|t| t.get()) && WRITE_HELD.with(|h| h.get())
}

/// Handle to the database write transaction
///
/// Commits on [`finish`](Self::finish) unless an error was recorded. Dropping
/// the handle without finishing rolls back.
pub struct WriteTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
    _gate: Option<OwnedMutexGuard<()>>,
    leader: bool,
    tracked: bool,
    errors: Vec<String>,
}

impl WriteTransaction {
    pub(crate) async fn begin(
        pool: &SqlitePool,
        gate: Arc<Mutex<()>>,
    ) -> Result<Self, sqlx::Error> {
        if write_held_here() {
            warn!("Write transaction requested while this thread already holds one");
            return Ok(WriteTransaction {
                tx: None,
                _gate: None,
                leader: false,
                tracked: false,
                errors: Vec::new(),
            });
        }

        let guard = gate.lock_owned().await;
        let tx = pool.begin().await?;

        let tracked = EXCLUSIVE_THREAD.with(|t| t.get());
        if tracked {
            WRITE_HELD.with(|h| h.set(true));
        }

        debug!("Write transaction opened");
        Ok(WriteTransaction {
            tx: Some(tx),
            _gate: Some(guard),
            leader: true,
            tracked,
            errors: Vec::new(),
        })
    }

    /// Whether this handle owns the transaction and may commit it
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Mark the transaction as failed; `finish` will roll back
    pub fn record_error(&mut self, error: impl Display) {
        self.errors.push(error.to_string());
    }

    pub fn conn(&mut self) -> Result<&mut SqliteConnection, sqlx::Error> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(sqlx::Error::Protocol(
                "write transaction is not held by this handle".to_string(),
            )),
        }
    }

    /// Commit, or roll back if any error was recorded. Returns whether it committed.
    pub async fn finish(mut self) -> Result<bool, sqlx::Error> {
        let Some(tx) = self.tx.take() else {
            return Ok(false);
        };

        if self.errors.is_empty() {
            tx.commit().await?;
            debug!("Write transaction committed");
            Ok(true)
        } else {
            debug!(
                "Write transaction rolled back after {} error(s): {}",
                self.errors.len(),
                self.errors.join("; ")
            );
            tx.rollback().await?;
            Ok(false)
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.tracked {
            WRITE_HELD.with(|h| h.set(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use tempfile::TempDir;

    #[test]
    fn test_nested_write_on_exclusive_thread_is_not_leader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                super::mark_exclusive_thread();
                runtime.block_on(async {
                    let db = Database::new(path.to_str().unwrap()).await.unwrap();

                    let outer = db.begin_write().await.unwrap();
                    assert!(outer.is_leader());

                    let mut inner = db.begin_write().await.unwrap();
                    assert!(!inner.is_leader());
                    assert!(inner.conn().is_err());
                    assert!(!inner.finish().await.unwrap());

                    outer.finish().await.unwrap();

                    // Released: the next request leads again
                    let again = db.begin_write().await.unwrap();
                    assert!(again.is_leader());
                });
            });
        });
    }
}
