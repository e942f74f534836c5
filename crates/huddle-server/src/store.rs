//! Async access to the synchronous [`Database`].
//!
//! SQLite calls block, so each one runs on the blocking pool while holding
//! a connection lock. Writes share one connection. Reads go to a small pool
//! of read-only connections on the same file when one is configured, so
//! listing and history requests do not queue behind writes. Consistency
//! between concurrent requests comes from the transactions inside the
//! store, not from these locks.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use huddle_store::Database;

use crate::error::ServerError;

#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Database>>,
    readers: Arc<[Arc<Mutex<Database>>]>,
    next_reader: Arc<AtomicUsize>,
}

impl Store {
    /// A store where reads and writes share the one connection.
    pub fn new(db: Database) -> Self {
        Self {
            writer: Arc::new(Mutex::new(db)),
            readers: Arc::from(Vec::new()),
            next_reader: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A store with `readers` extra read-only connections to the file at
    /// `path`, which must be the file `db` was opened from.
    pub fn with_readers(db: Database, path: &Path, readers: usize) -> huddle_store::Result<Self> {
        let pool = (0..readers)
            .map(|_| Database::open_read_only(path).map(|r| Arc::new(Mutex::new(r))))
            .collect::<huddle_store::Result<Vec<_>>>()?;
        Ok(Self {
            writer: Arc::new(Mutex::new(db)),
            readers: Arc::from(pool),
            next_reader: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Run `f` against the writer connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut Database) -> huddle_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        run(Arc::clone(&self.writer), f).await
    }

    /// Run a read-only `f` on the blocking pool, on a reader connection
    /// when there is one.
    pub async fn read<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut Database) -> huddle_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = if self.readers.is_empty() {
            Arc::clone(&self.writer)
        } else {
            let i = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
            Arc::clone(&self.readers[i])
        };
        run(db, f).await
    }
}

async fn run<F, T>(db: Arc<Mutex<Database>>, f: F) -> Result<T, ServerError>
where
    F: FnOnce(&mut Database) -> huddle_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = db
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".to_string()))?;
        f(&mut guard).map_err(ServerError::from)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("database task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::UserId;

    #[tokio::test]
    async fn reads_see_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.db");
        let store = Store::with_readers(Database::open_at(&path).unwrap(), &path, 2).unwrap();

        let user = UserId::new();
        store
            .call(move |db| db.upsert_user(user, Some("Ada"), None))
            .await
            .unwrap();

        for _ in 0..2 {
            let found = store.read(move |db| db.get_user(user)).await.unwrap();
            assert_eq!(found.display_name.as_deref(), Some("Ada"));
        }
    }

    #[tokio::test]
    async fn reader_connections_refuse_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.db");
        let store = Store::with_readers(Database::open_at(&path).unwrap(), &path, 1).unwrap();

        let user = UserId::new();
        let result = store
            .read(move |db| db.upsert_user(user, Some("Ada"), None))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn in_memory_store_reads_through_the_writer() {
        let store = Store::new(Database::open_in_memory().unwrap());

        let user = UserId::new();
        store
            .call(move |db| db.upsert_user(user, None, None))
            .await
            .unwrap();
        assert!(store.read(move |db| db.get_user(user)).await.is_ok());
    }
}
