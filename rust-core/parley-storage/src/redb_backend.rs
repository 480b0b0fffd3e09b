// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// redb-backed persistent backend for Parley.
//
// One redb file per profile, holding a single table. Every operation runs on
// the blocking pool so the database worker's runtime keeps serving other
// requests while redb does I/O.
//
// redb errors are folded into `StorageError` so that integrity failures keep
// their engine-level phrasing (`Corrupted`, `NotADatabase`) after crossing
// the worker boundary as text.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::backend::KvBackend;
use crate::error::StorageError;

const MAIN_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("main");

/// A persistent backend over a single redb file.
pub struct RedbBackend {
    /// `None` once closed.
    db: Mutex<Option<Arc<Database>>>,
    path: PathBuf,
}

impl RedbBackend {
    /// Open or create the redb file at `path`, creating parent directories.
    ///
    /// A file that exists but cannot be read as redb yields
    /// [`StorageError::NotADatabase`]; a permission failure yields
    /// [`StorageError::Readonly`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(|e| open_error(&path, e))?;
        debug!(path = %path.display(), "opened redb backend");

        Ok(Self {
            db: Mutex::new(Some(Arc::new(db))),
            path,
        })
    }

    /// Delete the redb file at `path`. Missing files are not an error.
    pub fn destroy(path: impl AsRef<Path>) -> Result<bool, StorageError> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed redb file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self) -> Result<Arc<Database>, StorageError> {
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StorageError::Closed(self.path.display().to_string()))
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = self.handle()?;
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Unavailable(format!("task join: {e}")))?
    }
}

fn open_error(path: &Path, err: redb::DatabaseError) -> StorageError {
    match err {
        redb::DatabaseError::DatabaseAlreadyOpen => {
            StorageError::Unavailable(format!("{} is already open", path.display()))
        }
        redb::DatabaseError::Storage(redb::StorageError::Io(io))
            if io.kind() == ErrorKind::PermissionDenied =>
        {
            StorageError::Readonly(format!("{}: {io}", path.display()))
        }
        other => StorageError::NotADatabase(format!("{}: {other}", path.display())),
    }
}

fn engine_error(context: &str, err: impl Into<redb::Error>) -> StorageError {
    match err.into() {
        redb::Error::Corrupted(msg) => StorageError::Corrupted(format!("{context}: {msg}")),
        redb::Error::Io(io) if io.kind() == ErrorKind::PermissionDenied => {
            StorageError::Readonly(format!("{context}: {io}"))
        }
        redb::Error::Io(io) => StorageError::Io(io),
        other => StorageError::Unavailable(format!("{context}: {other}")),
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl KvBackend for RedbBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(|e| engine_error("read txn", e))?;
            let table = match txn.open_table(MAIN_TABLE) {
                Ok(t) => t,
                // Nothing has been written yet.
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(engine_error("open table", e)),
            };
            let value = table
                .get(key.as_slice())
                .map_err(|e| engine_error("get", e))?;
            Ok(value.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let entry = vec![(key.to_vec(), value.to_vec())];
        self.batch_put(&entry).await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| engine_error("write txn", e))?;
            let existed = {
                let mut table = txn
                    .open_table(MAIN_TABLE)
                    .map_err(|e| engine_error("open table", e))?;
                let removed = table
                    .remove(key.as_slice())
                    .map_err(|e| engine_error("remove", e))?;
                removed.is_some()
            };
            txn.commit().map_err(|e| engine_error("commit", e))?;
            Ok(existed)
        })
        .await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let prefix = prefix.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(|e| engine_error("read txn", e))?;
            let table = match txn.open_table(MAIN_TABLE) {
                Ok(t) => t,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(engine_error("open table", e)),
            };

            let mut results = Vec::new();
            let iter = table
                .range(prefix.as_slice()..)
                .map_err(|e| engine_error("range scan", e))?;
            for entry in iter {
                if results.len() >= limit {
                    break;
                }
                let (k, v) = entry.map_err(|e| engine_error("scan entry", e))?;
                let k = k.value().to_vec();
                if !k.starts_with(&prefix) {
                    break;
                }
                results.push((k, v.value().to_vec()));
            }
            Ok(results)
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StorageError> {
        let prefix = prefix.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| engine_error("write txn", e))?;
            let removed = {
                let mut table = txn
                    .open_table(MAIN_TABLE)
                    .map_err(|e| engine_error("open table", e))?;
                let mut doomed = Vec::new();
                for entry in table
                    .range(prefix.as_slice()..)
                    .map_err(|e| engine_error("range scan", e))?
                {
                    let (k, _) = entry.map_err(|e| engine_error("scan entry", e))?;
                    let k = k.value().to_vec();
                    if !k.starts_with(&prefix) {
                        break;
                    }
                    doomed.push(k);
                }
                for key in &doomed {
                    table
                        .remove(key.as_slice())
                        .map_err(|e| engine_error("remove", e))?;
                }
                doomed.len() as u64
            };
            txn.commit().map_err(|e| engine_error("commit", e))?;
            Ok(removed)
        })
        .await
    }

    async fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StorageError> {
        let owned = entries.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| engine_error("write txn", e))?;
            {
                let mut table = txn
                    .open_table(MAIN_TABLE)
                    .map_err(|e| engine_error("open table", e))?;
                for (k, v) in &owned {
                    table
                        .insert(k.as_slice(), v.as_slice())
                        .map_err(|e| engine_error("insert", e))?;
                }
            }
            txn.commit().map_err(|e| engine_error("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        // Commits are durable; this only reports whether we are still open.
        self.handle().map(|_| ())
    }

    async fn close(&self) -> Result<(), StorageError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner).take();
        if db.is_none() {
            warn!(path = %self.path.display(), "redb backend closed twice");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_backend() -> (RedbBackend, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("sql").join("db.redb")).unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let (backend, _dir) = temp_backend();

        assert_eq!(backend.get(b"messages:m1").await.unwrap(), None);

        backend.put(b"messages:m1", b"{\"body\":\"hi\"}").await.unwrap();
        assert_eq!(backend.get(b"messages:m1").await.unwrap(), Some(b"{\"body\":\"hi\"}".to_vec()));

        assert!(backend.delete(b"messages:m1").await.unwrap());
        assert!(!backend.delete(b"messages:m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_and_delete_prefix() {
        let (backend, _dir) = temp_backend();
        backend.put(b"msg:1", b"a").await.unwrap();
        backend.put(b"msg:2", b"b").await.unwrap();
        backend.put(b"item:1", b"c").await.unwrap();

        let msgs = backend.scan_prefix(b"msg:", 10).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(backend.scan_prefix(b"msg:", 1).await.unwrap().len(), 1);

        assert_eq!(backend.delete_prefix(b"msg:").await.unwrap(), 2);
        assert!(backend.scan_prefix(b"msg:", 10).await.unwrap().is_empty());
        assert_eq!(backend.get(b"item:1").await.unwrap(), Some(b"c".to_vec()));
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put(b"k", b"v").await.unwrap();
            backend.close().await.unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_operations() {
        let (backend, _dir) = temp_backend();
        backend.close().await.unwrap();
        assert!(matches!(
            backend.get(b"k").await.unwrap_err(),
            StorageError::Closed(_)
        ));
    }

    #[test]
    fn test_garbage_file_is_not_a_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.redb");
        std::fs::write(&path, vec![0xAB; 8192]).unwrap();

        let err = RedbBackend::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::NotADatabase(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_destroy_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doomed.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put(b"k", b"v").await.unwrap();
            backend.close().await.unwrap();
        }

        assert!(RedbBackend::destroy(&path).unwrap());
        assert!(!path.exists());
        assert!(!RedbBackend::destroy(&path).unwrap());
    }
}
