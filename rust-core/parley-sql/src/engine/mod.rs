// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The storage engine owned by the database worker.
//
// `MessageStore` keeps items, conversations, messages and sessions as JSON
// collections over one `KvBackend`. It lives only on the worker thread; the
// client reaches it exclusively through `Operation` dispatch.
//
// Opening requires the profile key. Its SHA-256 digest is stored on first
// open and compared on every later one, and a mismatch is reported the way
// an encrypted SQLite file reports a wrong key: "file is not a database".

pub mod error;
pub mod operation;
pub mod records;

use std::path::{Path, PathBuf};

use parley_storage::{Collection, InMemoryBackend, KvBackend, StorageError};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::BackendKind;
use crate::worker::Outbox;

pub use error::EngineError;
pub use operation::{Access, Operation};
pub use records::{ConversationRecord, ItemRecord, MessageRecord, SessionRecord};

const META: &str = "meta";
const ITEMS: &str = "items";
const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const SESSIONS: &str = "sessions";

const KEY_CHECK_ID: &str = "keyCheck";

/// Where a profile's store lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    config_dir: PathBuf,
}

impl StorageLocation {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// `{configDir}/sql`
    pub fn sql_dir(&self) -> PathBuf {
        self.config_dir.join("sql")
    }

    /// `{configDir}/sql/db.redb`
    pub fn database_file(&self) -> PathBuf {
        self.sql_dir().join("db.redb")
    }
}

fn key_digest(key: &str) -> String {
    Sha256::digest(key.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The message store served by the worker.
pub struct MessageStore {
    backend: Box<dyn KvBackend>,
    location: StorageLocation,
}

impl MessageStore {
    /// Open the store at `location` with `key`, creating it if needed.
    pub async fn open(
        location: &StorageLocation,
        key: &str,
        backend: BackendKind,
        log: &Outbox,
    ) -> Result<Self, EngineError> {
        if key.is_empty() {
            return Err(EngineError::MissingKey);
        }

        Self::open_with(open_backend(location, backend)?, location, key, log).await
    }

    /// Open over an already constructed backend.
    pub(crate) async fn open_with(
        backend: Box<dyn KvBackend>,
        location: &StorageLocation,
        key: &str,
        log: &Outbox,
    ) -> Result<Self, EngineError> {
        let store = Self {
            backend,
            location: location.clone(),
        };

        if let Err(err) = store.verify_key(key).await {
            log.error(format!("storage engine startup error: {err}"));
            if let Err(e) = store.backend.close().await {
                log.warn(format!("closing store after failed open: {e}"));
            }
            return Err(err);
        }

        // Touch a collection so a store that opens but cannot be read fails
        // here rather than on the first real call.
        let messages = store.messages().count().await?;
        log.info(format!(
            "opened {} store at {} ({messages} messages)",
            store.backend.name(),
            location.config_dir().display()
        ));
        Ok(store)
    }

    async fn verify_key(&self, key: &str) -> Result<(), EngineError> {
        let meta = Collection::new(self.backend.as_ref(), META);
        let digest = key_digest(key);
        match meta.get::<String>(KEY_CHECK_ID).await? {
            Some(stored) if stored == digest => Ok(()),
            Some(_) => Err(StorageError::NotADatabase(format!(
                "{}: key does not match",
                self.location.database_file().display()
            ))
            .into()),
            None => {
                meta.put(KEY_CHECK_ID, &digest).await?;
                Ok(())
            }
        }
    }

    pub async fn close(&self) -> Result<(), EngineError> {
        self.backend.close().await?;
        Ok(())
    }

    /// Delete everything persisted at `location`.
    pub fn remove(location: &StorageLocation, log: &Outbox) -> Result<(), EngineError> {
        log.warn("removeDB: removing all database files");
        #[cfg(feature = "redb-backend")]
        parley_storage::RedbBackend::destroy(location.database_file())?;
        match std::fs::remove_dir(location.sql_dir()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log.warn(format!(
                "removeDB: leaving {}: {e}",
                location.sql_dir().display()
            )),
        }
        Ok(())
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub(crate) fn items(&self) -> Collection<'_> {
        Collection::new(self.backend.as_ref(), ITEMS)
    }

    pub(crate) fn conversations(&self) -> Collection<'_> {
        Collection::new(self.backend.as_ref(), CONVERSATIONS)
    }

    pub(crate) fn messages(&self) -> Collection<'_> {
        Collection::new(self.backend.as_ref(), MESSAGES)
    }

    pub(crate) fn sessions(&self) -> Collection<'_> {
        Collection::new(self.backend.as_ref(), SESSIONS)
    }

    /// Messages in `conversation_id`, newest first, at most `limit`.
    pub async fn messages_in_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, EngineError> {
        let mut messages: Vec<MessageRecord> = self
            .messages()
            .all::<MessageRecord>()
            .await?
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        messages.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then_with(|| a.id.cmp(&b.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    pub async fn remove_sessions_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<u64, EngineError> {
        let sessions = self.sessions();
        let mut removed = 0;
        for session in sessions.all::<SessionRecord>().await? {
            if session.conversation_id == conversation_id && sessions.delete(&session.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Empty every collection except the key check.
    pub async fn remove_all(&self) -> Result<Value, EngineError> {
        for collection in [self.items(), self.conversations(), self.messages(), self.sessions()] {
            collection.clear().await?;
        }
        Ok(Value::Null)
    }
}

fn open_backend(
    location: &StorageLocation,
    backend: BackendKind,
) -> Result<Box<dyn KvBackend>, EngineError> {
    match backend {
        BackendKind::Memory => Ok(Box::new(InMemoryBackend::new())),
        #[cfg(feature = "redb-backend")]
        BackendKind::Redb => Ok(Box::new(parley_storage::RedbBackend::open(
            location.database_file(),
        )?)),
        #[cfg(not(feature = "redb-backend"))]
        BackendKind::Redb => {
            let _ = location;
            Err(EngineError::BackendUnavailable("redb"))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::sync::mpsc;

    /// An outbox whose frames are collected instead of sent anywhere.
    pub fn outbox() -> (Outbox, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox::new(tx), rx)
    }

    pub async fn memory_store() -> MessageStore {
        let (log, _rx) = outbox();
        MessageStore::open(
            &StorageLocation::new("/nonexistent/profile"),
            "test-key",
            BackendKind::Memory,
            &log,
        )
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_location_layout() {
        let location = StorageLocation::new("/home/u/.config/parley");
        assert_eq!(
            location.database_file(),
            PathBuf::from("/home/u/.config/parley/sql/db.redb")
        );
    }

    #[test]
    fn test_key_digest_is_hex_sha256() {
        let digest = key_digest("abcd");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(digest, key_digest("abce"));
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let (log, _rx) = outbox();
        let result = MessageStore::open(
            &StorageLocation::new("/p"),
            "",
            BackendKind::Memory,
            &log,
        )
        .await;
        assert!(matches!(result, Err(EngineError::MissingKey)));
    }

    #[tokio::test]
    async fn test_messages_in_conversation_newest_first() {
        let store = memory_store().await;
        let messages = store.messages();
        for (id, convo, sent_at) in [("m1", "c1", 10), ("m2", "c2", 20), ("m3", "c1", 30)] {
            let record = MessageRecord {
                id: id.to_string(),
                conversation_id: convo.to_string(),
                sent_at,
                extra: Default::default(),
            };
            messages.put(id, &record).await.unwrap();
        }

        let history = store.messages_in_conversation("c1", 10).await.unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m1"]);

        assert_eq!(store.messages_in_conversation("c1", 1).await.unwrap().len(), 1);
    }

    /// Memory backend whose `close` always fails.
    struct StuckBackend(InMemoryBackend);

    #[async_trait::async_trait]
    impl KvBackend for StuckBackend {
        async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            self.0.get(key).await
        }
        async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
            self.0.put(key, value).await
        }
        async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
            self.0.delete(key).await
        }
        async fn scan_prefix(
            &self,
            prefix: &[u8],
            limit: usize,
        ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
            self.0.scan_prefix(prefix, limit).await
        }
        async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StorageError> {
            self.0.delete_prefix(prefix).await
        }
        async fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StorageError> {
            self.0.batch_put(entries).await
        }
        async fn flush(&self) -> Result<(), StorageError> {
            self.0.flush().await
        }
        async fn close(&self) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("close is stuck".to_string()))
        }
        fn name(&self) -> &str {
            "stuck"
        }
    }

    #[tokio::test]
    async fn test_failed_close_after_key_mismatch_is_logged() {
        let inner = InMemoryBackend::new();
        Collection::new(&inner, META)
            .put(KEY_CHECK_ID, &key_digest("right"))
            .await
            .unwrap();

        let (log, mut rx) = outbox();
        let result = MessageStore::open_with(
            Box::new(StuckBackend(inner)),
            &StorageLocation::new("/p"),
            "wrong",
            &log,
        )
        .await;
        assert!(matches!(result, Err(EngineError::Storage(StorageError::NotADatabase(_)))));

        let mut warned = false;
        while let Ok(frame) = rx.try_recv() {
            if let crate::protocol::Response::LogRecord { level, args } =
                crate::protocol::decode(&frame).unwrap()
            {
                if level == crate::protocol::LogLevel::Warn {
                    warned |= crate::protocol::format_log_args(&args)
                        .contains("closing store after failed open: ");
                }
            }
        }
        assert!(warned, "close failure was not forwarded");
    }

    #[cfg(feature = "redb-backend")]
    #[tokio::test]
    async fn test_wrong_key_reads_as_not_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let location = StorageLocation::new(dir.path());
        let (log, _rx) = outbox();

        let store = MessageStore::open(&location, "right", BackendKind::Redb, &log)
            .await
            .unwrap();
        store.close().await.unwrap();
        drop(store);

        let err = match MessageStore::open(&location, "wrong", BackendKind::Redb, &log).await {
            Err(err) => err,
            Ok(_) => panic!("opened with the wrong key"),
        };
        assert!(crate::classify::is_corruption(&err.to_string()), "{err}");
    }
}
