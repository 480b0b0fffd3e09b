// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON record collections for Parley.
//
// A `Collection` is a namespace inside a `KvBackend`. Records are serialized
// as JSON and stored under `"{namespace}:{id}"`, so several collections share
// one physical backend without colliding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::KvBackend;
use crate::error::StorageError;

/// A namespaced view over a backend holding JSON records keyed by id.
///
/// Borrowing the backend keeps collections free to create per call.
#[derive(Clone, Copy)]
pub struct Collection<'a> {
    backend: &'a dyn KvBackend,
    namespace: &'a str,
}

impl<'a> Collection<'a> {
    /// View `backend` through `namespace`.
    pub fn new(backend: &'a dyn KvBackend, namespace: &'a str) -> Self {
        Self { backend, namespace }
    }

    /// The namespace prefix used by this collection.
    pub fn namespace(&self) -> &str {
        self.namespace
    }

    fn key(&self, id: &str) -> Vec<u8> {
        format!("{}:{}", self.namespace, id).into_bytes()
    }

    fn prefix(&self) -> Vec<u8> {
        format!("{}:", self.namespace).into_bytes()
    }

    /// Fetch and decode the record stored under `id`.
    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(&self.key(id)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
                StorageError::Serialization(format!(
                    "record '{}' in '{}' is unreadable: {err}",
                    id, self.namespace
                ))
            }),
            None => Ok(None),
        }
    }

    /// Encode and store `record` under `id`.
    pub async fn put<T: Serialize>(&self, id: &str, record: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.put(&self.key(id), &bytes).await
    }

    /// Store several records in one backend transaction.
    pub async fn put_many<T: Serialize>(&self, records: &[(String, T)]) -> Result<(), StorageError> {
        let mut entries = Vec::with_capacity(records.len());
        for (id, record) in records {
            entries.push((self.key(id), serde_json::to_vec(record)?));
        }
        self.backend.batch_put(&entries).await
    }

    /// Remove the record under `id`. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.backend.delete(&self.key(id)).await
    }

    /// Every record in the collection, in id order.
    pub async fn all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StorageError> {
        let raw = self.backend.scan_prefix(&self.prefix(), usize::MAX).await?;
        let mut records = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let record = serde_json::from_slice(&value).map_err(|err| {
                StorageError::Serialization(format!(
                    "record '{}' is unreadable: {err}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Number of records in the collection.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let raw = self.backend.scan_prefix(&self.prefix(), usize::MAX).await?;
        Ok(raw.len() as u64)
    }

    /// Remove every record in the collection.
    pub async fn clear(&self) -> Result<u64, StorageError> {
        self.backend.delete_prefix(&self.prefix()).await
    }
}

impl std::fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: String,
        value: u32,
    }

    fn item(id: &str, value: u32) -> Item {
        Item {
            id: id.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = InMemoryBackend::new();
        let items = Collection::new(&backend, "items");

        items.put("a", &item("a", 1)).await.unwrap();
        assert_eq!(items.get::<Item>("a").await.unwrap(), Some(item("a", 1)));
        assert_eq!(items.get::<Item>("missing").await.unwrap(), None);

        assert!(items.delete("a").await.unwrap());
        assert!(items.get::<Item>("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let backend = InMemoryBackend::new();
        let items = Collection::new(&backend, "items");
        let messages = Collection::new(&backend, "messages");

        items.put("x", &item("x", 1)).await.unwrap();
        messages.put("x", &item("x", 2)).await.unwrap();

        assert_eq!(items.get::<Item>("x").await.unwrap().unwrap().value, 1);
        assert_eq!(messages.count().await.unwrap(), 1);

        assert_eq!(items.clear().await.unwrap(), 1);
        assert_eq!(items.count().await.unwrap(), 0);
        assert_eq!(messages.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_many_and_all() {
        let backend = InMemoryBackend::new();
        let items = Collection::new(&backend, "items");

        items
            .put_many(&[("b".to_string(), item("b", 2)), ("a".to_string(), item("a", 1))])
            .await
            .unwrap();

        let all: Vec<Item> = items.all().await.unwrap();
        assert_eq!(all, vec![item("a", 1), item("b", 2)]);
    }

    #[tokio::test]
    async fn test_unreadable_record_is_serialization_error() {
        let backend = InMemoryBackend::new();
        backend.put(b"items:broken", b"not json").await.unwrap();
        let items = Collection::new(&backend, "items");

        match items.get::<Item>("broken").await.unwrap_err() {
            StorageError::Serialization(msg) => assert!(msg.contains("broken")),
            other => panic!("expected Serialization, got: {other:?}"),
        }
    }
}
