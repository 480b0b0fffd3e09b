// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory backend for Parley.
//
// A `BTreeMap` behind a tokio `RwLock`. The ordering gives prefix scans for
// free. Used by tests and by profiles configured with `BackendKind::Memory`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::KvBackend;
use crate::error::StorageError;

/// An in-memory backend backed by a sorted map.
///
/// Clones share the same map. Data is lost when the last clone drops.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Create a new, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// True if the map holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed("in-memory backend".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.ensure_open()?;
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.data.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        self.ensure_open()?;
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.ensure_open()?;
        let map = self.data.read().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StorageError> {
        self.ensure_open()?;
        let mut map = self.data.write().await;
        let doomed: Vec<Vec<u8>> = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            map.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut map = self.data.write().await;
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
