// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core key-value backend trait for the Parley message store.

use async_trait::async_trait;

use crate::error::StorageError;

/// A key-value backend with ordered keys.
///
/// Keys and values are opaque bytes; [`crate::collection::Collection`] layers
/// JSON records and namespaces on top. Ordering matters: prefix scans must
/// return keys in lexicographic order.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Retrieve the value stored under `key`, or `Ok(None)` when absent.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// Return up to `limit` (key, value) pairs whose key starts with
    /// `prefix`, in key order.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Remove every key starting with `prefix`, returning how many went.
    async fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, StorageError>;

    /// Write all entries in one transaction: all land or none do.
    async fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StorageError>;

    /// Make every acknowledged write durable.
    async fn flush(&self) -> Result<(), StorageError>;

    /// Release the backend. Operations after `close` fail with
    /// [`StorageError::Closed`].
    async fn close(&self) -> Result<(), StorageError> {
        self.flush().await
    }

    /// Short backend name for logs.
    fn name(&self) -> &str;
}
