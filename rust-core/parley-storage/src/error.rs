// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for Parley backends.
//
// The display strings of the integrity variants deliberately reuse the
// phrases SQLite-family engines emit, so that the client-side classifier can
// recognise them after they have been flattened to text on the wire.

use thiserror::Error;

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in the underlying storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize a stored record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The on-disk structures failed an integrity check.
    #[error("database disk image is malformed: {0}")]
    Corrupted(String),

    /// The file exists but is not a store we can read (wrong format or key).
    #[error("file is not a database: {0}")]
    NotADatabase(String),

    /// A write was attempted against storage opened without write access.
    #[error("attempt to write a readonly database: {0}")]
    Readonly(String),

    /// The backend has been closed and no longer accepts operations.
    #[error("backend closed: {0}")]
    Closed(String),

    /// The storage backend is not available (e.g. the file is locked).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
