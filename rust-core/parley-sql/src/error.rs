// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Errors surfaced to callers of [`crate::SqlClient`].

use std::fmt;

use thiserror::Error;

use crate::classify::{classify, SqliteErrorKind};
use crate::protocol::WireError;

/// Errors returned by the database client.
///
/// `Clone` so that one failure (a dead worker, a protocol fault) can be
/// handed to every caller it affects.
#[derive(Debug, Clone, Error)]
pub enum SqlError {
    /// `initialize` was already called on this client.
    #[error("already initialized")]
    AlreadyInitialized,

    /// The client has not been initialized.
    #[error("not initialized")]
    NotInitialized,

    /// Initialization ran and failed; the client is unusable for calls.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// The client is closing or closed.
    #[error("already closed")]
    AlreadyClosed,

    /// `pause_write_access` while already paused.
    #[error("write access is already paused")]
    AlreadyPaused,

    /// `resume_write_access` while not paused.
    #[error("write access is not paused")]
    NotPaused,

    /// The worker thread could not be started.
    #[error("failed to spawn database worker: {0}")]
    Spawn(String),

    /// The worker exited with this request still outstanding.
    #[error("database worker terminated")]
    WorkerTerminated,

    /// The worker broke the protocol. The client is poisoned afterwards.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The storage engine reported an error for this request.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SqlError {
    /// The rebuilt worker error, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SqlError::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

/// An error raised inside the worker, rebuilt on the client side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// The request that failed, e.g. `call(getItemById)`.
    pub context: String,
    /// Worker-side error type name.
    pub name: String,
    /// Worker-side description.
    pub message: String,
    /// Worker-side cause chain, prefixed with `context`.
    pub stack: Option<String>,
    /// How the description classified.
    pub kind: SqliteErrorKind,
}

impl RemoteError {
    /// Rebuild a wire error for the request labelled `context`.
    pub fn from_wire(context: &str, wire: WireError) -> Self {
        let kind = classify(&wire.message);
        Self {
            context: context.to_string(),
            stack: wire.stack.map(|stack| format!("{context}: {stack}")),
            name: wire.name,
            message: wire.message,
            kind,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.kind == SqliteErrorKind::Corrupted
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

impl std::error::Error for RemoteError {}
