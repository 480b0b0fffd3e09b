// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Worker-side error type. Never crosses the boundary as a value: it is
// flattened into a `WireError` and rebuilt on the client as a `RemoteError`.

use std::error::Error as _;

use parley_storage::StorageError;
use thiserror::Error;

use crate::protocol::WireError;

/// Errors raised while the worker serves a request.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid arguments for {method}: {reason}")]
    InvalidArguments { method: &'static str, reason: String },

    #[error("storage engine is not open")]
    NotOpen,

    #[error("storage engine is already open")]
    AlreadyOpen,

    #[error("initialize: configDir is required")]
    MissingConfigDir,

    #[error("initialize: key is required")]
    MissingKey,

    #[error("removeDB: cannot erase storage without a location; initialize first")]
    LocationUnknown,

    #[error("{0} not found")]
    NotFound(String),

    #[error("backend '{0}' is not compiled into this build")]
    BackendUnavailable(&'static str),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("operation {0} panicked")]
    Panicked(String),
}

impl EngineError {
    /// Stable type name sent as `WireError::name`.
    pub fn name(&self) -> &'static str {
        match self {
            EngineError::Storage(_) => "Storage",
            EngineError::InvalidMethod(_) => "InvalidMethod",
            EngineError::InvalidArguments { .. } => "InvalidArguments",
            EngineError::NotOpen => "NotOpen",
            EngineError::AlreadyOpen => "AlreadyOpen",
            EngineError::MissingConfigDir => "MissingConfigDir",
            EngineError::MissingKey => "MissingKey",
            EngineError::LocationUnknown => "LocationUnknown",
            EngineError::NotFound(_) => "NotFound",
            EngineError::BackendUnavailable(_) => "BackendUnavailable",
            EngineError::MalformedRequest(_) => "MalformedRequest",
            EngineError::Panicked(_) => "Panicked",
        }
    }
}

impl From<&EngineError> for WireError {
    fn from(err: &EngineError) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        WireError {
            name: err.name().to_string(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| {
                std::iter::once(format!("{}: {err}", err.name()))
                    .chain(causes.into_iter().map(|c| format!("caused by: {c}")))
                    .collect::<Vec<_>>()
                    .join("\n    ")
            }),
        }
    }
}
