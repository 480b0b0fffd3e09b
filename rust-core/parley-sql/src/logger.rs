// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! The logger handed to [`crate::SqlClient::initialize`].
//!
//! Worker log records, slow-call lines and query statistics are all written
//! through this handle rather than a global, so the embedding application
//! decides where database logging ends up.

use crate::protocol::LogLevel;

/// Sink for caller-visible database log lines.
pub trait SqlLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Writes every line as a `tracing` event under the `parley_sql` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl SqlLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Fatal => tracing::error!(target: "parley_sql", fatal = true, "{message}"),
            LogLevel::Error => tracing::error!(target: "parley_sql", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "parley_sql", "{message}"),
            LogLevel::Info => tracing::info!(target: "parley_sql", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "parley_sql", "{message}"),
            LogLevel::Trace => tracing::trace!(target: "parley_sql", "{message}"),
        }
    }
}
