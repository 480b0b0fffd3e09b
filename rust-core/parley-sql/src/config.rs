// SPDX-License-Identifier: PMPL-1.0-or-later
//! Client configuration.
//!
//! Defaults:
//! - slow_call_threshold_ms: 40
//! - time_queries: false
//! - backend: redb

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable enabling per-call duration logging.
pub const TIME_QUERIES_ENV: &str = "PARLEY_TIME_QUERIES";

/// Environment variable overriding the slow-call threshold (milliseconds).
pub const SLOW_CALL_ENV: &str = "PARLEY_SLOW_CALL_MS";

/// Which key-value backend the worker opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-file redb store under `{configDir}/sql/`.
    Redb,
    /// Process memory; nothing survives the worker.
    Memory,
}

/// Configuration for [`crate::SqlClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Calls whose round trip exceeds this many milliseconds are logged.
    pub slow_call_threshold_ms: u64,
    /// Log the duration of every call, slow or not.
    pub time_queries: bool,
    /// Backend the worker opens on `init`.
    pub backend: BackendKind,
}

impl SqlConfig {
    /// Defaults, overridden by `PARLEY_TIME_QUERIES` and `PARLEY_SLOW_CALL_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(TIME_QUERIES_ENV) {
            config.time_queries = !value.is_empty() && value != "0";
        }
        if let Some(ms) = std::env::var(SLOW_CALL_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.slow_call_threshold_ms = ms;
        }
        config
    }

    /// The slow-call threshold as a `Duration`.
    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }

    /// Same configuration with the memory backend.
    pub fn in_memory(mut self) -> Self {
        self.backend = BackendKind::Memory;
        self
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            slow_call_threshold_ms: 40,
            time_queries: false,
            backend: BackendKind::Redb,
        }
    }
}
