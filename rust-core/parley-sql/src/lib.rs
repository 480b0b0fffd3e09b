// SPDX-License-Identifier: PMPL-1.0-or-later
//! Parley SQL
//!
//! Database access for the Parley messenger. The message store lives on a
//! dedicated worker thread; callers reach it through [`SqlClient`], which
//! correlates concurrent requests by sequence number, rebuilds worker errors,
//! broadcasts storage corruption once, and replays worker log records
//! through the logger handed to [`SqlClient::initialize`].

pub mod classify;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod signal;
pub mod stats;
pub mod worker;

pub use classify::{classify, is_corruption, is_readonly, SqliteErrorKind};
pub use client::{Lifecycle, SqlClient};
pub use config::{BackendKind, SqlConfig};
pub use engine::{Access, EngineError, MessageStore, Operation, StorageLocation};
pub use error::{RemoteError, SqlError};
pub use logger::{SqlLogger, TracingLogger};
pub use protocol::{LogLevel, Request, Response, WireError, WrappedRequest};
pub use signal::OneShot;
pub use stats::{MethodStats, QueryStats, QueryStatsOptions};
pub use worker::{SpawnWorker, ThreadWorker, WorkerChannels, WorkerSeed};
