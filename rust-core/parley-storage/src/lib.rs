// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Parley Storage Backends
//
// Key-value storage underneath the Parley message store. The database worker
// owns exactly one backend for the lifetime of an open store; nothing in this
// crate is shared across the worker boundary.
//
// # Modules
//
// - [`backend`] -- The `KvBackend` trait every backend implements.
// - [`error`] -- `StorageError`, whose messages carry the engine-level
//   phrases ("database disk image is malformed", "file is not a database",
//   "attempt to write a readonly database") the client classifies on.
// - [`memory`] -- A `BTreeMap` backend for tests and throwaway profiles.
// - [`collection`] -- JSON records keyed by id inside a namespace.
// - `redb_backend` -- The on-disk backend (feature `redb-backend`).

pub mod backend;
pub mod collection;
pub mod error;
pub mod memory;

#[cfg(feature = "redb-backend")]
pub mod redb_backend;

pub use backend::KvBackend;
pub use collection::Collection;
pub use error::StorageError;
pub use memory::InMemoryBackend;

#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
