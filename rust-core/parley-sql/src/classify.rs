// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Storage error classification.
//!
//! Errors reach the client as text, so the only reliable signal left is the
//! engine's own wording. Matching is case-insensitive substring search over a
//! fixed phrase list; there is no state and no I/O.

use serde::{Deserialize, Serialize};

/// Phrases marking unrecoverable storage-integrity failures.
const CORRUPTION_PHRASES: &[&str] = &[
    "sqlite_corrupt",
    "database disk image is malformed",
    "file is not a database",
    "not a valid database file",
    "index corruption",
    "corrupt index",
];

/// Phrases marking a store that can no longer be written.
const READONLY_PHRASES: &[&str] = &["sqlite_readonly", "attempt to write a readonly database"];

/// What kind of storage failure an error description represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqliteErrorKind {
    /// The store is damaged and must be rebuilt or removed.
    Corrupted,
    /// The store is intact but refuses writes.
    Readonly,
    /// Anything else: an ordinary application error.
    Unknown,
}

fn contains_any(description: &str, phrases: &[&str]) -> bool {
    let lowered = description.to_ascii_lowercase();
    phrases.iter().any(|phrase| lowered.contains(phrase))
}

/// Whether `description` reports unrecoverable storage corruption.
pub fn is_corruption(description: &str) -> bool {
    contains_any(description, CORRUPTION_PHRASES)
}

/// Whether `description` reports a write against a readonly store.
pub fn is_readonly(description: &str) -> bool {
    contains_any(description, READONLY_PHRASES)
}

/// Classify an error description. Corruption wins over readonly.
pub fn classify(description: &str) -> SqliteErrorKind {
    if is_corruption(description) {
        SqliteErrorKind::Corrupted
    } else if is_readonly(description) {
        SqliteErrorKind::Readonly
    } else {
        SqliteErrorKind::Unknown
    }
}
