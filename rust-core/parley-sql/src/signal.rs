// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Single-assignment broadcast values.

use std::future::Future;

use tokio::sync::watch;

/// A value settled at most once and awaitable by any number of observers.
///
/// Observers that subscribe after settlement see the value immediately.
/// Later settlement attempts are no-ops.
#[derive(Debug)]
pub struct OneShot<T> {
    slot: watch::Sender<Option<T>>,
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self {
            slot: watch::Sender::new(None),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> OneShot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle with `value` unless already settled. Returns whether this call
    /// was the one that settled it.
    pub fn settle(&self, value: T) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Resolve with the settled value. Never resolves if the signal is
    /// dropped unsettled.
    pub fn wait(&self) -> impl Future<Output = T> + Send + 'static {
        let mut rx = self.slot.subscribe();
        async move {
            let settled = rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|value| (*value).clone());
            match settled {
                Some(value) => value,
                None => std::future::pending().await,
            }
        }
    }
}
