// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Per-method call statistics.
//!
//! Tracking is switched on and off by the client; each epoch accumulates
//! count, cumulative and maximum round-trip time per method and is rendered
//! as one summary line when the epoch ends.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a statistics epoch is summarised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStatsOptions {
    /// Number of methods listed, by cumulative duration. Default: 10.
    pub max_queries_to_log: usize,
    /// Label for the epoch, e.g. `"startup"`.
    pub epoch_name: Option<String>,
}

impl Default for QueryStatsOptions {
    fn default() -> Self {
        Self {
            max_queries_to_log: 10,
            epoch_name: None,
        }
    }
}

/// Accumulated timings for one method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub count: u64,
    pub cumulative_ms: f64,
    pub max_ms: f64,
}

/// One statistics epoch.
#[derive(Debug, Clone)]
pub struct QueryStats {
    started: Instant,
    started_at: DateTime<Utc>,
    by_method: HashMap<String, MethodStats>,
}

fn round2(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

impl QueryStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            by_method: HashMap::new(),
        }
    }

    pub fn record(&mut self, method: &str, duration_ms: f64) {
        let stats = self.by_method.entry(method.to_string()).or_default();
        stats.count += 1;
        stats.cumulative_ms += duration_ms;
        stats.max_ms = stats.max_ms.max(duration_ms);
    }

    pub fn get(&self, method: &str) -> Option<&MethodStats> {
        self.by_method.get(method)
    }

    /// Methods sorted by cumulative duration, slowest first.
    pub fn ranked(&self) -> Vec<(&str, &MethodStats)> {
        let mut ranked: Vec<_> = self
            .by_method
            .iter()
            .map(|(name, stats)| (name.as_str(), stats))
            .collect();
        ranked.sort_by(|a, b| b.1.cumulative_ms.total_cmp(&a.1.cumulative_ms));
        ranked
    }

    /// The single line logged when the epoch ends.
    pub fn summary(&self, options: &QueryStatsOptions) -> String {
        let ranked = self.ranked();
        let total: f64 = ranked.iter().map(|(_, s)| s.cumulative_ms).sum();
        let during = options
            .epoch_name
            .as_deref()
            .map(|name| format!(" during '{name}'"))
            .unwrap_or_default();

        let top = ranked
            .iter()
            .take(options.max_queries_to_log)
            .map(|(name, s)| {
                format!(
                    "{name}: cumulative {} | average: {} | max: {} | count: {}",
                    round2(s.cumulative_ms),
                    round2(s.cumulative_ms / s.count.max(1) as f64),
                    round2(s.max_ms),
                    s.count
                )
            })
            .collect::<Vec<_>>()
            .join(" ||| ");

        format!(
            "Top {} queries by cumulative duration (ms) over last {}ms since {}{during}: {top}; \
             Total cumulative duration of all queries during this epoch: {}ms",
            options.max_queries_to_log,
            self.started.elapsed().as_millis(),
            self.started_at.to_rfc3339(),
            round2(total)
        )
    }
}

impl Default for QueryStats {
    fn default() -> Self {
        Self::new()
    }
}
