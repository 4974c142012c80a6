//! Daily portfolio value history.

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::report::Summary;
use crate::utils::write_atomic;

/// Snapshots older than this many entries are dropped.
pub const HISTORY_LIMIT: usize = 90;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub total_value: f64,
    pub cash: f64,
    pub positions_count: usize,
    pub return_pct: f64,
    pub return_dollars: f64,
}

impl Snapshot {
    pub fn from_summary(date: NaiveDate, s: &Summary) -> Self {
        Self {
            date,
            total_value: s.total_value,
            cash: s.cash,
            positions_count: s.num_positions,
            return_pct: s.return_pct,
            return_dollars: s.return_dollars,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PerformanceLog {
    pub snapshots: Vec<Snapshot>,
}

impl PerformanceLog {
    /// Missing file yields an empty log; a malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading performance log {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing performance log {}", path.display()))
    }

    /// One snapshot per date; re-running on the same day replaces it.
    pub fn record(&mut self, snap: Snapshot) {
        self.snapshots.retain(|s| s.date != snap.date);
        self.snapshots.push(snap);
        self.snapshots.sort_by_key(|s| s.date);
        if self.snapshots.len() > HISTORY_LIMIT {
            let excess = self.snapshots.len() - HISTORY_LIMIT;
            self.snapshots.drain(..excess);
        }
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let s = serde_json::to_string_pretty(self)?;
        write_atomic(path, s.as_bytes())
            .with_context(|| format!("writing performance log {}", path.display()))?;
        info!(path = %path.display(), entries = self.snapshots.len(), "Performance log saved");
        Ok(())
    }
}
