//! Daily bar files on local disk and the ticker universe built from them.
//!
//! Bars for a ticker live in `<dir>/<TICKER>_1d_full.csv`; older dated copies
//! named `<TICKER>_1d_full_<suffix>.csv` are used when the plain file is absent.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::UniverseCfg;
use crate::types::Bar;
use crate::utils::sanitize_symbol;

const FILE_TAG: &str = "_1d_full";

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("no bar file for {0}")]
    Missing(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed bar file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One CSV row. Header case varies between writers.
#[derive(Debug, Deserialize)]
struct BarRow {
    #[serde(alias = "Date")]
    date: String,
    #[serde(alias = "Open", default, deserialize_with = "csv::invalid_option")]
    open: Option<f64>,
    #[serde(alias = "High", default, deserialize_with = "csv::invalid_option")]
    high: Option<f64>,
    #[serde(alias = "Low", default, deserialize_with = "csv::invalid_option")]
    low: Option<f64>,
    #[serde(alias = "Close", default, deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(alias = "Volume", default, deserialize_with = "csv::invalid_option")]
    volume: Option<f64>,
}

impl BarRow {
    /// Rows without a parseable date or with any missing price are dropped.
    fn into_bar(self) -> Option<Bar> {
        let date = NaiveDate::parse_from_str(self.date.trim().get(..10)?, "%Y-%m-%d").ok()?;
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        Some(Bar {
            date,
            open: finite(self.open)?,
            high: finite(self.high)?,
            low: finite(self.low)?,
            close: finite(self.close)?,
            volume: finite(self.volume).unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BarStore {
    dir: PathBuf,
}

impl BarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, ticker: &str) -> Option<PathBuf> {
        let standard = self.dir.join(format!("{}{}.csv", ticker, FILE_TAG));
        if standard.is_file() {
            return Some(standard);
        }
        let prefix = format!("{}{}_", ticker, FILE_TAG);
        let mut dated: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(".csv"))
            })
            .collect();
        dated.sort();
        dated.into_iter().next()
    }

    /// Bars for `ticker`, sorted by date.
    pub fn load(&self, ticker: &str) -> Result<Vec<Bar>, DataError> {
        let path = self
            .path_for(ticker)
            .ok_or_else(|| DataError::Missing(ticker.to_string()))?;
        let file = File::open(&path).map_err(|source| DataError::Io {
            path: path.clone(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let mut bars = Vec::new();
        let mut dropped = 0usize;
        for row in reader.deserialize::<BarRow>() {
            let row = row.map_err(|source| DataError::Csv {
                path: path.clone(),
                source,
            })?;
            match row.into_bar() {
                Some(bar) => bars.push(bar),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("{}: dropped {} incomplete rows", ticker, dropped);
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Every ticker that has a bar file in the data directory, sorted.
    pub fn available_tickers(&self) -> Result<Vec<String>, DataError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| DataError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut tickers = BTreeSet::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".csv") {
                continue;
            }
            if let Some((ticker, _)) = name.split_once(FILE_TAG) {
                if !ticker.is_empty() {
                    tickers.insert(sanitize_symbol(ticker));
                }
            }
        }
        Ok(tickers.into_iter().collect())
    }
}

fn read_ticker_file(path: &Path) -> Result<Vec<String>, DataError> {
    let s = std::fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(sanitize_symbol)
        .collect())
}

/// Tickers to scan: the configured list, else the ticker file, else every
/// ticker with bars on disk. Duplicates are dropped, first occurrence wins.
pub fn resolve_universe(cfg: &UniverseCfg, store: &BarStore) -> Result<Vec<String>, DataError> {
    let raw = if !cfg.tickers.is_empty() {
        cfg.tickers.iter().map(|t| sanitize_symbol(t)).collect()
    } else if let Some(path) = &cfg.ticker_file {
        read_ticker_file(path)?
    } else {
        store.available_tickers()?
    };
    let mut seen = BTreeSet::new();
    let tickers: Vec<String> = raw
        .into_iter()
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();
    info!("Universe: {} tickers", tickers.len());
    Ok(tickers)
}
