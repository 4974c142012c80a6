//! Signal intake: external scan files, ranking and price extraction.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::types::{Signal, SignalType};
use crate::utils::sanitize_symbol;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("failed to read signal file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed signal file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid ticker symbol {0:?}")]
    InvalidTicker(String),
}

fn ticker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9.\-]{0,9}$").expect("ticker pattern compiles"))
}

pub fn normalize_ticker(raw: &str) -> Result<String, SignalError> {
    let t = sanitize_symbol(raw);
    if ticker_pattern().is_match(&t) {
        Ok(t)
    } else {
        Err(SignalError::InvalidTicker(raw.to_string()))
    }
}

/// Read a JSON array of signals written by an external scanner.
pub fn load_signal_file(path: impl AsRef<Path>) -> Result<Vec<Signal>, SignalError> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).map_err(|source| SignalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut signals: Vec<Signal> =
        serde_json::from_str(&s).map_err(|source| SignalError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    for s in &mut signals {
        s.ticker = normalize_ticker(&s.ticker)?;
    }
    info!("Loaded {} signals from {}", signals.len(), path.display());
    Ok(signals)
}

fn rank_key(s: &Signal) -> f64 {
    if s.quality_score.is_nan() {
        f64::NEG_INFINITY
    } else {
        s.quality_score
    }
}

/// BUY signals ordered by quality score, best first. Ties keep input order.
pub fn rank_buys<'a>(signals: impl IntoIterator<Item = &'a Signal>) -> Vec<Signal> {
    let mut buys: Vec<Signal> = signals
        .into_iter()
        .filter(|s| s.signal_type == SignalType::Buy)
        .cloned()
        .collect();
    buys.sort_by(|a, b| rank_key(b).total_cmp(&rank_key(a)));
    buys
}

/// Split a scan into ranked buys and sells, in the order the tracker expects.
pub fn partition<'a>(signals: impl IntoIterator<Item = &'a Signal> + Clone) -> (Vec<Signal>, Vec<Signal>) {
    let buys = rank_buys(signals.clone());
    let sells = signals
        .into_iter()
        .filter(|s| s.signal_type == SignalType::Sell)
        .cloned()
        .collect();
    (buys, sells)
}

/// Latest usable price per ticker. Later signals for a ticker win.
pub fn current_prices<'a>(signals: impl IntoIterator<Item = &'a Signal>) -> HashMap<String, f64> {
    signals
        .into_iter()
        .filter_map(|s| s.price().map(|p| (sanitize_symbol(&s.ticker), p)))
        .collect()
}
