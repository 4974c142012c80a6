//! Persisted paper portfolio. Loaded fully, mutated in memory, replaced fully.

use chrono::NaiveDate;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::{Position, Trade};
use crate::utils::{sanitize_symbol, write_atomic};

/// Seed cash for state files written before `starting_cash` was recorded.
pub const DEFAULT_STARTING_CASH: f64 = 100_000.0;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("portfolio state {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("portfolio state {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("portfolio state holds more than one position for {0}")]
    DuplicateTicker(String),
    #[error("portfolio state is inconsistent: {0}")]
    Invalid(String),
    #[error("failed to encode portfolio state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub cash: f64,
    pub starting_cash: f64,
    /// Open positions keyed by upper-case ticker.
    pub positions: BTreeMap<String, Position>,
    /// Append-only, oldest first.
    pub trade_history: Vec<Trade>,
}

/// On-disk shape. Positions are read as raw entries so duplicate keys are
/// reported instead of silently collapsing into one.
#[derive(Deserialize)]
struct RawPortfolio {
    cash: f64,
    #[serde(default = "default_starting_cash")]
    starting_cash: f64,
    #[serde(default, deserialize_with = "position_entries")]
    positions: Vec<(String, Position)>,
    #[serde(default)]
    trade_history: Vec<Trade>,
}

fn default_starting_cash() -> f64 {
    DEFAULT_STARTING_CASH
}

fn position_entries<'de, D>(de: D) -> Result<Vec<(String, Position)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Entries;

    impl<'de> Visitor<'de> for Entries {
        type Value = Vec<(String, Position)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of ticker to position")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, Position>()? {
                out.push(entry);
            }
            Ok(out)
        }
    }

    de.deserialize_map(Entries)
}

impl Portfolio {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            cash: starting_cash,
            starting_cash,
            positions: BTreeMap::new(),
            trade_history: Vec::new(),
        }
    }

    fn from_raw(raw: RawPortfolio) -> Result<Self, StateError> {
        let mut positions = BTreeMap::new();
        for (ticker, position) in raw.positions {
            let key = sanitize_symbol(&ticker);
            if positions.insert(key.clone(), position).is_some() {
                return Err(StateError::DuplicateTicker(key));
            }
        }
        let me = Self {
            cash: raw.cash,
            starting_cash: raw.starting_cash,
            positions,
            trade_history: raw.trade_history,
        };
        me.validate()?;
        Ok(me)
    }

    /// Checks the invariants every persisted state must satisfy.
    pub fn validate(&self) -> Result<(), StateError> {
        if !self.cash.is_finite() || self.cash < 0.0 {
            return Err(StateError::Invalid(format!("cash is {}", self.cash)));
        }
        if !self.starting_cash.is_finite() || self.starting_cash <= 0.0 {
            return Err(StateError::Invalid(format!(
                "starting cash is {}",
                self.starting_cash
            )));
        }
        for (ticker, p) in &self.positions {
            if !(p.shares.is_finite() && p.shares > 0.0) {
                return Err(StateError::Invalid(format!(
                    "{} holds {} shares",
                    ticker, p.shares
                )));
            }
            if !(p.entry_price.is_finite() && p.entry_price > 0.0) {
                return Err(StateError::Invalid(format!(
                    "{} has entry price {}",
                    ticker, p.entry_price
                )));
            }
        }
        if let Some(t) = self.trade_history.iter().find(|t| !t.is_finite()) {
            return Err(StateError::Invalid(format!(
                "{} trade for {} has a non-finite amount",
                t.side(),
                t.ticker()
            )));
        }
        Ok(())
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn holds(&self, ticker: &str) -> bool {
        self.positions.contains_key(ticker)
    }

    /// Debit `shares * price`, open the position and log a BUY. Returns the trade.
    pub fn open_position(
        &mut self,
        ticker: &str,
        shares: f64,
        price: f64,
        date: NaiveDate,
        quality_score: f64,
    ) -> Trade {
        let quality_score = if quality_score.is_finite() {
            quality_score
        } else {
            0.0
        };
        let cost = shares * price;
        // shares * price can overshoot the sized amount by an ulp
        self.cash = (self.cash - cost).max(0.0);
        self.positions.insert(
            ticker.to_string(),
            Position {
                shares,
                entry_price: price,
                entry_date: date,
                quality_score,
            },
        );
        let trade = Trade::Buy {
            ticker: ticker.to_string(),
            shares,
            entry_price: price,
            entry_date: date,
            cost,
            quality_score,
        };
        self.trade_history.push(trade.clone());
        trade
    }

    /// Exit the whole position at `price`, credit the proceeds and log a SELL.
    /// Returns `None` when the ticker is not held.
    pub fn close_position(&mut self, ticker: &str, price: f64, date: NaiveDate) -> Option<Trade> {
        let position = self.positions.remove(ticker)?;
        let entry_value = position.cost_basis();
        let exit_value = position.shares * price;
        let profit_loss = exit_value - entry_value;
        let profit_loss_pct = profit_loss / entry_value * 100.0;
        self.cash += exit_value;

        let trade = Trade::Sell {
            ticker: ticker.to_string(),
            shares: position.shares,
            entry_price: position.entry_price,
            entry_date: position.entry_date,
            exit_price: price,
            exit_date: date,
            profit_loss,
            profit_loss_pct,
        };
        self.trade_history.push(trade.clone());
        Some(trade)
    }

    pub fn realized_pl(&self) -> f64 {
        self.trade_history
            .iter()
            .filter_map(Trade::profit_loss)
            .sum()
    }
}

/// JSON file holding the single portfolio.
#[derive(Debug, Clone)]
pub struct PortfolioStore {
    path: PathBuf,
}

impl PortfolioStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored portfolio, or seed a fresh one if nothing is stored yet.
    /// A present but unreadable or inconsistent file is an error, never reset.
    pub fn load_or_init(&self, starting_cash: f64) -> Result<Portfolio, StateError> {
        if !self.path.exists() {
            info!(
                path = %self.path.display(),
                "No portfolio state found, starting with ${:.2}",
                starting_cash
            );
            return Ok(Portfolio::new(starting_cash));
        }
        let s = std::fs::read_to_string(&self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        let raw: RawPortfolio = serde_json::from_str(&s).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let me = Portfolio::from_raw(raw)?;
        info!(
            "Loaded portfolio: ${:.2} cash, {} positions, {} trades",
            me.cash,
            me.position_count(),
            me.trade_history.len()
        );
        Ok(me)
    }

    /// Overwrite the stored portfolio. A state that would not load back is
    /// refused and the previous file is kept.
    pub fn save(&self, portfolio: &Portfolio) -> Result<(), StateError> {
        portfolio.validate()?;
        let s = serde_json::to_string_pretty(portfolio)?;
        write_atomic(&self.path, s.as_bytes()).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "Portfolio state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_open_then_close_position() {
        let mut p = Portfolio::new(100_000.0);
        let buy = p.open_position("AAPL", 50.0, 100.0, day(1), 42.0);
        assert_eq!(p.cash, 95_000.0);
        assert!(p.holds("AAPL"));
        assert!(matches!(buy, Trade::Buy { cost, .. } if cost == 5_000.0));

        let sell = p.close_position("AAPL", 120.0, day(2)).unwrap();
        assert_eq!(p.cash, 101_000.0);
        assert!(!p.holds("AAPL"));
        match sell {
            Trade::Sell {
                entry_date,
                entry_price,
                profit_loss,
                profit_loss_pct,
                ..
            } => {
                assert_eq!(entry_date, day(1));
                assert_eq!(entry_price, 100.0);
                assert_eq!(profit_loss, 1_000.0);
                assert_eq!(profit_loss_pct, 20.0);
            }
            other => panic!("expected sell, got {:?}", other),
        }
        assert_eq!(p.trade_history.len(), 2);
        assert_eq!(p.realized_pl(), 1_000.0);
    }

    #[test]
    fn test_close_unheld_is_noop() {
        let mut p = Portfolio::new(1_000.0);
        assert!(p.close_position("TSLA", 10.0, day(1)).is_none());
        assert_eq!(p, Portfolio::new(1_000.0));
    }

    #[test]
    fn test_missing_file_seeds_fresh_portfolio() {
        let dir = tempfile::tempdir().unwrap();
        let store = PortfolioStore::new(dir.path().join("portfolio.json"));
        let p = store.load_or_init(25_000.0).unwrap();
        assert_eq!(p.cash, 25_000.0);
        assert_eq!(p.starting_cash, 25_000.0);
        assert!(p.positions.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = PortfolioStore::new(dir.path().join("data").join("portfolio.json"));
        let mut p = Portfolio::new(100_000.0);
        p.open_position("MSFT", 100.0, 50.0, day(3), 7.5);
        p.open_position("AAPL", 50.0, 100.0, day(3), 9.0);
        store.save(&p).unwrap();

        let loaded = store.load_or_init(1.0).unwrap();
        assert_eq!(loaded, p);

        // Same state writes the same bytes.
        let first = std::fs::read(store.path()).unwrap();
        store.save(&loaded).unwrap();
        assert_eq!(first, std::fs::read(store.path()).unwrap());
    }

    #[test]
    fn test_legacy_state_defaults_starting_cash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        std::fs::write(
            &path,
            r#"{"cash": 95000.0, "positions": {"nvda": {"shares": 10, "entry_price": 500.0, "entry_date": "2024-05-01", "quality_score": 3.2}}, "trade_history": []}"#,
        )
        .unwrap();
        let p = PortfolioStore::new(&path).load_or_init(1.0).unwrap();
        assert_eq!(p.starting_cash, DEFAULT_STARTING_CASH);
        assert!(p.holds("NVDA"));
    }

    #[test]
    fn test_duplicate_ticker_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        std::fs::write(
            &path,
            r#"{"cash": 1.0, "positions": {
                "AAPL": {"shares": 1, "entry_price": 1.0, "entry_date": "2024-05-01"},
                "aapl": {"shares": 2, "entry_price": 1.0, "entry_date": "2024-05-02"}
            }}"#,
        )
        .unwrap();
        let err = PortfolioStore::new(&path).load_or_init(1.0).unwrap_err();
        assert!(matches!(err, StateError::DuplicateTicker(t) if t == "AAPL"));
    }

    #[test]
    fn test_corrupt_state_is_not_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        std::fs::write(&path, "{\"cash\": 10").unwrap();
        let err = PortfolioStore::new(&path).load_or_init(1.0).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"cash\": 10");
    }

    #[test]
    fn test_save_refuses_state_that_cannot_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = PortfolioStore::new(dir.path().join("portfolio.json"));
        let good = Portfolio::new(100_000.0);
        store.save(&good).unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let mut bad = good.clone();
        bad.open_position("PENNY", f64::INFINITY, 1e-310, day(2), 1.0);
        assert!(matches!(store.save(&bad), Err(StateError::Invalid(_))));

        let mut bad = good.clone();
        bad.cash = f64::INFINITY;
        assert!(matches!(store.save(&bad), Err(StateError::Invalid(_))));

        assert_eq!(std::fs::read(store.path()).unwrap(), before);
        assert_eq!(store.load_or_init(1.0).unwrap(), good);
    }

    #[test]
    fn test_negative_cash_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        std::fs::write(&path, r#"{"cash": -5.0, "positions": {}, "trade_history": []}"#).unwrap();
        let err = PortfolioStore::new(&path).load_or_init(1.0).unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
    }
}
