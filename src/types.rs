//! Core domain types for signals, positions, trades and daily bars.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Classification a scan assigns to a ticker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
    /// Anything else an upstream scanner emits. Never acted on.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// Indicator values behind a signal. Only `price` matters for execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Indicators {
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cagr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_25: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_100: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_200: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stochastic_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stochastic_d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ratio: Option<f64>,
    /// Date of the bar the values were computed from, as the scanner wrote it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub ticker: String,
    #[serde(rename = "signal")]
    pub signal_type: SignalType,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default)]
    pub indicators: Indicators,
}

impl Signal {
    /// Market price usable for execution: present, finite and positive.
    pub fn price(&self) -> Option<f64> {
        self.indicators
            .price
            .filter(|p| p.is_finite() && *p > 0.0)
    }
}

/// An open stake in one ticker. The ticker is the key of the holding map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub shares: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    #[serde(default)]
    pub quality_score: f64,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.shares
    }
}

/// Immutable record of one executed paper trade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Trade {
    Buy {
        ticker: String,
        shares: f64,
        entry_price: f64,
        entry_date: NaiveDate,
        cost: f64,
        #[serde(default)]
        quality_score: f64,
    },
    Sell {
        ticker: String,
        shares: f64,
        entry_price: f64,
        entry_date: NaiveDate,
        exit_price: f64,
        exit_date: NaiveDate,
        profit_loss: f64,
        profit_loss_pct: f64,
    },
}

impl Trade {
    pub fn side(&self) -> Side {
        match self {
            Trade::Buy { .. } => Side::Buy,
            Trade::Sell { .. } => Side::Sell,
        }
    }

    pub fn ticker(&self) -> &str {
        match self {
            Trade::Buy { ticker, .. } | Trade::Sell { ticker, .. } => ticker,
        }
    }

    pub fn shares(&self) -> f64 {
        match self {
            Trade::Buy { shares, .. } | Trade::Sell { shares, .. } => *shares,
        }
    }

    /// Every amount on the record is a finite number.
    pub fn is_finite(&self) -> bool {
        match self {
            Trade::Buy {
                shares,
                entry_price,
                cost,
                quality_score,
                ..
            } => [*shares, *entry_price, *cost, *quality_score]
                .iter()
                .all(|v| v.is_finite()),
            Trade::Sell {
                shares,
                entry_price,
                exit_price,
                profit_loss,
                profit_loss_pct,
                ..
            } => [*shares, *entry_price, *exit_price, *profit_loss, *profit_loss_pct]
                .iter()
                .all(|v| v.is_finite()),
        }
    }

    /// Realized P/L; only sells carry one.
    pub fn profit_loss(&self) -> Option<f64> {
        match self {
            Trade::Sell { profit_loss, .. } => Some(*profit_loss),
            Trade::Buy { .. } => None,
        }
    }
}

/// Trades executed by one application of a signal batch, split by side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutedTrades {
    pub sells: Vec<Trade>,
    pub buys: Vec<Trade>,
}

impl ExecutedTrades {
    pub fn is_empty(&self) -> bool {
        self.sells.is_empty() && self.buys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sells.len() + self.buys.len()
    }
}

/// One daily OHLCV row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
