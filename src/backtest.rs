//! Day-by-day replay of the scanner and tracker over stored bars.
//!
//! Each trading day sees only the bars dated on or before it. Tickers
//! without a bar that day are not scanned but keep their last close for
//! valuation.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::config::StrategyCfg;
use crate::market_data::BarStore;
use crate::report::{summarize, TradeStats};
use crate::signals;
use crate::state::Portfolio;
use crate::strategy::{analyze, MIN_HISTORY};
use crate::tracker::Tracker;
use crate::types::{Bar, Trade};
use crate::utils::write_atomic;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("no ticker has the {0} bars needed to replay")]
    NoData(usize),
    #[error("no trading days between {start:?} and {end:?}")]
    EmptyWindow {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub trading_days: usize,
    pub tickers: usize,
    pub initial_capital: f64,
    pub final_value: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub stats: TradeStats,
    pub avg_win: Option<f64>,
    pub avg_loss: Option<f64>,
    /// Gross profit over gross loss; `None` without a losing trade.
    pub profit_factor: Option<f64>,
    /// Days whose batch failed and left the portfolio as it was.
    pub skipped_days: usize,
    pub equity: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
}

/// Bars for every ticker with enough history to be scanned at least once.
pub fn load_history(tickers: &[String], store: &BarStore) -> BTreeMap<String, Vec<Bar>> {
    let mut history = BTreeMap::new();
    for ticker in tickers {
        match store.load(ticker) {
            Ok(bars) if bars.len() >= MIN_HISTORY => {
                history.insert(ticker.clone(), bars);
            }
            Ok(bars) => warn!("{}: only {} bars, left out of backtest", ticker, bars.len()),
            Err(e) => warn!("{:#}", e),
        }
    }
    info!("Backtest history loaded for {} of {} tickers", history.len(), tickers.len());
    history
}

pub struct Backtest<'a> {
    pub strategy: &'a StrategyCfg,
    pub tracker: Tracker,
    pub initial_capital: f64,
}

impl Backtest<'_> {
    pub fn run(
        &self,
        history: &BTreeMap<String, Vec<Bar>>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<BacktestReport, BacktestError> {
        if history.is_empty() {
            return Err(BacktestError::NoData(MIN_HISTORY));
        }
        let days: Vec<NaiveDate> = history
            .values()
            .flat_map(|bars| bars.iter().map(|b| b.date))
            .filter(|d| start.map_or(true, |s| *d >= s) && end.map_or(true, |e| *d <= e))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let (Some(&first), Some(&last)) = (days.first(), days.last()) else {
            return Err(BacktestError::EmptyWindow { start, end });
        };
        info!("Backtesting {} trading days, {} to {}", days.len(), first, last);

        let mut portfolio = Portfolio::new(self.initial_capital);
        let mut equity = Vec::with_capacity(days.len());
        let mut skipped_days = 0;
        for (i, &day) in days.iter().enumerate() {
            if i % PROGRESS_EVERY == 0 {
                info!("Backtest day {}/{}: {}", i + 1, days.len(), day);
            }
            let mut day_signals = Vec::new();
            let mut prices = HashMap::new();
            for (ticker, bars) in history {
                let visible = &bars[..bars.partition_point(|b| b.date <= day)];
                let Some(latest) = visible.last() else { continue };
                prices.insert(ticker.clone(), latest.close);
                if latest.date != day {
                    continue;
                }
                if let Ok(signal) = analyze(ticker, visible, self.strategy) {
                    day_signals.push(signal);
                }
            }
            let (buys, sells) = signals::partition(&day_signals);
            match self.tracker.apply_signals(&portfolio, &buys, &sells, day) {
                Ok(applied) => portfolio = applied.portfolio,
                Err(e) => {
                    warn!("Backtest {}: {:#}", day, e);
                    skipped_days += 1;
                }
            }
            equity.push(EquityPoint {
                date: day,
                value: summarize(&portfolio, &prices).total_value,
            });
        }

        let values: Vec<f64> = equity.iter().map(|p| p.value).collect();
        let final_value = values.last().copied().unwrap_or(self.initial_capital);
        let outcome = Outcome::from_trades(&portfolio.trade_history);
        Ok(BacktestReport {
            start: first,
            end: last,
            trading_days: days.len(),
            tickers: history.len(),
            initial_capital: self.initial_capital,
            final_value,
            total_return_pct: (final_value - self.initial_capital) / self.initial_capital * 100.0,
            max_drawdown_pct: max_drawdown_pct(&values),
            sharpe_ratio: sharpe_ratio(&values),
            stats: TradeStats::from_history(&portfolio.trade_history),
            avg_win: outcome.avg_win,
            avg_loss: outcome.avg_loss,
            profit_factor: outcome.profit_factor,
            skipped_days,
            equity,
            trades: portfolio.trade_history,
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct Outcome {
    avg_win: Option<f64>,
    avg_loss: Option<f64>,
    profit_factor: Option<f64>,
}

impl Outcome {
    fn from_trades(trades: &[Trade]) -> Self {
        let (wins, losses): (Vec<f64>, Vec<f64>) = trades
            .iter()
            .filter_map(Trade::profit_loss)
            .filter(|pl| *pl != 0.0)
            .partition(|pl| *pl > 0.0);
        let mean = |v: &[f64]| (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64);
        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = -losses.iter().sum::<f64>();
        Self {
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            profit_factor: (gross_loss > 0.0).then(|| gross_win / gross_loss),
        }
    }
}

/// Largest peak-to-trough fall, in percent of the peak.
pub fn max_drawdown_pct(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak * 100.0);
        }
    }
    worst
}

/// Annualised Sharpe ratio of daily returns with a zero risk-free rate.
pub fn sharpe_ratio(values: &[f64]) -> f64 {
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let std = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std > 0.0 {
        mean / std * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

impl BacktestReport {
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let s = serde_json::to_string_pretty(self)?;
        write_atomic(path, s.as_bytes())?;
        info!(path = %path.display(), "Backtest results written");
        Ok(())
    }

    pub fn log(&self) {
        info!(
            "Backtest {} to {}: {} days over {} tickers",
            self.start, self.end, self.trading_days, self.tickers
        );
        info!(
            "Final value ${:.2} ({:+.2}%) | max drawdown {:.2}% | Sharpe {:.2}",
            self.final_value, self.total_return_pct, self.max_drawdown_pct, self.sharpe_ratio
        );
        info!(
            "Trades: {} closed, {} won, {} lost ({:.1}% win rate) | avg win ${:.2} | avg loss ${:.2}",
            self.stats.completed,
            self.stats.winners,
            self.stats.losers,
            self.stats.win_rate_pct,
            self.avg_win.unwrap_or_default(),
            self.avg_loss.unwrap_or_default()
        );
        match self.profit_factor {
            Some(pf) => info!("Profit factor {:.2}", pf),
            None => info!("Profit factor n/a (no losing trades)"),
        }
        if self.skipped_days > 0 {
            warn!("{} backtest days failed and were skipped", self.skipped_days);
        }
    }
}
