//! Portfolio valuation, trade statistics and the per-run report.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::state::Portfolio;
use crate::strategy::{ScanFailure, ScanResults};
use crate::types::{ExecutedTrades, Signal, Trade};
use crate::utils::write_atomic;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PositionDetail {
    pub ticker: String,
    pub shares: f64,
    pub entry_price: f64,
    pub current_price: f64,
    /// True when no current price was supplied and `entry_price` stands in.
    pub price_is_stale: bool,
    pub value: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_pct: f64,
    pub entry_date: NaiveDate,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub cash: f64,
    pub positions_value: f64,
    pub total_value: f64,
    pub return_pct: f64,
    pub return_dollars: f64,
    pub num_positions: usize,
    pub positions_detail: Vec<PositionDetail>,
    pub realized_pl: f64,
    pub total_trades: usize,
}

/// Value the portfolio at `current_prices`, falling back to entry prices.
pub fn summarize(portfolio: &Portfolio, current_prices: &HashMap<String, f64>) -> Summary {
    let mut positions_value = 0.0;
    let mut positions_detail = Vec::with_capacity(portfolio.position_count());
    for (ticker, p) in &portfolio.positions {
        let quoted = current_prices.get(ticker).copied();
        let current_price = quoted.unwrap_or(p.entry_price);
        let value = p.shares * current_price;
        positions_value += value;
        let unrealized_pl = (current_price - p.entry_price) * p.shares;
        positions_detail.push(PositionDetail {
            ticker: ticker.clone(),
            shares: p.shares,
            entry_price: p.entry_price,
            current_price,
            price_is_stale: quoted.is_none(),
            value,
            unrealized_pl,
            unrealized_pl_pct: (current_price - p.entry_price) / p.entry_price * 100.0,
            entry_date: p.entry_date,
            quality_score: p.quality_score,
        });
    }
    let total_value = portfolio.cash + positions_value;
    let return_dollars = total_value - portfolio.starting_cash;
    Summary {
        cash: portfolio.cash,
        positions_value,
        total_value,
        return_pct: return_dollars / portfolio.starting_cash * 100.0,
        return_dollars,
        num_positions: portfolio.position_count(),
        positions_detail,
        realized_pl: portfolio.realized_pl(),
        total_trades: portfolio.trade_history.len(),
    }
}

/// Outcome statistics over completed (sold) trades.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TradeStats {
    pub completed: usize,
    pub winners: usize,
    pub losers: usize,
    pub win_rate_pct: f64,
    pub total_pl: f64,
    pub best_pl: Option<f64>,
    pub worst_pl: Option<f64>,
}

impl TradeStats {
    pub fn from_history(history: &[Trade]) -> Self {
        let pls: Vec<f64> = history.iter().filter_map(Trade::profit_loss).collect();
        if pls.is_empty() {
            return Self::default();
        }
        let winners = pls.iter().filter(|pl| **pl > 0.0).count();
        let losers = pls.iter().filter(|pl| **pl < 0.0).count();
        Self {
            completed: pls.len(),
            winners,
            losers,
            win_rate_pct: winners as f64 / pls.len() as f64 * 100.0,
            total_pl: pls.iter().sum(),
            best_pl: pls.iter().copied().reduce(f64::max),
            worst_pl: pls.iter().copied().reduce(f64::min),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanCounts {
    pub total: usize,
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
    pub errors: usize,
}

impl From<&ScanResults> for ScanCounts {
    fn from(r: &ScanResults) -> Self {
        Self {
            total: r.total(),
            buy: r.buy.len(),
            sell: r.sell.len(),
            hold: r.hold.len(),
            errors: r.errors.len(),
        }
    }
}

/// Everything downstream reporting needs from one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_date: NaiveDate,
    pub scan: ScanCounts,
    pub top_buys: Vec<Signal>,
    pub top_sells: Vec<Signal>,
    pub scan_errors: Vec<ScanFailure>,
    pub executed: ExecutedTrades,
    pub summary: Summary,
    pub stats: TradeStats,
}

impl RunReport {
    /// `ranked_buys` must already be in ranking order.
    pub fn new(
        run_date: NaiveDate,
        scan: &ScanResults,
        ranked_buys: &[Signal],
        executed: ExecutedTrades,
        summary: Summary,
        stats: TradeStats,
        top_n: usize,
    ) -> Self {
        Self {
            run_date,
            scan: ScanCounts::from(scan),
            top_buys: ranked_buys.iter().take(top_n).cloned().collect(),
            top_sells: scan.sell.iter().take(top_n).cloned().collect(),
            scan_errors: scan.errors.clone(),
            executed,
            summary,
            stats,
        }
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let s = serde_json::to_string_pretty(self)?;
        write_atomic(path, s.as_bytes())?;
        info!(path = %path.display(), "Run report written");
        Ok(())
    }

    /// Human-readable digest through the log.
    pub fn log(&self, max_positions: usize) {
        let s = &self.summary;
        info!(
            "Signals: {} BUY, {} SELL, {} HOLD, {} errors (of {})",
            self.scan.buy, self.scan.sell, self.scan.hold, self.scan.errors, self.scan.total
        );
        info!(
            "Executed {} trades: {} buys, {} sells",
            self.executed.len(),
            self.executed.buys.len(),
            self.executed.sells.len()
        );
        for t in self.executed.sells.iter().chain(&self.executed.buys) {
            match t.profit_loss() {
                Some(pl) => info!("  {} {} {:.4} sh | P/L ${:+.2}", t.side(), t.ticker(), t.shares(), pl),
                None => info!("  {} {} {:.4} sh", t.side(), t.ticker(), t.shares()),
            }
        }
        for (i, b) in self.top_buys.iter().enumerate() {
            info!(
                "  BUY #{} {} @ {:.2} | quality {:.2} | {}",
                i + 1,
                b.ticker,
                b.indicators.price.unwrap_or_default(),
                b.quality_score,
                b.reason
            );
        }
        for s in &self.top_sells {
            info!(
                "  SELL {} @ {:.2} | {}",
                s.ticker,
                s.indicators.price.unwrap_or_default(),
                s.reason
            );
        }
        info!(
            "Portfolio: ${:.2} total ({:+.2}%, ${:+.2}) | cash ${:.2} | positions {}/{}",
            s.total_value,
            s.return_pct,
            s.return_dollars,
            s.cash,
            s.num_positions,
            max_positions
        );
        for p in &s.positions_detail {
            if p.price_is_stale {
                warn!("  {}: no current price, valued at entry ${:.2}", p.ticker, p.entry_price);
            }
            info!(
                "  {} {:.4} sh @ {:.2} -> {:.2} | ${:.2} ({:+.2}%)",
                p.ticker,
                p.shares,
                p.entry_price,
                p.current_price,
                p.unrealized_pl,
                p.unrealized_pl_pct
            );
        }
        if self.stats.completed > 0 {
            info!(
                "Closed trades: {} ({} won, {} lost, {:.1}% win rate) | realized ${:.2}",
                self.stats.completed,
                self.stats.winners,
                self.stats.losers,
                self.stats.win_rate_pct,
                self.stats.total_pl
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    fn book() -> Portfolio {
        let mut p = Portfolio::new(100_000.0);
        p.open_position("AAPL", 50.0, 100.0, day(), 3.0);
        p.open_position("MSFT", 100.0, 50.0, day(), 2.0);
        p
    }

    #[test]
    fn test_summary_with_quotes() {
        let p = book();
        let prices = HashMap::from([("AAPL".to_string(), 110.0), ("MSFT".to_string(), 45.0)]);
        let s = summarize(&p, &prices);
        assert_eq!(s.positions_value, 5_500.0 + 4_500.0);
        assert_eq!(s.total_value, 100_000.0);
        assert_eq!(s.return_pct, 0.0);
        assert_eq!(s.num_positions, 2);
        let aapl = &s.positions_detail[0];
        assert_eq!(aapl.ticker, "AAPL");
        assert_eq!(aapl.unrealized_pl, 500.0);
        assert!((aapl.unrealized_pl_pct - 10.0).abs() < 1e-9);
        assert!(!aapl.price_is_stale);
    }

    #[test]
    fn test_summary_falls_back_to_entry_price() {
        let p = book();
        let prices = HashMap::from([("AAPL".to_string(), 120.0)]);
        let s = summarize(&p, &prices);
        assert_eq!(s.positions_value, 6_000.0 + 5_000.0);
        assert_eq!(s.total_value, 101_000.0);
        assert!((s.return_pct - 1.0).abs() < 1e-9);
        assert!(s.positions_detail[1].price_is_stale);
        assert_eq!(s.positions_detail[1].current_price, 50.0);
    }

    #[test]
    fn test_summary_uses_recorded_seed() {
        let mut p = Portfolio::new(50_000.0);
        p.cash = 55_000.0;
        let s = summarize(&p, &HashMap::new());
        assert_eq!(s.return_dollars, 5_000.0);
        assert_eq!(s.return_pct, 10.0);
    }

    #[test]
    fn test_trade_stats() {
        let mut p = book();
        p.close_position("AAPL", 120.0, day());
        p.close_position("MSFT", 40.0, day());
        let stats = TradeStats::from_history(&p.trade_history);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.winners, 1);
        assert_eq!(stats.losers, 1);
        assert_eq!(stats.win_rate_pct, 50.0);
        assert_eq!(stats.total_pl, 0.0);
        assert_eq!(stats.best_pl, Some(1_000.0));
        assert_eq!(stats.worst_pl, Some(-1_000.0));

        assert_eq!(TradeStats::from_history(&[]), TradeStats::default());
    }

    #[test]
    fn test_run_report_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("last_run.json");
        let p = book();
        let scan = ScanResults::default();
        let report = RunReport::new(
            day(),
            &scan,
            &[],
            ExecutedTrades::default(),
            summarize(&p, &HashMap::new()),
            TradeStats::default(),
            5,
        );
        report.write(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["run_date"], "2024-04-01");
        assert_eq!(v["summary"]["num_positions"], 2);
        assert_eq!(v["scan"]["total"], 0);
    }
}
