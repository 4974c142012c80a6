//! Entry point. Wires Scan/Signal file -> Tracker -> Report -> Portfolio store.
//!
//! `swing-paper-trader backtest` replays the strategy over the stored bars instead.

mod backtest;
mod config;
mod indicators;
mod market_data;
mod performance;
mod report;
mod risk;
mod signals;
mod state;
mod strategy;
mod tracker;
mod types;
mod utils;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use dotenvy::dotenv;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use crate::backtest::Backtest;
use crate::config::{AppConfig, SignalSource};
use crate::market_data::{resolve_universe, BarStore};
use crate::performance::{PerformanceLog, Snapshot};
use crate::report::{summarize, RunReport, TradeStats};
use crate::risk::AllocationRules;
use crate::state::PortfolioStore;
use crate::strategy::ScanResults;
use crate::tracker::Tracker;

const CONFIG_ENV: &str = "TRADER_CONFIG";
const DEFAULT_CONFIG: &str = "config.yaml";

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let backtest = std::env::args().nth(1).as_deref() == Some("backtest");

    if let Err(e) = execute(&cfg_path, backtest) {
        error!("Run failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

/// Config loading and the selected mode, so both fail through one path.
fn execute(cfg_path: &str, backtest: bool) -> anyhow::Result<()> {
    let cfg = AppConfig::load(cfg_path)?;
    if backtest {
        run_backtest(&cfg)
    } else {
        run(&cfg, Local::now().date_naive())
    }
}

fn collect_signals(cfg: &AppConfig) -> anyhow::Result<ScanResults> {
    match cfg.signals.source {
        SignalSource::Scan => {
            let store = BarStore::new(&cfg.data.dir);
            let tickers = resolve_universe(&cfg.universe, &store)?;
            Ok(strategy::scan(&tickers, &store, &cfg.strategy))
        }
        SignalSource::File => {
            let path = cfg
                .signals
                .path
                .as_ref()
                .context("signals.path is not set")?;
            Ok(ScanResults::from_signals(signals::load_signal_file(path)?))
        }
    }
}

/// One daily pass. The portfolio is saved last, so any earlier failure
/// leaves the stored state as it was.
fn run(cfg: &AppConfig, today: NaiveDate) -> anyhow::Result<()> {
    let store = PortfolioStore::new(&cfg.portfolio.path);
    info!(state = %store.path().display(), "Paper trading run for {}", today);

    let portfolio = store.load_or_init(cfg.portfolio.starting_cash)?;
    let mut history = PerformanceLog::load(&cfg.report.performance_path)?;

    let scan = collect_signals(cfg)?;
    let (buys, sells) = signals::partition(scan.signals());

    let tracker = Tracker::new(AllocationRules::from(&cfg.portfolio));
    let applied = tracker.apply_signals(&portfolio, &buys, &sells, today)?;
    if applied.trades.is_empty() {
        info!("No trades executed");
    }

    let prices = signals::current_prices(scan.signals());
    let summary = summarize(&applied.portfolio, &prices);

    if let Some(prev) = history.latest().filter(|prev| prev.date < today) {
        info!(
            "Since {}: ${:+.2}",
            prev.date,
            summary.total_value - prev.total_value
        );
    }
    history.record(Snapshot::from_summary(today, &summary));

    let report = RunReport::new(
        today,
        &scan,
        &buys,
        applied.trades,
        summary,
        TradeStats::from_history(&applied.portfolio.trade_history),
        cfg.report.top_n,
    );
    report.log(tracker.rules().max_positions);
    report.write(&cfg.report.path)?;
    history.save(&cfg.report.performance_path)?;
    store.save(&applied.portfolio)?;
    Ok(())
}

fn run_backtest(cfg: &AppConfig) -> anyhow::Result<()> {
    let store = BarStore::new(&cfg.data.dir);
    let tickers = resolve_universe(&cfg.universe, &store)?;
    let history = backtest::load_history(&tickers, &store);
    let engine = Backtest {
        strategy: &cfg.strategy,
        tracker: Tracker::new(AllocationRules::from(&cfg.portfolio)),
        initial_capital: cfg.portfolio.starting_cash,
    };
    let report = engine.run(&history, cfg.backtest.start, cfg.backtest.end)?;
    report.log();
    report.write(&cfg.backtest.path)?;
    Ok(())
}
