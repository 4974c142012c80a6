//! Load and validate runtime configuration.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

use crate::risk::{MAX_POSITIONS, POSITION_SIZE};
use crate::state::DEFAULT_STARTING_CASH;

/// Longest CAGR lookback accepted, in years.
pub const MAX_CAGR_YEARS: f64 = 100.0;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PortfolioCfg {
    pub path: PathBuf,
    pub starting_cash: f64,
    pub max_positions: usize,
    pub position_size: f64,
}

impl Default for PortfolioCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/portfolio.json"),
            starting_cash: DEFAULT_STARTING_CASH,
            max_positions: MAX_POSITIONS,
            position_size: POSITION_SIZE,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UniverseCfg {
    /// Explicit ticker list; wins over `ticker_file`.
    pub tickers: Vec<String>,
    /// One ticker per line.
    pub ticker_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataCfg {
    pub dir: PathBuf,
}

impl Default for DataCfg {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    /// Compute signals from local bar files.
    #[default]
    Scan,
    /// Read signals produced by an external scanner.
    File,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SignalsCfg {
    pub source: SignalSource,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StrategyCfg {
    pub stochastic_k_period: usize,
    pub stochastic_d_period: usize,
    pub stochastic_smooth: usize,
    pub sweet_spot_lower: f64,
    pub sweet_spot_upper: f64,
    /// Minimum CAGR (percent) for a ticker to be a buy candidate.
    pub min_cagr: f64,
    pub cagr_years: f64,
    pub trend_lookback_days: usize,
    pub volume_sma_period: usize,
    pub volume_consistency_days: usize,
    pub head_shoulders_lookback: usize,
}

impl Default for StrategyCfg {
    fn default() -> Self {
        Self {
            stochastic_k_period: 10,
            stochastic_d_period: 3,
            stochastic_smooth: 3,
            sweet_spot_lower: 32.0,
            sweet_spot_upper: 80.0,
            min_cagr: 15.0,
            cagr_years: 2.0,
            trend_lookback_days: 3,
            volume_sma_period: 30,
            volume_consistency_days: 5,
            head_shoulders_lookback: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportCfg {
    pub path: PathBuf,
    pub performance_path: PathBuf,
    /// How many buy/sell signals the run report lists.
    pub top_n: usize,
}

impl Default for ReportCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/last_run.json"),
            performance_path: PathBuf::from("data/performance.json"),
            top_n: 5,
        }
    }
}

/// Historical replay of the strategy and tracker.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BacktestCfg {
    /// First simulated day; defaults to the earliest bar on disk.
    pub start: Option<NaiveDate>,
    /// Last simulated day; defaults to the latest bar on disk.
    pub end: Option<NaiveDate>,
    pub path: PathBuf,
}

impl Default for BacktestCfg {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            path: PathBuf::from("data/backtest.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub portfolio: PortfolioCfg,
    pub universe: UniverseCfg,
    pub data: DataCfg,
    pub signals: SignalsCfg,
    pub strategy: StrategyCfg,
    pub report: ReportCfg,
    pub backtest: BacktestCfg,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&s).with_context(|| format!("in config {}", path.display()))
    }

    pub fn from_yaml(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.portfolio;
        if !(p.starting_cash.is_finite() && p.starting_cash > 0.0) {
            bail!("portfolio.starting_cash must be positive, got {}", p.starting_cash);
        }
        if !(p.position_size.is_finite() && p.position_size > 0.0) {
            bail!("portfolio.position_size must be positive, got {}", p.position_size);
        }
        if p.max_positions == 0 {
            bail!("portfolio.max_positions must be at least 1");
        }
        let s = &self.strategy;
        if s.sweet_spot_lower > s.sweet_spot_upper {
            bail!(
                "strategy sweet spot is inverted: {} > {}",
                s.sweet_spot_lower,
                s.sweet_spot_upper
            );
        }
        if s.stochastic_k_period == 0 || s.stochastic_d_period == 0 || s.stochastic_smooth == 0 {
            bail!("strategy stochastic periods must be at least 1");
        }
        if !(s.cagr_years.is_finite() && s.cagr_years > 0.0 && s.cagr_years <= MAX_CAGR_YEARS) {
            bail!(
                "strategy.cagr_years must be in (0, {}], got {}",
                MAX_CAGR_YEARS,
                s.cagr_years
            );
        }
        if s.volume_consistency_days < 2 {
            bail!("strategy.volume_consistency_days must be at least 2");
        }
        if let (Some(start), Some(end)) = (self.backtest.start, self.backtest.end) {
            if start > end {
                bail!("backtest.start {} is after backtest.end {}", start, end);
            }
        }
        if self.signals.source == SignalSource::File && self.signals.path.is_none() {
            bail!("signals.path is required when signals.source is 'file'");
        }
        Ok(())
    }
}
