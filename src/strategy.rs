//! Per-ticker classification into BUY / SELL / HOLD and the daily scan.
//!
//! A BUY needs the whole checklist to pass: price above the 200-day SMA,
//! %K inside the sweet spot, %K above %D, both oscillator lines rising,
//! volume above its average and steady. A failed checklist becomes a SELL
//! only on a trend break, a head-and-shoulders top or an oscillator
//! breakdown; everything else is a HOLD.

use tracing::{info, warn};

use crate::config::StrategyCfg;
use crate::indicators::{
    cagr, head_and_shoulders, last_mean, stochastic, volume_consistency, volume_ratio,
};
use crate::market_data::{BarStore, DataError};
use crate::types::{Bar, Indicators, Signal, SignalType};

/// Periods of the trend SMAs. The longest one sets the minimum history.
const SMA_PERIODS: [usize; 4] = [25, 50, 100, 200];
pub const MIN_HISTORY: usize = 200;

const BUY_BONUS: f64 = 1.5;
const POWER_STOCK_BONUS: f64 = 1.2;
const POWER_STOCK_K: f64 = 80.0;
const POWER_STOCK_VOLUME: f64 = 1.5;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("{ticker}: insufficient data ({reason})")]
    InsufficientData { ticker: String, reason: String },
    #[error(transparent)]
    Data(#[from] DataError),
}

/// A ticker the scan could not classify.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct ScanFailure {
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResults {
    pub buy: Vec<Signal>,
    pub sell: Vec<Signal>,
    pub hold: Vec<Signal>,
    pub errors: Vec<ScanFailure>,
}

impl ScanResults {
    /// Bucket already-classified signals, e.g. from an external scanner.
    /// Unknown classifications are reported as failures.
    pub fn from_signals(signals: impl IntoIterator<Item = Signal>) -> Self {
        let mut me = Self::default();
        for s in signals {
            me.push(s);
        }
        me
    }

    fn push(&mut self, signal: Signal) {
        match signal.signal_type {
            SignalType::Buy => self.buy.push(signal),
            SignalType::Sell => self.sell.push(signal),
            SignalType::Hold => self.hold.push(signal),
            SignalType::Unknown => self.errors.push(ScanFailure {
                ticker: signal.ticker,
                reason: "unrecognized signal type".to_string(),
            }),
        }
    }

    /// Every classified signal, buys first.
    pub fn signals(&self) -> impl Iterator<Item = &Signal> + Clone {
        self.buy.iter().chain(&self.sell).chain(&self.hold)
    }

    pub fn total(&self) -> usize {
        self.buy.len() + self.sell.len() + self.hold.len() + self.errors.len()
    }
}

struct Snapshot {
    price: f64,
    sma: [Option<f64>; 4],
    k: Option<f64>,
    d: Option<f64>,
    k_then: Option<f64>,
    d_then: Option<f64>,
    volume_sma: Option<f64>,
    volume: f64,
}

impl Snapshot {
    fn sma_200(&self) -> Option<f64> {
        self.sma[3]
    }

    fn take(bars: &[Bar], p: &StrategyCfg) -> Self {
        let last = bars.len() - 1;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let st = stochastic(
            bars,
            p.stochastic_k_period,
            p.stochastic_d_period,
            p.stochastic_smooth,
        );
        let then = last.checked_sub(p.trend_lookback_days);
        Self {
            price: bars[last].close,
            sma: SMA_PERIODS.map(|period| last_mean(&closes, period)),
            k: st.k[last],
            d: st.d[last],
            k_then: then.and_then(|i| st.k[i]),
            d_then: then.and_then(|i| st.d[i]),
            volume_sma: last_mean(&volumes, p.volume_sma_period),
            volume: bars[last].volume,
        }
    }
}

/// Classify one ticker from its bars (sorted by date).
pub fn analyze(ticker: &str, bars: &[Bar], p: &StrategyCfg) -> Result<Signal, ScanError> {
    if bars.len() < MIN_HISTORY {
        return Err(ScanError::InsufficientData {
            ticker: ticker.to_string(),
            reason: format!("{} bars, need {}", bars.len(), MIN_HISTORY),
        });
    }
    let snap = Snapshot::take(bars, p);
    let growth = cagr(bars, p.cagr_years);
    let quality = match snap.k {
        Some(k) => growth * (k / 100.0),
        None => growth,
    };
    let mut indicators = Indicators {
        price: Some(snap.price),
        cagr: Some(growth),
        sma_200: snap.sma_200(),
        stochastic_k: snap.k,
        stochastic_d: snap.d,
        date: bars.last().map(|b| b.date.to_string()),
        ..Default::default()
    };
    let signal = |signal_type: SignalType, quality_score: f64, reason: String, indicators: Indicators| Signal {
        ticker: ticker.to_string(),
        signal_type,
        quality_score,
        reason,
        indicators,
    };

    let (Some(sma_200), Some(k)) = (snap.sma_200(), snap.k) else {
        return Err(ScanError::InsufficientData {
            ticker: ticker.to_string(),
            reason: "indicators not yet defined".to_string(),
        });
    };

    if growth < p.min_cagr {
        return Ok(signal(
            SignalType::Hold,
            quality,
            format!("CAGR {:.2}% below minimum {:.2}%", growth, p.min_cagr),
            indicators,
        ));
    }

    indicators.sma_25 = snap.sma[0];
    indicators.sma_50 = snap.sma[1];
    indicators.sma_100 = snap.sma[2];
    indicators.volume_ratio = volume_ratio(bars, p.volume_sma_period);

    let price_above_sma = snap.price > sma_200;
    let in_sweet_spot = (p.sweet_spot_lower..=p.sweet_spot_upper).contains(&k);
    let (k_above_d, trending_up) = match (snap.d, snap.k_then, snap.d_then) {
        (Some(d), Some(k0), Some(d0)) => (k > d, k > k0 && d > d0),
        _ => (false, false),
    };
    let volume_ok = indicators.volume_ratio.map_or(false, |r| r >= 1.0);
    let consistency = volume_consistency(bars, p.volume_consistency_days);
    let volume_steady = consistency.map_or(false, |c| c.consistent);

    let mut failures = Vec::new();
    if !price_above_sma {
        failures.push(format!("price below SMA 200 ({:.2})", sma_200));
    }
    if !in_sweet_spot {
        failures.push(format!("%K {:.2} outside sweet spot", k));
    }
    if !k_above_d {
        failures.push("%K not above %D".to_string());
    }
    if !trending_up {
        failures.push("oscillator not rising".to_string());
    }
    if !volume_ok {
        failures.push("volume below average".to_string());
    }
    if !volume_steady {
        failures.push("volume inconsistent".to_string());
    }

    if failures.is_empty() {
        let mut reason = format!(
            "checklist pass: price > SMA 200 ({:.2}), %K {:.2} in sweet spot and rising above %D",
            sma_200, k
        );
        if consistency.map_or(false, |c| c.rising) {
            reason.push_str(" | volume rising");
        }
        return Ok(signal(
            SignalType::Buy,
            quality * BUY_BONUS,
            reason,
            indicators,
        ));
    }

    let mut sell_reasons = Vec::new();
    if !price_above_sma {
        sell_reasons.push("trend break below SMA 200".to_string());
    }
    if head_and_shoulders(bars, p.head_shoulders_lookback) {
        sell_reasons.push("head and shoulders top".to_string());
    }
    if k < p.sweet_spot_lower {
        sell_reasons.push(format!("%K {:.2} below {:.0}", k, p.sweet_spot_lower));
    }
    if !sell_reasons.is_empty() {
        return Ok(signal(
            SignalType::Sell,
            quality,
            sell_reasons.join(" | "),
            indicators,
        ));
    }

    let above_all_smas = snap.sma.iter().all(|s| s.map_or(false, |s| snap.price > s));
    let heavy_volume = snap
        .volume_sma
        .map_or(false, |v| snap.volume > v * POWER_STOCK_VOLUME);
    if k > POWER_STOCK_K && above_all_smas && heavy_volume {
        return Ok(signal(
            SignalType::Hold,
            quality * POWER_STOCK_BONUS,
            format!("power stock: overbought %K {:.2} on heavy volume", k),
            indicators,
        ));
    }

    Ok(signal(
        SignalType::Hold,
        quality,
        format!("checklist fail: {}", failures.join(" | ")),
        indicators,
    ))
}

/// Load and classify every ticker. Per-ticker failures are collected, not fatal.
pub fn scan(tickers: &[String], store: &BarStore, p: &StrategyCfg) -> ScanResults {
    let mut results = ScanResults::default();
    for ticker in tickers {
        let outcome = store
            .load(ticker)
            .map_err(ScanError::from)
            .and_then(|bars| analyze(ticker, &bars, p));
        match outcome {
            Ok(signal) => {
                if matches!(signal.signal_type, SignalType::Buy | SignalType::Sell) {
                    info!(
                        "{:?} {} @ {:.2} | quality {:.2}",
                        signal.signal_type,
                        ticker,
                        signal.indicators.price.unwrap_or_default(),
                        signal.quality_score
                    );
                }
                results.push(signal);
            }
            Err(e) => {
                warn!("{:#}", e);
                results.errors.push(ScanFailure {
                    ticker: ticker.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    info!(
        "Scan complete: {} BUY, {} SELL, {} HOLD, {} errors",
        results.buy.len(),
        results.sell.len(),
        results.hold.len(),
        results.errors.len()
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
    }

    /// Steady uptrend with a small zig-zag so the oscillator sits mid-range.
    fn uptrend(len: usize) -> Vec<Bar> {
        (0..len)
            .map(|i| {
                let base = 100.0 * 1.002f64.powi(i as i32);
                let wiggle = if i % 2 == 0 { 0.0 } else { -0.8 };
                let close = base + wiggle;
                Bar {
                    date: start() + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn downtrend(len: usize) -> Vec<Bar> {
        (0..len)
            .map(|i| {
                let close = 300.0 * 0.997f64.powi(i as i32);
                Bar {
                    date: start() + Duration::days(i as i64),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let err = analyze("AAPL", &uptrend(50), &StrategyCfg::default()).unwrap_err();
        assert!(matches!(err, ScanError::InsufficientData { ref ticker, .. } if ticker == "AAPL"));
    }

    #[test]
    fn test_low_growth_is_hold() {
        let p = StrategyCfg {
            min_cagr: 10_000.0,
            ..StrategyCfg::default()
        };
        let s = analyze("AAPL", &uptrend(260), &p).unwrap();
        assert_eq!(s.signal_type, SignalType::Hold);
        assert!(s.reason.starts_with("CAGR"));
        assert_eq!(s.price(), Some(uptrend(260)[259].close));
    }

    #[test]
    fn test_downtrend_is_sell() {
        let p = StrategyCfg {
            min_cagr: -1_000.0,
            ..StrategyCfg::default()
        };
        let s = analyze("INTC", &downtrend(260), &p).unwrap();
        assert_eq!(s.signal_type, SignalType::Sell);
        assert!(s.reason.contains("trend break"));
        assert!(s.indicators.sma_200.unwrap() > s.price().unwrap());
    }

    #[test]
    fn test_uptrend_with_volume_pickup_is_buy() {
        let mut bars = uptrend(261);
        bars[260].volume = 1_200.0;
        let p = StrategyCfg {
            sweet_spot_upper: 95.0,
            ..StrategyCfg::default()
        };
        let s = analyze("NVDA", &bars, &p).unwrap();
        assert_eq!(s.signal_type, SignalType::Buy, "{}", s.reason);
        assert!(s.reason.contains("volume rising"));
        let k = s.indicators.stochastic_k.unwrap();
        let growth = s.indicators.cagr.unwrap();
        assert!((s.quality_score - growth * k / 100.0 * 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_fading_volume_blocks_buy_in_uptrend() {
        let mut bars = uptrend(261);
        bars[260].volume = 500.0;
        let p = StrategyCfg {
            sweet_spot_upper: 95.0,
            ..StrategyCfg::default()
        };
        let s = analyze("MSFT", &bars, &p).unwrap();
        assert_eq!(s.signal_type, SignalType::Hold);
        assert!(s.reason.contains("volume below average"));
        assert!(s.indicators.cagr.unwrap() > 15.0);
    }

    #[test]
    fn test_from_signals_buckets() {
        let mk = |t: &str, ty| Signal {
            ticker: t.into(),
            signal_type: ty,
            quality_score: 0.0,
            reason: String::new(),
            indicators: Indicators::default(),
        };
        let r = ScanResults::from_signals(vec![
            mk("A", SignalType::Buy),
            mk("B", SignalType::Sell),
            mk("C", SignalType::Hold),
            mk("D", SignalType::Unknown),
        ]);
        assert_eq!((r.buy.len(), r.sell.len(), r.hold.len(), r.errors.len()), (1, 1, 1, 1));
        assert_eq!(r.total(), 4);
        assert_eq!(r.signals().count(), 3);
    }

    #[test]
    fn test_scan_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("date,open,high,low,close,volume\n");
        for b in downtrend(260) {
            csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                b.date, b.open, b.high, b.low, b.close, b.volume
            ));
        }
        std::fs::write(dir.path().join("INTC_1d_full.csv"), csv).unwrap();
        let p = StrategyCfg {
            min_cagr: -1_000.0,
            ..StrategyCfg::default()
        };
        let results = scan(
            &["INTC".to_string(), "GONE".to_string()],
            &BarStore::new(dir.path()),
            &p,
        );
        assert_eq!(results.sell.len(), 1);
        assert_eq!(results.errors.len(), 1);
        assert_eq!(results.errors[0].ticker, "GONE");
    }
}
