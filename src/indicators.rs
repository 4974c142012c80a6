//! Technical indicators over daily bars.
//!
//! Rolling values are `None` until their window is full, and whenever any
//! input inside the window is undefined.

use chrono::{Duration, NaiveDate};

use crate::types::Bar;

const DAYS_PER_YEAR: f64 = 365.25;
/// Cap on the CAGR lookback so the cutoff date stays representable.
const MAX_SPAN_DAYS: f64 = 1.0e7;

/// Wraps raw values, treating non-finite ones as undefined.
pub fn series(values: impl IntoIterator<Item = f64>) -> Vec<Option<f64>> {
    values
        .into_iter()
        .map(|v| if v.is_finite() { Some(v) } else { None })
        .collect()
}

fn rolling<F>(values: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if window == 0 || i + 1 < window {
            out.push(None);
            continue;
        }
        let defined: Option<Vec<f64>> = values[i + 1 - window..=i].iter().copied().collect();
        out.push(defined.map(|w| f(&w)));
    }
    out
}

fn mean(w: &[f64]) -> f64 {
    w.iter().sum::<f64>() / w.len() as f64
}

pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, mean)
}

pub fn rolling_min(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_max(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Mean of the trailing `period` values, if there are that many.
pub fn last_mean(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let m = mean(&values[values.len() - period..]);
    m.is_finite().then_some(m)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stochastic {
    /// Smoothed %K.
    pub k: Vec<Option<f64>>,
    /// %D, the moving average of smoothed %K.
    pub d: Vec<Option<f64>>,
}

/// Slow stochastic oscillator. Raw %K is undefined on a flat high/low range.
pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize, smooth: usize) -> Stochastic {
    let lowest = rolling_min(&series(bars.iter().map(|b| b.low)), k_period);
    let highest = rolling_max(&series(bars.iter().map(|b| b.high)), k_period);
    let raw: Vec<Option<f64>> = bars
        .iter()
        .zip(lowest.iter().zip(&highest))
        .map(|(bar, range)| match range {
            (Some(lo), Some(hi)) if hi > lo => Some(100.0 * (bar.close - lo) / (hi - lo)),
            _ => None,
        })
        .collect();
    let k = sma(&raw, smooth);
    let d = sma(&k, d_period);
    Stochastic { k, d }
}

/// Compound annual growth rate in percent over roughly the last `years`
/// years of `bars` (sorted by date). Falls back to the full history when
/// the window holds fewer than two bars, and to 0 when no rate is defined.
pub fn cagr(bars: &[Bar], years: f64) -> f64 {
    let Some(end) = bars.last() else {
        return 0.0;
    };
    if bars.len() < 2 {
        return 0.0;
    }
    let span = (years * DAYS_PER_YEAR).clamp(0.0, MAX_SPAN_DAYS) as i64;
    let cutoff = end
        .date
        .checked_sub_signed(Duration::days(span))
        .unwrap_or(NaiveDate::MIN);
    let start_idx = bars.partition_point(|b| b.date < cutoff);
    let window = if bars.len() - start_idx < 2 {
        bars
    } else {
        &bars[start_idx..]
    };

    let first = &window[0];
    let last = &window[window.len() - 1];
    let elapsed = (last.date - first.date).num_days() as f64 / DAYS_PER_YEAR;
    if elapsed <= 0.0 || first.close <= 0.0 {
        return 0.0;
    }
    let rate = ((last.close / first.close).powf(1.0 / elapsed) - 1.0) * 100.0;
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

/// Last volume relative to its trailing average.
pub fn volume_ratio(bars: &[Bar], period: usize) -> Option<f64> {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let avg = last_mean(&volumes, period)?;
    let last = volumes.last()?;
    (avg > 0.0).then(|| last / avg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeConsistency {
    /// Every recent volume within two sample standard deviations of the mean.
    pub consistent: bool,
    /// Last volume above the recent mean.
    pub rising: bool,
}

pub fn volume_consistency(bars: &[Bar], days: usize) -> Option<VolumeConsistency> {
    if days < 2 || bars.len() < days {
        return None;
    }
    let recent: Vec<f64> = bars[bars.len() - days..].iter().map(|b| b.volume).collect();
    let m = mean(&recent);
    let var = recent.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (days - 1) as f64;
    let std = var.sqrt();
    let consistent = recent.iter().all(|v| (v - m).abs() <= 2.0 * std);
    let rising = recent[days - 1] > m;
    Some(VolumeConsistency { consistent, rising })
}

/// Bearish head-and-shoulders over the last `lookback` bars: the last three
/// local highs have a highest middle peak, shoulders within 20% of each
/// other, and a right shoulder below the left.
pub fn head_and_shoulders(bars: &[Bar], lookback: usize) -> bool {
    if lookback < 3 || bars.len() < lookback {
        return false;
    }
    let highs: Vec<f64> = bars[bars.len() - lookback..].iter().map(|b| b.high).collect();
    let peaks: Vec<f64> = highs
        .windows(3)
        .filter(|w| w[1] > w[0] && w[1] > w[2])
        .map(|w| w[1])
        .collect();
    if peaks.len() < 3 {
        return false;
    }
    let (left, head, right) = (
        peaks[peaks.len() - 3],
        peaks[peaks.len() - 2],
        peaks[peaks.len() - 1],
    );
    let head_highest = head > left && head > right;
    let similar = (left - right).abs() / left.max(right) < 0.2;
    head_highest && similar && right < left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: NaiveDate, close: f64) -> Bar {
        Bar {
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sma_window() {
        let v = series([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sma(&v, 2), vec![None, Some(1.5), Some(2.5), Some(3.5)]);
        assert_eq!(sma(&v, 5), vec![None; 4]);
    }

    #[test]
    fn test_sma_undefined_input_poisons_window() {
        let v = series([1.0, f64::NAN, 3.0, 4.0, 5.0]);
        assert_eq!(sma(&v, 2), vec![None, None, None, Some(3.5), Some(4.5)]);
    }

    #[test]
    fn test_rolling_extremes() {
        let v = series([3.0, 1.0, 2.0]);
        assert_eq!(rolling_min(&v, 2), vec![None, Some(1.0), Some(1.0)]);
        assert_eq!(rolling_max(&v, 2), vec![None, Some(3.0), Some(2.0)]);
    }

    #[test]
    fn test_stochastic_at_top_of_range() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<Bar> = (0..10)
            .map(|i| {
                let c = 10.0 + i as f64;
                Bar {
                    date: start + Duration::days(i),
                    open: c,
                    high: c,
                    low: c - 2.0,
                    close: c,
                    volume: 1.0,
                }
            })
            .collect();
        let st = stochastic(&bars, 3, 2, 2);
        // closes at the high of every window
        assert_eq!(st.k[3], Some(100.0));
        assert_eq!(st.d[4], Some(100.0));
        assert_eq!(st.k[2], None);
        assert_eq!(st.d[3], None);
    }

    #[test]
    fn test_stochastic_flat_range_is_undefined() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<Bar> = (0..6)
            .map(|i| Bar {
                date: start + Duration::days(i),
                open: 5.0,
                high: 5.0,
                low: 5.0,
                close: 5.0,
                volume: 1.0,
            })
            .collect();
        let st = stochastic(&bars, 2, 1, 1);
        assert!(st.k.iter().all(Option::is_none));
    }

    #[test]
    fn test_cagr_doubling_over_two_years() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = start + Duration::days(730);
        let bars = vec![bar(start, 100.0), bar(end, 400.0)];
        let expected = ((4.0f64).powf(1.0 / (730.0 / 365.25)) - 1.0) * 100.0;
        assert!(approx(cagr(&bars, 2.0), expected));
    }

    #[test]
    fn test_cagr_uses_recent_window() {
        let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let mid = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let end = mid + Duration::days(365);
        let bars = vec![bar(start, 1.0), bar(mid, 100.0), bar(end, 110.0)];
        let expected = ((1.1f64).powf(1.0 / (365.0 / 365.25)) - 1.0) * 100.0;
        assert!(approx(cagr(&bars, 2.0), expected));
    }

    #[test]
    fn test_cagr_degenerate_inputs() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(cagr(&[], 2.0), 0.0);
        assert_eq!(cagr(&[bar(d, 10.0)], 2.0), 0.0);
        assert_eq!(cagr(&[bar(d, 10.0), bar(d, 12.0)], 2.0), 0.0);
        assert_eq!(cagr(&[bar(d, 0.0), bar(d + Duration::days(5), 12.0)], 2.0), 0.0);
    }

    #[test]
    fn test_cagr_oversized_lookback_uses_full_history() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let bars = vec![bar(start, 100.0), bar(start + Duration::days(730), 400.0)];
        let full = cagr(&bars, 2.0);
        assert!(approx(cagr(&bars, 1.0e6), full));
        assert!(approx(cagr(&bars, 1.0e300), full));
        assert!(approx(cagr(&bars, f64::INFINITY), full));
    }

    #[test]
    fn test_volume_ratio() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut bars: Vec<Bar> = (0..4).map(|i| bar(d + Duration::days(i), 10.0)).collect();
        bars[3].volume = 2_500.0;
        // (1000 + 1000 + 2500) / 3 = 1500
        assert!(approx(volume_ratio(&bars, 3).unwrap(), 2_500.0 / 1_500.0));
        assert_eq!(volume_ratio(&bars, 5), None);
    }

    #[test]
    fn test_volume_consistency() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut bars: Vec<Bar> = (0..5).map(|i| bar(d + Duration::days(i), 10.0)).collect();
        let flat = volume_consistency(&bars, 5).unwrap();
        assert!(flat.consistent);
        assert!(!flat.rising);

        for (b, v) in bars.iter_mut().zip([100.0, 110.0, 105.0, 95.0, 140.0]) {
            b.volume = v;
        }
        let vc = volume_consistency(&bars, 5).unwrap();
        assert!(vc.consistent);
        assert!(vc.rising);
        assert_eq!(volume_consistency(&bars, 6), None);
    }

    #[test]
    fn test_head_and_shoulders() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let highs = [10.0, 12.0, 10.0, 15.0, 10.0, 11.5, 10.0];
        let bars: Vec<Bar> = highs
            .iter()
            .enumerate()
            .map(|(i, h)| Bar {
                high: *h,
                ..bar(d + Duration::days(i as i64), 9.0)
            })
            .collect();
        assert!(head_and_shoulders(&bars, 7));
        assert!(!head_and_shoulders(&bars, 8));

        let mut rising = bars.clone();
        rising[5].high = 12.5;
        assert!(!head_and_shoulders(&rising, 7));
    }
}
