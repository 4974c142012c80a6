//! Paper portfolio tracker: applies one day's signal batch to the portfolio.
//!
//! Sells run to completion before any buy is considered, so exit proceeds
//! can be reinvested the same day. Buy signals are taken in the order given;
//! ranking them is the caller's job.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::risk::AllocationRules;
use crate::state::Portfolio;
use crate::types::{ExecutedTrades, Side, Signal, SignalType, Trade};
use crate::utils::sanitize_symbol;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{side} signal for {ticker} has no usable price")]
    MissingPrice { ticker: String, side: Side },
    #[error("{side} {ticker} at {price} overflows the portfolio amounts")]
    Overflow { ticker: String, side: Side, price: f64 },
}

/// Portfolio after a batch, with the trades that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub portfolio: Portfolio,
    pub trades: ExecutedTrades,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    rules: AllocationRules,
}

impl Tracker {
    pub fn new(rules: AllocationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AllocationRules {
        &self.rules
    }

    /// Compute the next portfolio from `portfolio` and today's signals.
    ///
    /// Signals whose type does not match the list they arrive in are ignored.
    /// A signal that would execute without a usable price fails the whole
    /// batch; `portfolio` is never touched either way.
    pub fn apply_signals(
        &self,
        portfolio: &Portfolio,
        buy_signals: &[Signal],
        sell_signals: &[Signal],
        today: NaiveDate,
    ) -> Result<Applied, TrackerError> {
        let mut next = portfolio.clone();
        let mut trades = ExecutedTrades::default();

        for signal in sell_signals {
            if signal.signal_type != SignalType::Sell {
                debug!("Ignoring {:?} signal for {} in sell list", signal.signal_type, signal.ticker);
                continue;
            }
            let ticker = sanitize_symbol(&signal.ticker);
            if !next.holds(&ticker) {
                continue;
            }
            let price = signal.price().ok_or_else(|| TrackerError::MissingPrice {
                ticker: ticker.clone(),
                side: Side::Sell,
            })?;
            let exit_value = next.positions.get(&ticker).map_or(0.0, |p| p.shares * price);
            if !(exit_value.is_finite() && (next.cash + exit_value).is_finite()) {
                return Err(TrackerError::Overflow {
                    ticker,
                    side: Side::Sell,
                    price,
                });
            }
            if let Some(trade) = next.close_position(&ticker, price, today) {
                if let Trade::Sell {
                    shares,
                    profit_loss,
                    profit_loss_pct,
                    ..
                } = &trade
                {
                    info!(
                        "SOLD {}: {:.4} shares @ ${:.2} | P/L ${:.2} ({:.2}%)",
                        ticker, shares, price, profit_loss, profit_loss_pct
                    );
                }
                trades.sells.push(trade);
            }
        }

        if let Some(slots) = self.rules.buy_budget(&next) {
            let candidates = buy_signals
                .iter()
                .filter(|s| {
                    let keep = s.signal_type == SignalType::Buy;
                    if !keep {
                        debug!("Ignoring {:?} signal for {} in buy list", s.signal_type, s.ticker);
                    }
                    keep
                })
                .take(slots);
            for signal in candidates {
                let ticker = sanitize_symbol(&signal.ticker);
                if next.holds(&ticker) {
                    debug!("Already holding {}, skipping", ticker);
                    continue;
                }
                if !self.rules.can_afford(&next) {
                    info!("Cash ${:.2} below position size, stopping buys", next.cash);
                    break;
                }
                let price = signal.price().ok_or_else(|| TrackerError::MissingPrice {
                    ticker: ticker.clone(),
                    side: Side::Buy,
                })?;
                let shares = self.rules.shares_for(price);
                if !(shares.is_finite() && (shares * price).is_finite()) {
                    return Err(TrackerError::Overflow {
                        ticker,
                        side: Side::Buy,
                        price,
                    });
                }
                let trade = next.open_position(&ticker, shares, price, today, signal.quality_score);
                info!(
                    "BOUGHT {}: {:.4} shares @ ${:.2} | cost ${:.2}",
                    ticker,
                    shares,
                    price,
                    shares * price
                );
                trades.buys.push(trade);
            }
        }

        Ok(Applied {
            portfolio: next,
            trades,
        })
    }
}
