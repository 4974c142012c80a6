//! Capital allocation gates checked before the buy phase.

use tracing::info;

use crate::config::PortfolioCfg;
use crate::state::Portfolio;

pub const MAX_POSITIONS: usize = 10;
pub const POSITION_SIZE: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationRules {
    pub max_positions: usize,
    /// Dollar amount committed to every new position.
    pub position_size: f64,
}

impl Default for AllocationRules {
    fn default() -> Self {
        Self {
            max_positions: MAX_POSITIONS,
            position_size: POSITION_SIZE,
        }
    }
}

impl From<&PortfolioCfg> for AllocationRules {
    fn from(cfg: &PortfolioCfg) -> Self {
        Self {
            max_positions: cfg.max_positions,
            position_size: cfg.position_size,
        }
    }
}

impl AllocationRules {
    pub fn available_slots(&self, state: &Portfolio) -> usize {
        self.max_positions.saturating_sub(state.position_count())
    }

    pub fn can_afford(&self, state: &Portfolio) -> bool {
        state.cash >= self.position_size
    }

    /// Number of ranked buy candidates to consider, or `None` when the
    /// buy phase must be skipped entirely.
    pub fn buy_budget(&self, state: &Portfolio) -> Option<usize> {
        let slots = self.available_slots(state);
        if slots == 0 {
            info!(
                "Buy phase skipped: {}/{} positions held",
                state.position_count(),
                self.max_positions
            );
            return None;
        }
        if !self.can_afford(state) {
            info!(
                "Buy phase skipped: cash ${:.2} below position size ${:.2}",
                state.cash, self.position_size
            );
            return None;
        }
        Some(slots)
    }

    pub fn shares_for(&self, price: f64) -> f64 {
        self.position_size / price
    }
}
