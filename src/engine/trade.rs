use chrono::{DateTime, Utc};

use crate::engine::Side;

/// Rule name recorded on trades closed by the end-of-run liquidation.
pub const END_OF_BACKTEST: &str = "End of Backtest";

/// An executed trade. Immutable once recorded.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Sequence number within the run, starting at 1.
    pub id: u64,
    /// Bar the trade was executed on.
    pub timestamp: DateTime<Utc>,
    /// Traded instrument.
    pub instrument: String,
    /// Buy or sell.
    pub side: Side,
    /// Fill price (the sampled bar price).
    pub price: f64,
    /// Filled quantity.
    pub quantity: u64,
    /// Name of the rule that fired.
    pub rule_name: String,
    /// Realized P&L, present on sells only.
    pub pnl: Option<f64>,
}

impl Trade {
    /// Returns the cash value of the trade.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity as f64
    }

    /// Returns `true` for trades closed by the end-of-run liquidation.
    pub fn is_liquidation(&self) -> bool {
        self.rule_name == END_OF_BACKTEST
    }
}

/// Total equity at an instant: cash plus open positions marked to market.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioSnapshot {
    /// Sample instant.
    pub timestamp: DateTime<Utc>,
    /// `cash + Σ mark × quantity`.
    pub equity: f64,
}
