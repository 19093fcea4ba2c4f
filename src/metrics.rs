//! Performance metrics for backtesting.
//!
//! This module provides tools to calculate:
//! - Win / loss counts and total P&L over closed trades
//! - Percent return
//! - Max drawdown of the equity curve
//! - Profit factor
//! - Win rate

use std::fmt;

use crate::engine::*;

/// Key performance indicators of a run.
///
/// Only SELL trades carry a P&L, so wins, losses, total P&L, win rate and profit factor are all
/// computed over closed positions. A trade with exactly zero P&L is neither a win nor a loss.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    total_trades: usize,
    winning_trades: usize,
    losing_trades: usize,
    total_pnl: f64,
    gross_profit: f64,
    gross_loss: f64,
    initial_capital: f64,
    final_equity: f64,
    max_drawdown: f64,
}

impl From<&BacktestResult> for Metrics {
    fn from(value: &BacktestResult) -> Self {
        let equity = value.snapshots().iter().map(|s| s.equity).collect::<Vec<_>>();
        Self::new(value.trades(), &equity, value.initial_capital(), value.final_cash())
    }
}

impl Metrics {
    /// Computes the metrics of a trade log and an equity curve.
    ///
    /// ### Arguments
    /// * `trades` - Executed trades.
    /// * `equity` - Sampled equity values, in time order.
    /// * `initial_capital` - Starting cash.
    /// * `final_cash` - Cash after the end-of-run liquidation.
    pub fn new(trades: &[Trade], equity: &[f64], initial_capital: f64, final_cash: f64) -> Self {
        let closed = trades.iter().filter_map(|t| t.pnl).collect::<Vec<_>>();
        Self {
            total_trades: trades.len(),
            winning_trades: closed.iter().filter(|pnl| **pnl > 0.0).count(),
            losing_trades: closed.iter().filter(|pnl| **pnl < 0.0).count(),
            total_pnl: closed.iter().sum(),
            gross_profit: closed.iter().filter(|pnl| **pnl > 0.0).sum(),
            gross_loss: closed.iter().filter(|pnl| **pnl < 0.0).map(|pnl| pnl.abs()).sum(),
            initial_capital,
            final_equity: final_cash,
            max_drawdown: max_drawdown(equity, initial_capital),
        }
    }

    /// Returns the number of trades, BUY and SELL.
    pub fn total_trades(&self) -> usize {
        self.total_trades
    }

    /// Returns the number of closed trades with a positive P&L.
    pub fn winning_trades(&self) -> usize {
        self.winning_trades
    }

    /// Returns the number of closed trades with a negative P&L.
    pub fn losing_trades(&self) -> usize {
        self.losing_trades
    }

    /// Returns the sum of the realized P&L.
    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }

    /// Returns the starting cash.
    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Returns the cash once every position was closed.
    pub fn final_equity(&self) -> f64 {
        self.final_equity
    }

    /// Returns `(final - initial) / initial` as a percentage.
    pub fn percent_return(&self) -> f64 {
        (self.final_equity - self.initial_capital) / self.initial_capital * 100.0
    }

    /// Returns the largest decline from a running peak of the equity curve, as a percentage.
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Computes the profit factor: gross profit over gross loss, infinite without losses.
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss == 0.0 {
            return f64::INFINITY;
        }

        self.gross_profit / self.gross_loss
    }

    /// Computes the win rate as a percentage of closed trades.
    pub fn win_rate(&self) -> f64 {
        let closed = self.winning_trades + self.losing_trades;
        if closed == 0 {
            return 0.0;
        }

        (self.winning_trades as f64 / closed as f64) * 100.0
    }
}

/// Running peak starts at the initial capital, so a curve that only falls still reports its drop.
fn max_drawdown(equity: &[f64], initial_capital: f64) -> f64 {
    let mut max_peak = initial_capital;
    let mut max_drawdown = 0.0;

    for &value in equity {
        if value > max_peak {
            max_peak = value;
        }
        let drawdown = (max_peak - value) / max_peak;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    max_drawdown * 100.0
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Metrics ===")?;
        writeln!(f, "Initial Capital: {:.2}", self.initial_capital)?;
        writeln!(f, "Final Equity: {:.2}", self.final_equity)?;
        writeln!(f, "Profit & Loss (P&L): {:.2}", self.total_pnl)?;
        writeln!(f, "Return: {:.2}%", self.percent_return())?;
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(
            f,
            "Trades: {} ({} won, {} lost)",
            self.total_trades, self.winning_trades, self.losing_trades
        )?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor())?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate())
    }
}
