//! # rules-bt: backtest rule-based trading strategies
//!
//! **rules-bt** replays a time-ordered price series for one or more instruments through a set of
//! simple trading rules and reports the resulting trade log, equity curve and performance metrics.
//! It answers "what if I had traded with these rules?" before any capital is at risk.
//!
//! ## Core Components
//! | Component        | Description                                                                          |
//! |------------------|--------------------------------------------------------------------------------------|
//! | **`PriceBar`**   | One `(timestamp, price, volume)` sample of an instrument.                            |
//! | **`Rule`**       | Threshold, moving-average or profit/loss exit rule with a fixed quantity.            |
//! | **`IndicatorCache`** | Rolling averages per instrument, keyed by window length.                         |
//! | **`PositionBook`** | Per-instrument `Flat` / `Holding` state machine.                                   |
//! | **`Ledger`**     | Cash, trade log and equity snapshots.                                                |
//! | **`Backtest`**   | The driver that walks the merged timeline of every instrument.                       |
//! | **`Metrics`**    | Wins, losses, P&L, return and max drawdown.                                          |
//!
//! ## Rules
//! | Rule                   | Side | Fires when                                                               |
//! |------------------------|------|--------------------------------------------------------------------------|
//! | **Threshold (entry)**  | BUY  | price/volume moved by at least `percent` since the previous bar.         |
//! | **Threshold (exit)**   | SELL | the open position moved by at least `percent` since entry.               |
//! | **Indicator cross**    | BUY  | the short moving average is below the long one (mean reversion).         |
//! | **Threshold exit**     | SELL | position P&L reached the profit target and/or the loss limit.            |
//!
//! Entries are checked only while an instrument is flat and exits only while it is held; the first
//! enabled rule that fires wins. Open positions are liquidated at the last price when the run ends.
//!
//! ## Getting Started
//! ```rust
//! use rules_bt::prelude::*;
//! use chrono::NaiveDate;
//!
//! let mut rules = RuleSet::default();
//! rules
//!     .push(Rule::Threshold(ThresholdRule {
//!         name: "Dip".into(),
//!         side: Side::Buy,
//!         metric: Metric::Price,
//!         direction: Direction::Decrease,
//!         percent: 3.0,
//!         quantity: 10,
//!     }))
//!     .unwrap();
//! rules
//!     .push(Rule::Threshold(ThresholdRule {
//!         name: "Take profit".into(),
//!         side: Side::Sell,
//!         metric: Metric::Price,
//!         direction: Direction::Increase,
//!         percent: 2.0,
//!         quantity: 10,
//!     }))
//!     .unwrap();
//!
//! let config = BacktestConfig::new(
//!     vec!["XYZ".to_string()],
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
//!     100_000.0,
//!     rules,
//! );
//!
//! let provider = SyntheticProvider::new(42);
//! let result = Backtest::new(config).unwrap().run(&provider).unwrap();
//! let metrics = Metrics::from(&result);
//! println!("{metrics}");
//! ```
//!
//! ## Error Handling
//! Configuration problems (no instruments, no enabled rules, bad rule parameters) are rejected
//! before the simulation starts. Running out of cash is not an error: the entry is skipped.
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core simulation components: bars, rules, positions, ledger and the backtest driver.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Utility functions and helpers.
mod utils;

/// Performance metrics: P&L, return, drawdown, win rate.
pub mod metrics;

/// JSON request/response boundary.
#[cfg(feature = "serde")]
pub mod report;

/// Parallel batch runs over rule-set combinations.
#[cfg(feature = "parallel")]
pub mod optimizer;

/// Draw equity curves and trades with a lot of backends: png, svg.
#[cfg(feature = "draws")]
pub mod draws;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::metrics::*;

    #[cfg(feature = "serde")]
    pub use crate::report::*;

    #[cfg(feature = "parallel")]
    pub use crate::optimizer::*;

    #[cfg(feature = "draws")]
    pub use crate::draws::*;
}

use std::ops::{Add, Div, Mul, Sub};

/// Trait for performing percentage-based calculations.
pub trait PercentCalculus<Rhs = Self> {
    /// Adds a percentage to the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to add (e.g., 10.0 for 10%).
    fn addpercent(self, rhs: Rhs) -> Self;

    /// Calculates the percentage change between two values.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn change(self, new: Self) -> Self;
}

impl PercentCalculus for f64 {
    fn addpercent(self, percent: Self) -> Self {
        self.add(self.mul(percent.div(100.0)))
    }

    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn add() {
        assert_eq!(110.0, 100.0.addpercent(10.0))
    }

    #[test]
    fn sub() {
        assert_eq!(90.0, 100.0.addpercent(-10.0))
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.change(110.0));
        assert_eq!(-50.0, 100.0.change(50.0));
    }
}
