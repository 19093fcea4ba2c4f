use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{
    engine::{PortfolioSnapshot, Position, Side, Trade},
    errors::{Error, Result},
};

/// Cash account of a run with its trade log and equity samples.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Ledger {
    // Capital the run started with
    initial_capital: f64,
    // Cash not invested in open positions
    cash: f64,
    trades: Vec<Trade>,
    snapshots: Vec<PortfolioSnapshot>,
}

impl Ledger {
    /// Creates a ledger holding `initial_capital` in cash.
    /// Non-positive capital is rejected.
    pub fn new(initial_capital: f64) -> Result<Self> {
        if initial_capital <= 0.0 || !initial_capital.is_finite() {
            return Err(Error::NegZeroBalance(initial_capital));
        }

        Ok(Self {
            initial_capital,
            cash: initial_capital,
            trades: Vec::new(),
            snapshots: Vec::new(),
        })
    }

    /// Returns the initial capital.
    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Returns the available cash.
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Returns the recorded trades.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Returns the recorded equity samples.
    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    /// Subtracts `amount` from the cash, failing when the cash does not cover it.
    pub(crate) fn debit(&mut self, amount: f64) -> Result<f64> {
        if self.cash < amount {
            return Err(Error::InsufficientFunds(amount, self.cash));
        }
        self.cash -= amount;
        Ok(self.cash)
    }

    /// Adds `amount` to the cash.
    pub(crate) fn credit(&mut self, amount: f64) -> f64 {
        self.cash += amount;
        self.cash
    }

    /// Pays for an entry of `quantity` at `price` and records the BUY.
    ///
    /// Returns the opened position, or [`Error::InsufficientFunds`] when the cash is short, in
    /// which case nothing is recorded.
    pub(crate) fn buy(
        &mut self,
        instrument: &str,
        timestamp: DateTime<Utc>,
        price: f64,
        quantity: u64,
        rule_name: &str,
    ) -> Result<Position> {
        let position = Position::new(price, quantity, timestamp);
        self.debit(position.cost())?;
        self.record(Trade {
            id: 0,
            timestamp,
            instrument: instrument.to_string(),
            side: Side::Buy,
            price,
            quantity,
            rule_name: rule_name.to_string(),
            pnl: None,
        });
        Ok(position)
    }

    /// Collects the proceeds of `position` sold at `price` and records the SELL with its P&L.
    pub(crate) fn sell(
        &mut self,
        instrument: &str,
        timestamp: DateTime<Utc>,
        price: f64,
        position: &Position,
        rule_name: &str,
    ) -> &Trade {
        self.credit(position.market_value(price));
        self.record(Trade {
            id: 0,
            timestamp,
            instrument: instrument.to_string(),
            side: Side::Sell,
            price,
            quantity: position.quantity(),
            rule_name: rule_name.to_string(),
            pnl: Some(position.pnl(price)),
        })
    }

    fn record(&mut self, mut trade: Trade) -> &Trade {
        trade.id = self.trades.len() as u64 + 1;
        self.trades.push(trade);
        &self.trades[self.trades.len() - 1]
    }

    /// Returns `cash + Σ mark × quantity` over `holdings`, marking each position at the last
    /// known price of its instrument.
    pub fn equity<'a, I>(&self, holdings: I, marks: &BTreeMap<String, f64>) -> Result<f64>
    where
        I: IntoIterator<Item = (&'a str, &'a Position)>,
    {
        let mut equity = self.cash;
        for (instrument, position) in holdings {
            let mark = marks
                .get(instrument)
                .ok_or_else(|| Error::Unreachable(format!("no price seen for held {instrument}")))?;
            equity += position.market_value(*mark);
        }
        Ok(equity)
    }

    /// Appends an equity sample.
    pub(crate) fn snapshot(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        self.snapshots.push(PortfolioSnapshot { timestamp, equity });
    }

    /// Splits the ledger into its trades and snapshots.
    pub(crate) fn into_parts(self) -> (Vec<Trade>, Vec<PortfolioSnapshot>) {
        (self.trades, self.snapshots)
    }
}
