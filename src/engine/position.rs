use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{
    PercentCalculus,
    errors::{Error, Result},
};

/// An open holding of an instrument.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    entry_price: f64,
    quantity: u64,
    entry_timestamp: DateTime<Utc>,
}

impl Position {
    /// Creates a position opened at `entry_price`.
    pub fn new(entry_price: f64, quantity: u64, entry_timestamp: DateTime<Utc>) -> Self {
        Self {
            entry_price,
            quantity,
            entry_timestamp,
        }
    }

    /// Returns the entry price.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// Returns the held quantity.
    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    /// Returns when the position was opened.
    pub fn entry_timestamp(&self) -> DateTime<Utc> {
        self.entry_timestamp
    }

    /// Returns the cash paid to open the position.
    pub fn cost(&self) -> f64 {
        self.entry_price * self.quantity as f64
    }

    /// Returns the value of the position marked at `price`.
    pub fn market_value(&self, price: f64) -> f64 {
        price * self.quantity as f64
    }

    /// Returns the realized P&L if the position were closed at `exit_price`.
    pub fn pnl(&self, exit_price: f64) -> f64 {
        (exit_price - self.entry_price) * self.quantity as f64
    }

    /// Returns the P&L percent of the position at `price`, relative to the entry price.
    pub fn pnl_percent(&self, price: f64) -> f64 {
        self.entry_price.change(price)
    }
}

/// Position state of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PositionState {
    /// No open position: only entries are evaluated.
    #[default]
    Flat,
    /// A position is open: only exits are evaluated.
    Holding(Position),
}

#[derive(Debug, Clone, Default)]
struct Slot {
    state: PositionState,
    last_trade: Option<DateTime<Utc>>,
}

/// Per-instrument `Flat` / `Holding` state machine.
///
/// Entries are only authorized while flat and exits only while holding. Each instrument trades at
/// most once per bar. Forced liquidation at the end of a run bypasses the per-bar guard.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    slots: BTreeMap<String, Slot>,
}

impl PositionBook {
    /// Creates a book with every instrument flat.
    pub fn new<I, S>(instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: instruments.into_iter().map(|i| (i.into(), Slot::default())).collect(),
        }
    }

    fn slot(&self, instrument: &str) -> Result<&Slot> {
        self.slots
            .get(instrument)
            .ok_or_else(|| Error::Unreachable(format!("unknown instrument {instrument}")))
    }

    fn slot_mut(&mut self, instrument: &str) -> Result<&mut Slot> {
        self.slots
            .get_mut(instrument)
            .ok_or_else(|| Error::Unreachable(format!("unknown instrument {instrument}")))
    }

    /// Returns the state of `instrument`.
    pub fn state(&self, instrument: &str) -> Result<PositionState> {
        Ok(self.slot(instrument)?.state)
    }

    /// Returns the open position of `instrument`, if any.
    pub fn position(&self, instrument: &str) -> Option<&Position> {
        match self.slots.get(instrument).map(|s| &s.state) {
            Some(PositionState::Holding(position)) => Some(position),
            _ => None,
        }
    }

    /// Returns `true` when `instrument` already traded at `at`.
    pub fn traded_at(&self, instrument: &str, at: DateTime<Utc>) -> bool {
        self.slots.get(instrument).and_then(|s| s.last_trade) == Some(at)
    }

    /// Returns the open positions, ordered by instrument.
    pub fn holdings(&self) -> impl Iterator<Item = (&str, &Position)> {
        self.slots.iter().filter_map(|(instrument, slot)| match &slot.state {
            PositionState::Holding(position) => Some((instrument.as_str(), position)),
            PositionState::Flat => None,
        })
    }

    /// `Flat → Holding`.
    pub fn open(&mut self, instrument: &str, position: Position) -> Result<()> {
        let at = position.entry_timestamp();
        let slot = self.slot_mut(instrument)?;
        if slot.last_trade == Some(at) {
            return Err(Error::Unreachable(format!("{instrument} already traded at {at}")));
        }
        if let PositionState::Holding(_) = slot.state {
            return Err(Error::Unreachable(format!("entry on {instrument} while holding")));
        }
        slot.state = PositionState::Holding(position);
        slot.last_trade = Some(at);
        Ok(())
    }

    /// `Holding → Flat` on a rule exit at `at`.
    pub fn close(&mut self, instrument: &str, at: DateTime<Utc>) -> Result<Position> {
        let slot = self.slot_mut(instrument)?;
        if slot.last_trade == Some(at) {
            return Err(Error::Unreachable(format!("{instrument} already traded at {at}")));
        }
        let position = Self::take(instrument, slot)?;
        slot.last_trade = Some(at);
        Ok(position)
    }

    /// `Holding → Flat` at the end of the run, regardless of the bar guard.
    pub fn liquidate(&mut self, instrument: &str) -> Result<Position> {
        let slot = self.slot_mut(instrument)?;
        Self::take(instrument, slot)
    }

    fn take(instrument: &str, slot: &mut Slot) -> Result<Position> {
        match std::mem::take(&mut slot.state) {
            PositionState::Holding(position) => Ok(position),
            PositionState::Flat => Err(Error::Unreachable(format!("exit on {instrument} while flat"))),
        }
    }
}
