//! Core simulation components.
//!
//! This module provides the fundamental types for backtesting:
//! - `PriceBar`: one sample of an instrument.
//! - `Rule`: entry and exit conditions, grouped in an ordered `RuleSet`.
//! - `IndicatorCache`: rolling means shared by the indicator rules.
//! - `PositionBook`: per-instrument `Flat` / `Holding` state.
//! - `Ledger`: cash, trade log and equity samples.
//! - `Backtest`: the driver walking the merged timeline.

mod bar;
mod config;
mod indicator;
mod ledger;
mod position;
mod provider;
mod rule;
mod trade;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};

pub use bar::*;
pub use config::*;
pub use indicator::*;
pub use ledger::*;
pub use position::*;
pub use provider::*;
pub use rule::*;
pub use trade::*;

/// Outcome of a run: the trade log and the equity curve.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    initial_capital: f64,
    final_cash: f64,
    trades: Vec<Trade>,
    snapshots: Vec<PortfolioSnapshot>,
}

impl BacktestResult {
    /// Returns the capital the run started with.
    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Returns the cash left once every position was liquidated.
    pub fn final_cash(&self) -> f64 {
        self.final_cash
    }

    /// Returns the executed trades, in execution order.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Returns the equity samples, first and last included.
    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }
}

/// Series of one instrument and the position of the next unread bar.
struct Feed<'a> {
    instrument: &'a str,
    bars: &'a [PriceBar],
    cursor: usize,
}

impl<'a> Feed<'a> {
    /// Returns the bar stamped `timestamp` with its index and moves past it, or `None` when the
    /// instrument has no bar at that instant.
    fn advance(&mut self, timestamp: DateTime<Utc>) -> Option<(usize, &'a PriceBar)> {
        let bars = self.bars;
        let bar = bars.get(self.cursor).filter(|bar| bar.timestamp() == timestamp)?;
        self.cursor += 1;
        Some((self.cursor - 1, bar))
    }

    fn previous(&self, index: usize) -> Option<&'a PriceBar> {
        let bars = self.bars;
        index.checked_sub(1).and_then(|i| bars.get(i))
    }
}

/// Backtest driver.
///
/// At every instant of the merged timeline, instruments are processed in configured order so that
/// entries competing for the same cash always resolve the same way. A flat instrument evaluates
/// its enabled BUY rules, a held one its enabled SELL rules, and the first rule that fires is
/// executed. Entries the cash does not cover are skipped. Positions still open after the last
/// instant are sold at their instrument's last price.
#[derive(Debug, Clone)]
pub struct Backtest {
    config: BacktestConfig,
}

impl Backtest {
    /// Creates a backtest from a validated configuration.
    ///
    /// ### Arguments
    /// * `config` - Instruments, date range, capital and rules.
    ///
    /// ### Returns
    /// The backtest, or the first configuration problem found.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Pulls every series from `provider` and runs the simulation.
    ///
    /// ### Arguments
    /// * `provider` - Source of the price series.
    ///
    /// ### Returns
    /// The trade log and equity curve, or an error when a series is malformed.
    pub fn run<P>(&self, provider: &P) -> Result<BacktestResult>
    where
        P: PriceSeriesProvider + ?Sized,
    {
        let config = &self.config;
        let mut series = Vec::with_capacity(config.instruments.len());
        for instrument in &config.instruments {
            let bars = provider.series(instrument, config.start, config.end, config.granularity)?;
            validate_series(instrument, &bars)?;
            if bars.is_empty() {
                warn!("no price data for {instrument} between {} and {}, skipping", config.start, config.end);
                continue;
            }
            series.push((instrument.as_str(), bars));
        }
        self.simulate(&series)
    }

    fn simulate(&self, series: &[(&str, Vec<PriceBar>)]) -> Result<BacktestResult> {
        let config = &self.config;
        let timeline = series
            .iter()
            .flat_map(|(_, bars)| bars.iter().map(PriceBar::timestamp))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        info!(
            instruments = series.len(),
            timestamps = timeline.len(),
            granularity = %config.granularity,
            "starting backtest"
        );

        let mut ledger = Ledger::new(config.initial_capital)?;
        let mut book = PositionBook::new(config.instruments.iter().cloned());
        let mut indicators = IndicatorCache::new(config.rules.windows());
        let mut marks = BTreeMap::new();
        let mut feeds = series
            .iter()
            .map(|(instrument, bars)| Feed {
                instrument: *instrument,
                bars: bars.as_slice(),
                cursor: 0,
            })
            .collect::<Vec<_>>();

        let (Some(first), Some(last)) = (timeline.first().copied(), timeline.last().copied()) else {
            warn!("empty timeline, nothing to simulate");
            let start = config.start.and_time(NaiveTime::MIN).and_utc();
            let end = config.end.and_time(NaiveTime::MIN).and_utc();
            ledger.snapshot(start, ledger.initial_capital());
            ledger.snapshot(end, ledger.cash());
            return Ok(Self::finish(ledger));
        };

        ledger.snapshot(first, ledger.initial_capital());
        let step = config.sampling.step(timeline.len());
        let mut last_sample = first;

        for (i, &timestamp) in timeline.iter().enumerate() {
            for feed in feeds.iter_mut() {
                let Some((index, bar)) = feed.advance(timestamp) else {
                    continue;
                };
                indicators.update(feed.instrument, bar.price());
                marks.insert(feed.instrument.to_string(), bar.price());

                let position = book.position(feed.instrument).copied();
                let ctx = EvalContext {
                    instrument: feed.instrument,
                    index,
                    previous: feed.previous(index),
                    current: bar,
                    position: position.as_ref(),
                    indicators: &indicators,
                };
                self.step(&ctx, &mut ledger, &mut book)?;
            }

            if i == 0 || i + 1 == timeline.len() {
                continue;
            }
            let due = match (step, config.sampling) {
                (Some(step), _) => i % step == 0,
                (None, SamplingPolicy::Interval(interval)) => timestamp - last_sample >= interval,
                (None, _) => false,
            };
            if due {
                let equity = ledger.equity(book.holdings(), &marks)?;
                ledger.snapshot(timestamp, equity);
                last_sample = timestamp;
            }
        }

        for feed in &feeds {
            if book.position(feed.instrument).is_none() {
                continue;
            }
            let bar = feed
                .bars
                .last()
                .ok_or_else(|| Error::Unreachable(format!("{} held without a bar", feed.instrument)))?;
            let position = book.liquidate(feed.instrument)?;
            let trade = ledger.sell(feed.instrument, bar.timestamp(), bar.price(), &position, END_OF_BACKTEST);
            debug!(id = trade.id, instrument = %trade.instrument, price = trade.price, pnl = ?trade.pnl, "liquidated");
        }

        ledger.snapshot(last, ledger.cash());
        let result = Self::finish(ledger);
        info!(
            trades = result.trades.len(),
            final_cash = result.final_cash,
            "backtest finished"
        );
        Ok(result)
    }

    /// Evaluates one bar of one instrument and applies the resulting trade, if any.
    fn step(&self, ctx: &EvalContext<'_>, ledger: &mut Ledger, book: &mut PositionBook) -> Result<()> {
        let rules = &self.config.rules;
        let timestamp = ctx.current.timestamp();
        let price = ctx.current.price();

        match book.state(ctx.instrument)? {
            PositionState::Flat => {
                let Some(rule) = rules.first_firing(Side::Buy, ctx)? else {
                    return Ok(());
                };
                match ledger.buy(ctx.instrument, timestamp, price, rule.quantity(), rule.name()) {
                    Ok(position) => {
                        book.open(ctx.instrument, position)?;
                        debug!(
                            instrument = ctx.instrument,
                            rule = rule.name(),
                            price,
                            quantity = rule.quantity(),
                            cash = ledger.cash(),
                            "BUY"
                        );
                    }
                    Err(Error::InsufficientFunds(required, available)) => {
                        debug!(
                            instrument = ctx.instrument,
                            rule = rule.name(),
                            required,
                            available,
                            "entry skipped, not enough cash"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            PositionState::Holding(_) => {
                let Some(rule) = rules.first_firing(Side::Sell, ctx)? else {
                    return Ok(());
                };
                let position = book.close(ctx.instrument, timestamp)?;
                let trade = ledger.sell(ctx.instrument, timestamp, price, &position, rule.name());
                debug!(
                    instrument = ctx.instrument,
                    rule = rule.name(),
                    price,
                    pnl = ?trade.pnl,
                    "SELL"
                );
            }
        }
        Ok(())
    }

    fn finish(ledger: Ledger) -> BacktestResult {
        let initial_capital = ledger.initial_capital();
        let final_cash = ledger.cash();
        let (trades, snapshots) = ledger.into_parts();
        BacktestResult {
            initial_capital,
            final_cash,
            trades,
            snapshots,
        }
    }
}
