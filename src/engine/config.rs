use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

use crate::{
    engine::{Granularity, RuleSet},
    errors::{Error, Result},
};

/// When the driver records an equity sample, on top of the mandatory first and last ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// About `points` samples spread evenly over the timeline indices.
    EvenlyIndexed {
        /// Approximate number of samples.
        points: usize,
    },
    /// One sample every `n` timeline steps.
    EveryBars(usize),
    /// One sample whenever at least this much time passed since the previous sample.
    Interval(Duration),
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::EvenlyIndexed { points: 100 }
    }
}

impl SamplingPolicy {
    /// Step between samples for an index-based policy over `len` timeline steps.
    pub(crate) fn step(&self, len: usize) -> Option<usize> {
        match *self {
            SamplingPolicy::EvenlyIndexed { points } => Some((len / points.max(1)).max(1)),
            SamplingPolicy::EveryBars(n) => Some(n.max(1)),
            SamplingPolicy::Interval(_) => None,
        }
    }
}

/// Everything a run needs besides the price series.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Instruments, in the order they are processed at each timestamp.
    pub instruments: Vec<String>,
    /// First calendar day (inclusive).
    pub start: NaiveDate,
    /// Last calendar day (inclusive).
    pub end: NaiveDate,
    /// Starting cash.
    pub initial_capital: f64,
    /// Bar interval requested from the provider.
    pub granularity: Granularity,
    /// Equity sampling cadence.
    pub sampling: SamplingPolicy,
    /// Entry and exit rules.
    pub rules: RuleSet,
}

impl BacktestConfig {
    /// Creates a daily configuration with the default sampling.
    pub fn new(
        instruments: Vec<String>,
        start: NaiveDate,
        end: NaiveDate,
        initial_capital: f64,
        rules: RuleSet,
    ) -> Self {
        Self {
            instruments,
            start,
            end,
            initial_capital,
            granularity: Granularity::default(),
            sampling: SamplingPolicy::default(),
            rules,
        }
    }

    /// Sets the bar interval.
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Sets the equity sampling cadence.
    pub fn sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.sampling = sampling;
        self
    }

    /// Rejects configurations that cannot be simulated.
    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::NoInstruments);
        }
        let mut seen = BTreeSet::new();
        for instrument in &self.instruments {
            if !seen.insert(instrument.as_str()) {
                return Err(Error::DuplicateInstrument(instrument.clone()));
            }
        }
        if !self.rules.any_enabled() {
            return Err(Error::NoRulesEnabled);
        }
        if self.initial_capital <= 0.0 || !self.initial_capital.is_finite() {
            return Err(Error::NegZeroBalance(self.initial_capital));
        }
        if self.end < self.start {
            return Err(Error::InvalidDateRange(self.start, self.end));
        }
        if let SamplingPolicy::Interval(interval) = self.sampling {
            if interval <= Duration::zero() {
                return Err(Error::Msg("sampling interval must be positive".to_string()));
            }
        }
        Ok(())
    }
}
