//! Price series providers.
//!
//! The driver only needs each instrument's series to be ordered in time and independently
//! addressable. Where it comes from (a seeded random walk, a file, a live feed drained
//! beforehand) is up to the provider.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    PercentCalculus,
    engine::PriceBar,
    errors::{Error, Result},
    utils::seed_for,
};

/// Bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Granularity {
    /// 1 minute.
    M1,
    /// 5 minutes.
    M5,
    /// 15 minutes.
    M15,
    /// 30 minutes.
    M30,
    /// 1 hour.
    H1,
    /// 4 hours.
    H4,
    /// 1 day.
    #[default]
    D1,
    /// 1 week.
    W1,
}

impl Granularity {
    /// Every supported granularity, finest first.
    pub const ALL: [Granularity; 8] = [
        Granularity::M1,
        Granularity::M5,
        Granularity::M15,
        Granularity::M30,
        Granularity::H1,
        Granularity::H4,
        Granularity::D1,
        Granularity::W1,
    ];

    /// Returns the interval in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Granularity::M1 => 1,
            Granularity::M5 => 5,
            Granularity::M15 => 15,
            Granularity::M30 => 30,
            Granularity::H1 => 60,
            Granularity::H4 => 240,
            Granularity::D1 => 1440,
            Granularity::W1 => 10080,
        }
    }

    /// Returns the interval as a duration.
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Granularity::M1 => "1Min",
            Granularity::M5 => "5Min",
            Granularity::M15 => "15Min",
            Granularity::M30 => "30Min",
            Granularity::H1 => "1H",
            Granularity::H4 => "4H",
            Granularity::D1 => "1D",
            Granularity::W1 => "1W",
        };
        write!(f, "{label}")
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1min" | "1m" => Ok(Granularity::M1),
            "5min" | "5m" => Ok(Granularity::M5),
            "15min" | "15m" => Ok(Granularity::M15),
            "30min" | "30m" => Ok(Granularity::M30),
            "1h" | "60m" | "60min" => Ok(Granularity::H1),
            "4h" | "240m" => Ok(Granularity::H4),
            "1d" | "d" | "daily" => Ok(Granularity::D1),
            "1w" | "1wk" | "weekly" => Ok(Granularity::W1),
            _ => Err(Error::UnknownGranularity(s.to_string())),
        }
    }
}

/// Supplies the ordered series of an instrument over a date range.
///
/// `start` and `end` are inclusive calendar days (UTC). A provider with no data for an
/// instrument returns an empty series.
pub trait PriceSeriesProvider {
    /// Returns the bars of `instrument` in `[start, end]`, ordered by timestamp.
    fn series(&self, instrument: &str, start: NaiveDate, end: NaiveDate, granularity: Granularity)
    -> Result<Vec<PriceBar>>;
}

/// Returns the `[from, to)` instants covering the calendar days `start..=end`.
pub(crate) fn day_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = start.and_time(NaiveTime::MIN).and_utc();
    let to = end.and_time(NaiveTime::MIN).and_utc() + Duration::days(1);
    (from, to)
}

/// Replays series held in memory.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: BTreeMap<String, Vec<PriceBar>>,
}

impl InMemoryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the series of `instrument`.
    pub fn with_series(mut self, instrument: impl Into<String>, bars: Vec<PriceBar>) -> Self {
        self.insert(instrument, bars);
        self
    }

    /// Adds (or replaces) the series of `instrument`.
    pub fn insert(&mut self, instrument: impl Into<String>, bars: Vec<PriceBar>) {
        self.series.insert(instrument.into(), bars);
    }

    /// Returns the instruments with a series.
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl PriceSeriesProvider for InMemoryProvider {
    fn series(&self, instrument: &str, start: NaiveDate, end: NaiveDate, _: Granularity) -> Result<Vec<PriceBar>> {
        let (from, to) = day_bounds(start, end);
        Ok(self
            .series
            .get(instrument)
            .map(|bars| {
                bars.iter()
                    .filter(|bar| bar.timestamp() >= from && bar.timestamp() < to)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Series read once from a JSON file shaped as `{ "AAPL": [{ "timestamp": .., "price": ..,
/// "volume": .. }, ..], .. }`, then replayed from memory.
#[cfg(feature = "serde")]
#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    inner: InMemoryProvider,
}

#[cfg(feature = "serde")]
impl JsonFileProvider {
    /// Reads the file at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let inner = crate::utils::read_json(path.as_ref())?;
        Ok(Self { inner })
    }

    /// Returns the instruments found in the file.
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.inner.instruments()
    }
}

#[cfg(feature = "serde")]
impl PriceSeriesProvider for JsonFileProvider {
    fn series(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PriceBar>> {
        self.inner.series(instrument, start, end, granularity)
    }
}

/// Deterministic random walk.
///
/// The same `(seed, instrument, granularity)` always yields the same series. The per-bar move is
/// uniform in `±volatility`, where `volatility` is 2% for daily bars and scales with the square
/// root of the bar length.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticProvider {
    seed: u64,
    base_price: f64,
}

impl SyntheticProvider {
    /// Creates a provider starting every series around 100.
    pub fn new(seed: u64) -> Self {
        Self { seed, base_price: 100.0 }
    }

    /// Sets the price every series starts around.
    pub fn base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }
}

impl PriceSeriesProvider for SyntheticProvider {
    fn series(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PriceBar>> {
        if self.base_price <= 0.0 || !self.base_price.is_finite() {
            return Err(Error::Msg(format!("base price must be positive (got: {})", self.base_price)));
        }

        let mut rng = StdRng::seed_from_u64(seed_for(self.seed, instrument, granularity.minutes()));
        let volatility = 2.0 * (granularity.minutes() as f64 / 1440.0).sqrt();
        let step = granularity.duration();
        let (mut timestamp, to) = day_bounds(start, end);

        let mut price = self.base_price.addpercent(rng.random_range(-20.0..=20.0));
        let mut bars = Vec::new();
        while timestamp < to {
            let volume = rng.random_range(1_000..=100_000u64);
            bars.push(PriceBar::from((timestamp, price, volume)));
            price = price.addpercent(rng.random_range(-volatility..=volatility)).max(0.01);
            timestamp += step;
        }
        Ok(bars)
    }
}
