use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// One `(timestamp, price, volume)` sample of an instrument.
///
/// Bars are immutable once built. Within a series they are ordered by timestamp, with no
/// duplicate timestamps.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBar {
    timestamp: DateTime<Utc>,
    price: f64,
    volume: u64,
}

impl PriceBar {
    /// Returns the instant of the sample.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the sampled price.
    pub fn price(&self) -> f64 {
        self.price
    }

    /// Returns the traded volume.
    pub fn volume(&self) -> u64 {
        self.volume
    }
}

/// Builder for [`PriceBar`].
///
/// ### Example
/// ```rust
/// use rules_bt::prelude::*;
/// use chrono::DateTime;
///
/// let bar = PriceBarBuilder::builder()
///     .timestamp(DateTime::default())
///     .price(101.5)
///     .volume(1_200)
///     .build()
///     .unwrap();
/// assert_eq!(bar.price(), 101.5);
/// ```
#[derive(Debug, Default)]
pub struct PriceBarBuilder {
    timestamp: Option<DateTime<Utc>>,
    price: Option<f64>,
    volume: u64,
}

impl PriceBarBuilder {
    /// Starts a new builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the timestamp.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the price.
    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Sets the volume (defaults to 0).
    pub fn volume(mut self, volume: u64) -> Self {
        self.volume = volume;
        self
    }

    /// Builds the bar, rejecting a missing timestamp or a non-positive price.
    pub fn build(self) -> Result<PriceBar> {
        let timestamp = self.timestamp.ok_or_else(|| Error::Msg("bar timestamp is required".to_string()))?;
        let price = self.price.ok_or_else(|| Error::Msg("bar price is required".to_string()))?;
        if price <= 0.0 || !price.is_finite() {
            return Err(Error::Msg(format!("bar price must be positive (got: {price})")));
        }
        Ok(PriceBar {
            timestamp,
            price,
            volume: self.volume,
        })
    }
}

impl From<(DateTime<Utc>, f64, u64)> for PriceBar {
    fn from((timestamp, price, volume): (DateTime<Utc>, f64, u64)) -> Self {
        Self {
            timestamp,
            price,
            volume,
        }
    }
}

/// Checks that `bars` is usable as the series of `instrument`: positive finite prices and
/// strictly increasing timestamps.
pub(crate) fn validate_series(instrument: &str, bars: &[PriceBar]) -> Result<()> {
    for bar in bars {
        if bar.price <= 0.0 || !bar.price.is_finite() {
            return Err(Error::InvalidBar {
                instrument: instrument.to_string(),
                reason: format!("price must be positive (got: {})", bar.price),
            });
        }
    }
    if bars.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
        return Err(Error::UnorderedSeries {
            instrument: instrument.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn build_valid_bar() {
        let bar = PriceBarBuilder::builder().timestamp(at(0)).price(10.0).volume(5).build().unwrap();
        assert_eq!(bar.timestamp(), at(0));
        assert_eq!(bar.price(), 10.0);
        assert_eq!(bar.volume(), 5);
    }

    #[test]
    fn build_rejects_bad_price() {
        let result = PriceBarBuilder::builder().timestamp(at(0)).price(0.0).build();
        assert!(matches!(result, Err(Error::Msg(_))));

        let result = PriceBarBuilder::builder().timestamp(at(0)).price(f64::NAN).build();
        assert!(matches!(result, Err(Error::Msg(_))));

        let result = PriceBarBuilder::builder().price(1.0).build();
        assert!(matches!(result, Err(Error::Msg(_))));
    }

    #[test]
    fn validate_ordered_series() {
        let bars = vec![
            PriceBar::from((at(0), 1.0, 0)),
            PriceBar::from((at(0) + Duration::days(1), 2.0, 0)),
        ];
        assert!(validate_series("A", &bars).is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_timestamps() {
        let bars = vec![PriceBar::from((at(0), 1.0, 0)), PriceBar::from((at(0), 2.0, 0))];
        assert!(matches!(
            validate_series("A", &bars),
            Err(Error::UnorderedSeries { .. })
        ));
    }

    #[test]
    fn validate_rejects_negative_price() {
        let bars = vec![PriceBar::from((at(0), -1.0, 0))];
        assert!(matches!(validate_series("A", &bars), Err(Error::InvalidBar { .. })));
    }
}
