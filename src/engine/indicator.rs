use std::collections::{BTreeMap, BTreeSet};

/// Rolling mean over a fixed number of samples, keeping every value it produced.
#[derive(Debug, Clone)]
struct RollingMean {
    window: usize,
    sum: f64,
    // averages[i] is the mean of the `window` samples ending at index i
    averages: Vec<Option<f64>>,
}

impl RollingMean {
    fn new(window: usize) -> Self {
        Self {
            window,
            sum: 0.0,
            averages: Vec::new(),
        }
    }

    fn push(&mut self, samples: &[f64]) {
        let len = samples.len();
        if let Some(last) = samples.last() {
            self.sum += last;
        }
        if len > self.window {
            self.sum -= samples[len - 1 - self.window];
        }
        let average = (len >= self.window).then(|| self.sum / self.window as f64);
        self.averages.push(average);
    }
}

/// Samples and rolling means of a single instrument.
#[derive(Debug, Clone, Default)]
struct SeriesIndicators {
    samples: Vec<f64>,
    means: BTreeMap<usize, RollingMean>,
}

/// Rolling statistics per instrument, advanced one bar at a time.
///
/// Windows are keyed by length, not by rule: two rules sharing a window length read the same
/// values. `average` returns `None` while fewer than `window` samples exist.
#[derive(Debug, Clone, Default)]
pub struct IndicatorCache {
    windows: BTreeSet<usize>,
    series: BTreeMap<String, SeriesIndicators>,
}

impl IndicatorCache {
    /// Creates a cache that maintains a mean for every length in `windows`.
    pub fn new<I>(windows: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        Self {
            windows: windows.into_iter().filter(|w| *w > 0).collect(),
            series: BTreeMap::new(),
        }
    }

    /// Returns the window lengths being maintained.
    pub fn windows(&self) -> impl Iterator<Item = usize> + '_ {
        self.windows.iter().copied()
    }

    /// Appends one sample of `instrument` and advances every rolling mean.
    pub fn update(&mut self, instrument: &str, value: f64) {
        let windows = &self.windows;
        let series = self.series.entry(instrument.to_string()).or_insert_with(|| SeriesIndicators {
            samples: Vec::new(),
            means: windows.iter().map(|w| (*w, RollingMean::new(*w))).collect(),
        });
        series.samples.push(value);
        for mean in series.means.values_mut() {
            mean.push(&series.samples);
        }
    }

    /// Returns the number of samples seen for `instrument`.
    pub fn len(&self, instrument: &str) -> usize {
        self.series.get(instrument).map_or(0, |s| s.samples.len())
    }

    /// Returns `true` if no sample of `instrument` was seen.
    pub fn is_empty(&self, instrument: &str) -> bool {
        self.len(instrument) == 0
    }

    /// Returns the mean of the `window` samples ending at `as_of`.
    ///
    /// `None` when the window is not maintained, `as_of` is past the last sample, or fewer than
    /// `window` samples exist up to `as_of`.
    pub fn average(&self, instrument: &str, window: usize, as_of: usize) -> Option<f64> {
        self.series
            .get(instrument)?
            .means
            .get(&window)?
            .averages
            .get(as_of)
            .copied()
            .flatten()
    }

    /// Returns the mean of the `window` most recent samples of `instrument`.
    pub fn latest(&self, instrument: &str, window: usize) -> Option<f64> {
        let len = self.len(instrument);
        if len == 0 {
            return None;
        }
        self.average(instrument, window, len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ta::Next;
    use ta::indicators::SimpleMovingAverage;

    #[test]
    fn insufficient_data() {
        let mut cache = IndicatorCache::new([3]);
        cache.update("AAPL", 1.0);
        cache.update("AAPL", 2.0);
        assert_eq!(cache.average("AAPL", 3, 1), None);
        cache.update("AAPL", 3.0);
        assert_eq!(cache.average("AAPL", 3, 2), Some(2.0));
    }

    #[test]
    fn mean_of_prices() {
        let mut cache = IndicatorCache::new([5]);
        for price in [50.0, 100.0, 95.0, 100.0, 105.0] {
            cache.update("AAPL", price);
        }
        assert_eq!(cache.latest("AAPL", 5), Some(90.0));
    }

    #[test]
    fn unknown_window_or_instrument() {
        let mut cache = IndicatorCache::new([2]);
        cache.update("AAPL", 1.0);
        cache.update("AAPL", 2.0);
        assert_eq!(cache.average("AAPL", 3, 1), None);
        assert_eq!(cache.average("MSFT", 2, 1), None);
        assert_eq!(cache.average("AAPL", 2, 5), None);
        assert!(cache.is_empty("MSFT"));
    }

    #[test]
    fn shared_window_lengths() {
        let cache = IndicatorCache::new([5, 20, 5, 0]);
        assert_eq!(cache.windows().collect::<Vec<_>>(), vec![5, 20]);
    }

    #[test]
    fn instruments_are_independent() {
        let mut cache = IndicatorCache::new([2]);
        cache.update("A", 10.0);
        cache.update("B", 100.0);
        cache.update("A", 20.0);
        assert_eq!(cache.latest("A", 2), Some(15.0));
        assert_eq!(cache.latest("B", 2), None);
    }

    #[test]
    fn matches_simple_moving_average() {
        let prices = (0..200).map(|i| 100.0 + ((i as f64) * 0.37).sin() * 7.0).collect::<Vec<_>>();
        let mut cache = IndicatorCache::new([7, 30]);
        let mut sma7 = SimpleMovingAverage::new(7).unwrap();
        let mut sma30 = SimpleMovingAverage::new(30).unwrap();

        for (i, price) in prices.iter().enumerate() {
            cache.update("X", *price);
            let expected7 = sma7.next(*price);
            let expected30 = sma30.next(*price);
            if i >= 6 {
                assert!((cache.average("X", 7, i).unwrap() - expected7).abs() < 1e-9);
            }
            if i >= 29 {
                assert!((cache.average("X", 30, i).unwrap() - expected30).abs() < 1e-9);
            }
        }
    }
}
